// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File-tree surface shared by the HTTP handlers and the SFTP server.
//!
//! Every operation resolves its paths through the workload's chroot base;
//! archive work runs on the blocking pool.

use crate::application::archive::{self, ArchiveKind, PackSource};
use crate::domain::chroot::ChrootBase;
use crate::domain::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    /// Logical (chroot-relative) path, `/`-prefixed.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct FileTreeService {
    data_root: PathBuf,
}

impl FileTreeService {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self { data_root: data_root.into() }
    }

    pub fn chroot(&self, uuid: Uuid) -> ChrootBase {
        ChrootBase::new(&self.data_root, uuid)
    }

    async fn resolve(&self, uuid: Uuid, path: &str) -> CoreResult<(ChrootBase, PathBuf)> {
        let chroot = self.chroot(uuid);
        let resolved = chroot.resolve(path)?;
        chroot.ensure().await?;
        Ok((chroot, resolved))
    }

    pub async fn list(&self, uuid: Uuid, path: &str) -> CoreResult<Vec<FileEntry>> {
        let (chroot, dir) = self.resolve(uuid, path).await?;
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(to_entry(
                entry.file_name().to_string_lossy().into_owned(),
                chroot.logical(&entry.path())?,
                &metadata,
            ));
        }
        entries.sort_by(|a, b| (b.is_dir, &a.name).cmp(&(a.is_dir, &b.name)));
        Ok(entries)
    }

    pub async fn stat(&self, uuid: Uuid, path: &str) -> CoreResult<FileEntry> {
        let (chroot, target) = self.resolve(uuid, path).await?;
        let metadata = tokio::fs::metadata(&target).await?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        Ok(to_entry(name, chroot.logical(&target)?, &metadata))
    }

    pub async fn read_file(&self, uuid: Uuid, path: &str) -> CoreResult<Vec<u8>> {
        let (_, target) = self.resolve(uuid, path).await?;
        Ok(tokio::fs::read(&target).await?)
    }

    pub async fn write_file(&self, uuid: Uuid, path: &str, contents: &[u8]) -> CoreResult<()> {
        let (_, target) = self.resolve(uuid, path).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    pub async fn create_dir(&self, uuid: Uuid, path: &str) -> CoreResult<()> {
        let (_, target) = self.resolve(uuid, path).await?;
        tokio::fs::create_dir_all(&target).await?;
        Ok(())
    }

    pub async fn create_file(&self, uuid: Uuid, path: &str) -> CoreResult<()> {
        self.write_file(uuid, path, b"").await
    }

    pub async fn delete_recursive(&self, uuid: Uuid, path: &str) -> CoreResult<()> {
        let (chroot, target) = self.resolve(uuid, path).await?;
        if target == *chroot.base() {
            return Err(CoreError::validation("cannot delete the workload root"));
        }
        let metadata = tokio::fs::metadata(&target).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    pub async fn rename(&self, uuid: Uuid, from: &str, to: &str) -> CoreResult<()> {
        let (_, source) = self.resolve(uuid, from).await?;
        let (_, destination) = self.resolve(uuid, to).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &destination).await?;
        Ok(())
    }

    /// Mode strings matching `^[0-7]{3,4}$` parse as octal, anything else
    /// as decimal; the result must land in `[0, 0o777]`.
    pub async fn chmod(&self, uuid: Uuid, path: &str, mode: &str) -> CoreResult<()> {
        let bits = parse_mode(mode)?;
        let (_, target) = self.resolve(uuid, path).await?;
        let metadata = tokio::fs::metadata(&target).await?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(bits);
        tokio::fs::set_permissions(&target, permissions).await?;
        Ok(())
    }

    /// Pack `paths` into `archive_name` inside the same chroot.
    pub async fn compress(
        &self,
        uuid: Uuid,
        paths: Vec<String>,
        archive_name: &str,
    ) -> CoreResult<FileEntry> {
        let kind = ArchiveKind::from_name(archive_name)?;
        let (chroot, archive_abs) = self.resolve(uuid, archive_name).await?;

        let mut sources: Vec<PackSource> = Vec::with_capacity(paths.len());
        for logical in &paths {
            let abs = chroot.resolve(logical)?;
            let name = chroot.logical(&abs)?.trim_start_matches('/').to_string();
            if name.is_empty() {
                return Err(CoreError::validation("cannot compress the workload root"));
            }
            sources.push((abs, name));
        }

        let archive_for_task = archive_abs.clone();
        tokio::task::spawn_blocking(move || archive::pack(kind, &sources, &archive_for_task))
            .await
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))??;

        self.stat(uuid, archive_name).await
    }

    /// Unpack `archive_name` into `target`, confinement-checking every
    /// entry.
    pub async fn decompress(&self, uuid: Uuid, archive_name: &str, target: &str) -> CoreResult<()> {
        let kind = ArchiveKind::from_name(archive_name)?;
        let (chroot, archive_abs) = self.resolve(uuid, archive_name).await?;
        let target_dir = chroot.resolve(target)?;
        tokio::fs::create_dir_all(&target_dir).await?;

        let target_logical = chroot.logical(&target_dir)?;
        tokio::task::spawn_blocking(move || {
            archive::unpack(kind, &archive_abs, &chroot, &target_logical)
        })
        .await
        .map_err(|e| CoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

fn parse_mode(raw: &str) -> CoreResult<u32> {
    let raw = raw.trim();
    let is_octal =
        (3..=4).contains(&raw.len()) && raw.chars().all(|c| ('0'..='7').contains(&c));
    let bits = if is_octal {
        u32::from_str_radix(raw, 8)
            .map_err(|_| CoreError::validation(format!("invalid mode '{raw}'")))?
    } else {
        raw.parse::<u32>()
            .map_err(|_| CoreError::validation(format!("invalid mode '{raw}'")))?
    };
    if bits > 0o777 {
        return Err(CoreError::validation(format!("mode {raw} out of range")));
    }
    Ok(bits)
}

fn to_entry(name: String, logical: String, metadata: &std::fs::Metadata) -> FileEntry {
    FileEntry {
        name,
        path: logical,
        is_dir: metadata.is_dir(),
        size: metadata.len(),
        mode: metadata.permissions().mode() & 0o7777,
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (FileTreeService, tempfile::TempDir, Uuid) {
        let root = tempfile::tempdir().unwrap();
        let service = FileTreeService::new(root.path());
        (service, root, Uuid::new_v4())
    }

    #[tokio::test]
    async fn write_list_read_round_trip() {
        let (svc, _root, uuid) = service();
        svc.write_file(uuid, "config/server.properties", b"motd=hi").await.unwrap();

        let listed = svc.list(uuid, "config").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "server.properties");
        assert_eq!(listed[0].path, "/config/server.properties");

        let contents = svc.read_file(uuid, "config/server.properties").await.unwrap();
        assert_eq!(contents, b"motd=hi");
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_io() {
        let (svc, root, uuid) = service();
        let err = svc.read_file(uuid, "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, CoreError::PathTraversal(_)));
        // The workload base was not even created by the failed call.
        assert!(!root.path().join(uuid.to_string()).exists());
    }

    #[tokio::test]
    async fn delete_and_rename() {
        let (svc, _root, uuid) = service();
        svc.write_file(uuid, "a/b.txt", b"x").await.unwrap();
        svc.rename(uuid, "a/b.txt", "a/c.txt").await.unwrap();
        assert!(svc.stat(uuid, "a/c.txt").await.is_ok());

        svc.delete_recursive(uuid, "a").await.unwrap();
        assert!(svc.stat(uuid, "a").await.is_err());

        let err = svc.delete_recursive(uuid, "/").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn chmod_modes() {
        let (svc, _root, uuid) = service();
        svc.write_file(uuid, "run.sh", b"#!/bin/bash\n").await.unwrap();

        svc.chmod(uuid, "run.sh", "755").await.unwrap();
        assert_eq!(svc.stat(uuid, "run.sh").await.unwrap().mode, 0o755);

        // Decimal fallback: 438 == 0o666.
        svc.chmod(uuid, "run.sh", "438").await.unwrap();
        assert_eq!(svc.stat(uuid, "run.sh").await.unwrap().mode, 0o666);

        assert!(svc.chmod(uuid, "run.sh", "999999").await.is_err());
        assert!(svc.chmod(uuid, "run.sh", "rwx").await.is_err());
    }

    #[tokio::test]
    async fn compress_then_decompress() {
        let (svc, _root, uuid) = service();
        svc.write_file(uuid, "world/level.dat", b"chunk").await.unwrap();

        let entry = svc
            .compress(uuid, vec!["world".to_string()], "world.tar.gz")
            .await
            .unwrap();
        assert!(entry.size > 0);

        svc.decompress(uuid, "world.tar.gz", "restored").await.unwrap();
        let contents = svc.read_file(uuid, "restored/world/level.dat").await.unwrap();
        assert_eq!(contents, b"chunk");

        let err = svc.decompress(uuid, "world.rar", "x").await.unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedArchive(_)));
    }
}
