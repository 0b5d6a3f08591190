// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Archive packing and unpacking for the file-tree surface.
//!
//! Supports zip and tar-gzip, chosen by archive suffix. Extraction resolves
//! every entry name through the chroot before any bytes land, so a
//! hostile archive cannot plant files outside the workload base.

use crate::domain::chroot::ChrootBase;
use crate::domain::error::{CoreError, CoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Decide the format from the archive file name.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else {
            Err(CoreError::UnsupportedArchive(name.to_string()))
        }
    }
}

fn archive_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Validation(format!("archive error: {e}"))
}

/// (absolute source, entry name) pairs to pack.
pub type PackSource = (PathBuf, String);

pub fn pack(kind: ArchiveKind, sources: &[PackSource], archive: &Path) -> CoreResult<()> {
    match kind {
        ArchiveKind::Zip => pack_zip(sources, archive),
        ArchiveKind::TarGz => pack_tar_gz(sources, archive),
    }
}

fn pack_zip(sources: &[PackSource], archive: &Path) -> CoreResult<()> {
    let file = File::create(archive)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (source, name) in sources {
        if source.is_dir() {
            for (abs, rel) in walk(source, name)? {
                if abs.is_dir() {
                    writer.add_directory(rel, options).map_err(archive_err)?;
                } else {
                    writer.start_file(rel, options).map_err(archive_err)?;
                    let mut input = File::open(&abs)?;
                    std::io::copy(&mut input, &mut writer)?;
                }
            }
        } else {
            writer.start_file(name.clone(), options).map_err(archive_err)?;
            let mut input = File::open(source)?;
            std::io::copy(&mut input, &mut writer)?;
        }
    }
    writer.finish().map_err(archive_err)?;
    Ok(())
}

fn pack_tar_gz(sources: &[PackSource], archive: &Path) -> CoreResult<()> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (source, name) in sources {
        if source.is_dir() {
            builder.append_dir_all(name, source)?;
        } else {
            builder.append_path_with_name(source, name)?;
        }
    }
    let encoder = builder.into_inner()?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Extract into `target` (a logical directory already resolved by the
/// caller); each entry is re-resolved through the chroot.
pub fn unpack(
    kind: ArchiveKind,
    archive: &Path,
    chroot: &ChrootBase,
    target_logical: &str,
) -> CoreResult<()> {
    match kind {
        ArchiveKind::Zip => unpack_zip(archive, chroot, target_logical),
        ArchiveKind::TarGz => unpack_tar_gz(archive, chroot, target_logical),
    }
}

fn entry_destination(
    chroot: &ChrootBase,
    target_logical: &str,
    entry_name: &str,
) -> CoreResult<PathBuf> {
    chroot.resolve(&format!("{target_logical}/{entry_name}"))
}

fn unpack_zip(archive: &Path, chroot: &ChrootBase, target_logical: &str) -> CoreResult<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_err)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(archive_err)?;
        let name = entry.name().to_string();
        let destination = entry_destination(chroot, target_logical, &name)?;

        if entry.is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut output = File::create(&destination)?;
            std::io::copy(&mut entry, &mut output)?;
        }
    }
    Ok(())
}

fn unpack_tar_gz(archive: &Path, chroot: &ChrootBase, target_logical: &str) -> CoreResult<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        let destination = entry_destination(chroot, target_logical, &name)?;

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut output = File::create(&destination)?;
            std::io::copy(&mut entry, &mut output)?;
        }
    }
    Ok(())
}

/// Recursive (absolute, entry-name) listing for a directory source.
fn walk(dir: &Path, prefix: &str) -> CoreResult<Vec<(PathBuf, String)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let abs = entry.path();
        let rel = format!("{prefix}/{}", entry.file_name().to_string_lossy());
        if abs.is_dir() {
            out.push((abs.clone(), rel.clone()));
            out.extend(walk(&abs, &rel)?);
        } else {
            out.push((abs, rel));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn kind_detection() {
        assert_eq!(ArchiveKind::from_name("world.zip").unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_name("world.tar.gz").unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("world.TGZ").unwrap(), ArchiveKind::TarGz);
        assert!(matches!(
            ArchiveKind::from_name("world.rar"),
            Err(CoreError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn zip_round_trip_with_confinement() {
        let root = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let chroot = ChrootBase::new(root.path(), uuid);
        std::fs::create_dir_all(chroot.base().join("world")).unwrap();
        std::fs::write(chroot.base().join("world/level.dat"), b"data").unwrap();

        let archive = chroot.base().join("world.zip");
        pack(
            ArchiveKind::Zip,
            &[(chroot.base().join("world"), "world".to_string())],
            &archive,
        )
        .unwrap();

        std::fs::create_dir_all(chroot.base().join("restore")).unwrap();
        unpack(ArchiveKind::Zip, &archive, &chroot, "restore").unwrap();
        assert_eq!(
            std::fs::read(chroot.base().join("restore/world/level.dat")).unwrap(),
            b"data"
        );
    }

    #[test]
    fn tar_gz_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let chroot = ChrootBase::new(root.path(), uuid);
        std::fs::create_dir_all(chroot.base().join("plugins")).unwrap();
        std::fs::write(chroot.base().join("plugins/a.jar"), b"jar").unwrap();

        let archive = chroot.base().join("backup.tar.gz");
        pack(
            ArchiveKind::TarGz,
            &[(chroot.base().join("plugins"), "plugins".to_string())],
            &archive,
        )
        .unwrap();

        std::fs::create_dir_all(chroot.base().join("out")).unwrap();
        unpack(ArchiveKind::TarGz, &archive, &chroot, "out").unwrap();
        assert_eq!(std::fs::read(chroot.base().join("out/plugins/a.jar")).unwrap(), b"jar");
    }

    #[test]
    fn hostile_entry_names_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let chroot = ChrootBase::new(root.path(), uuid);
        std::fs::create_dir_all(chroot.base()).unwrap();

        // Hand-build a zip with a traversal entry name.
        let archive = chroot.base().join("evil.zip");
        let file = File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("../../escape.txt", options).unwrap();
        writer.write_all(b"pwned").unwrap();
        writer.finish().unwrap();

        let err = unpack(ArchiveKind::Zip, &archive, &chroot, "").unwrap_err();
        assert!(matches!(err, CoreError::PathTraversal(_)));
        assert!(!root.path().join("escape.txt").exists());
    }
}
