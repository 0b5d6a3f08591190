// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SFTP subsystem handler: one per session, chrooted to the workload base.
//!
//! The subsystem's request loop awaits each handler call before reading the
//! next request, so replies leave in request order, which the SFTP wire
//! protocol requires. Handles are integer-keyed strings over a file/dir
//! table local to the session.

use crate::application::files::{FileEntry, FileTreeService};
use crate::domain::access::permissions;
use crate::domain::error::CoreError;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

/// Effective rights resolved once at authentication.
#[derive(Debug, Clone)]
pub struct SftpAccess {
    pub owner: bool,
    pub wildcard_role: bool,
    pub grant: Vec<String>,
}

impl SftpAccess {
    pub fn allows(&self, token: &str) -> bool {
        self.owner
            || self.wildcard_role
            || self.grant.iter().any(|p| p == permissions::WILDCARD || p == token)
    }

    /// Whether the principal has any standing on the workload at all.
    pub fn any(&self) -> bool {
        self.owner || self.wildcard_role || !self.grant.is_empty()
    }
}

enum HandleEntry {
    File { file: tokio::fs::File, logical: String },
    Dir { entries: Vec<FileEntry>, done: bool },
}

pub struct SftpSession {
    files: FileTreeService,
    uuid: Uuid,
    access: SftpAccess,
    handles: HashMap<String, HandleEntry>,
    next_handle: u64,
}

impl SftpSession {
    pub fn new(files: FileTreeService, uuid: Uuid, access: SftpAccess) -> Self {
        Self { files, uuid, access, handles: HashMap::new(), next_handle: 1 }
    }

    fn allocate_handle(&mut self, entry: HandleEntry) -> String {
        let key = self.next_handle.to_string();
        self.next_handle += 1;
        self.handles.insert(key.clone(), entry);
        key
    }

    fn require(&self, token: &str) -> Result<(), StatusCode> {
        if self.access.allows(token) {
            Ok(())
        } else {
            Err(StatusCode::PermissionDenied)
        }
    }

    fn ok_status(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        }
    }
}

fn map_err(e: CoreError) -> StatusCode {
    match e {
        CoreError::PathTraversal(_) | CoreError::Forbidden(_) => StatusCode::PermissionDenied,
        CoreError::NotFound(_) => StatusCode::NoSuchFile,
        CoreError::Io(io) => match io.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
            std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            _ => StatusCode::Failure,
        },
        _ => StatusCode::Failure,
    }
}

fn to_attrs(entry: &FileEntry) -> FileAttributes {
    let kind = if entry.is_dir { 0o040000 } else { 0o100000 };
    FileAttributes {
        size: Some(entry.size),
        permissions: Some(kind | entry.mode),
        mtime: entry.modified_at.map(|t| t.timestamp() as u32),
        ..Default::default()
    }
}

impl russh_sftp::server::Handler for SftpSession {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        debug!(version, workload = %self.uuid, "sftp session initialized");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let writing = pflags.intersects(
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::APPEND,
        );
        self.require(if writing { permissions::FILE_WRITE } else { permissions::FILE_READ })?;

        let chroot = self.files.chroot(self.uuid);
        let resolved = chroot.resolve(&filename).map_err(map_err)?;
        chroot.ensure().await.map_err(|e| map_err(e.into()))?;
        let logical = chroot.logical(&resolved).map_err(map_err)?;

        let mut options = tokio::fs::OpenOptions::new();
        options
            .read(pflags.contains(OpenFlags::READ))
            .write(writing)
            .create(pflags.contains(OpenFlags::CREATE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .append(pflags.contains(OpenFlags::APPEND));
        let file = options.open(&resolved).await.map_err(|e| map_err(e.into()))?;

        Ok(Handle { id, handle: self.allocate_handle(HandleEntry::File { file, logical }) })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(Self::ok_status(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let Some(HandleEntry::File { file, .. }) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|_| StatusCode::Failure)?;

        let mut data = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < data.len() {
            let read = file.read(&mut data[filled..]).await.map_err(|_| StatusCode::Failure)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(filled);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let Some(HandleEntry::File { file, .. }) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|_| StatusCode::Failure)?;
        file.write_all(&data).await.map_err(|_| StatusCode::Failure)?;
        Ok(Self::ok_status(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        self.require(permissions::FILE_READ)?;
        let entries = self.files.list(self.uuid, &path).await.map_err(map_err)?;
        Ok(Handle { id, handle: self.allocate_handle(HandleEntry::Dir { entries, done: false }) })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let Some(HandleEntry::Dir { entries, done }) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };
        if *done {
            return Err(StatusCode::Eof);
        }
        *done = true;
        let files = entries
            .iter()
            .map(|entry| File::new(entry.name.clone(), to_attrs(entry)))
            .collect();
        Ok(Name { id, files })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.require(permissions::FILE_READ)?;
        let entry = self.files.stat(self.uuid, &path).await.map_err(map_err)?;
        Ok(Attrs { id, attrs: to_attrs(&entry) })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.stat(id, path).await
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let Some(HandleEntry::File { logical, .. }) = self.handles.get(&handle) else {
            return Err(StatusCode::Failure);
        };
        let logical = logical.clone();
        let entry = self.files.stat(self.uuid, &logical).await.map_err(map_err)?;
        Ok(Attrs { id, attrs: to_attrs(&entry) })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.require(permissions::FILE_WRITE)?;
        if let Some(perms) = attrs.permissions {
            let mode = format!("{:o}", perms & 0o777);
            self.files.chmod(self.uuid, &path, &mode).await.map_err(map_err)?;
        }
        Ok(Self::ok_status(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.require(permissions::FILE_WRITE)?;
        self.files.create_dir(self.uuid, &path).await.map_err(map_err)?;
        Ok(Self::ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        self.require(permissions::FILE_DELETE)?;
        self.files.delete_recursive(self.uuid, &path).await.map_err(map_err)?;
        Ok(Self::ok_status(id))
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        self.require(permissions::FILE_DELETE)?;
        self.files.delete_recursive(self.uuid, &filename).await.map_err(map_err)?;
        Ok(Self::ok_status(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        self.require(permissions::FILE_WRITE)?;
        self.files.rename(self.uuid, &oldpath, &newpath).await.map_err(map_err)?;
        Ok(Self::ok_status(id))
    }

    /// Always answers with the logical path relative to the chroot; the
    /// real base never leaks.
    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let chroot = self.files.chroot(self.uuid);
        let resolved = chroot.resolve(&path).map_err(map_err)?;
        let logical = chroot.logical(&resolved).map_err(map_err)?;
        Ok(Name { id, files: vec![File::dummy(logical)] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access_with(perms: &[&str]) -> SftpAccess {
        SftpAccess {
            owner: false,
            wildcard_role: false,
            grant: perms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn permission_mapping() {
        let read_only = access_with(&["file.read"]);
        assert!(read_only.allows(permissions::FILE_READ));
        assert!(!read_only.allows(permissions::FILE_WRITE));
        assert!(!read_only.allows(permissions::FILE_DELETE));

        let wildcard_grant = access_with(&["*"]);
        assert!(wildcard_grant.allows(permissions::FILE_DELETE));

        let owner = SftpAccess { owner: true, wildcard_role: false, grant: vec![] };
        assert!(owner.allows(permissions::FILE_WRITE));
        assert!(owner.any());

        let nobody = access_with(&[]);
        assert!(!nobody.any());
    }

    #[tokio::test]
    async fn realpath_answers_chroot_relative() {
        let root = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let files = FileTreeService::new(root.path());
        let mut session = SftpSession::new(files, uuid, access_with(&["file.read"]));

        use russh_sftp::server::Handler as _;
        let name = session.realpath(1, "world/../plugins".to_string()).await.unwrap();
        assert_eq!(name.files[0].filename, "/plugins");

        let err = session.realpath(2, "../../etc".to_string()).await.unwrap_err();
        assert_eq!(err, StatusCode::PermissionDenied);
    }
}
