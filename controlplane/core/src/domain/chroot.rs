// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Chroot base resolution and traversal prevention.
//!
//! Every file operation, whether it enters over HTTP or SFTP, is scoped to
//! `join(server_data_root, workload.uuid)`. Caller-supplied paths are
//! normalized lexically (backslashes folded, empty segments dropped, `.`
//! skipped, `..` popped) and the result must stay at or under the base.

use crate::domain::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChrootBase {
    base: PathBuf,
}

impl ChrootBase {
    pub fn new(data_root: &Path, uuid: Uuid) -> Self {
        Self { base: data_root.join(uuid.to_string()) }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create the base directory on demand.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base).await
    }

    /// Resolve a caller-supplied path against the base.
    ///
    /// Backslashes are folded to forward slashes, the path is split on `/`
    /// with empty segments removed, re-joined and resolved against the base.
    /// A result that is neither the base itself nor strictly under it fails
    /// with `PathTraversal`.
    pub fn resolve(&self, raw: &str) -> CoreResult<PathBuf> {
        let cleaned = raw.replace('\\', "/");
        let mut stack: Vec<&str> = Vec::new();
        for segment in cleaned.split('/').filter(|s| !s.is_empty()) {
            match segment {
                "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        tracing::warn!(path = %raw, "path traversal attempt rejected");
                        return Err(CoreError::PathTraversal(raw.to_string()));
                    }
                }
                part => stack.push(part),
            }
        }

        let mut resolved = self.base.clone();
        for part in &stack {
            resolved.push(part);
        }

        // The stack construction cannot escape, but the contract is the
        // prefix check, so enforce it explicitly.
        if resolved != self.base && !resolved.starts_with(&self.base) {
            tracing::warn!(path = %raw, "resolved path escaped chroot base");
            return Err(CoreError::PathTraversal(raw.to_string()));
        }
        Ok(resolved)
    }

    /// The logical (chroot-relative) form of an absolute path under the
    /// base, always `/`-prefixed. Used by REALPATH so the real base never
    /// leaks.
    pub fn logical(&self, absolute: &Path) -> CoreResult<String> {
        let rel = absolute
            .strip_prefix(&self.base)
            .map_err(|_| CoreError::PathTraversal(absolute.display().to_string()))?;
        let rel = rel.to_string_lossy();
        if rel.is_empty() {
            Ok("/".to_string())
        } else {
            Ok(format!("/{rel}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> (ChrootBase, Uuid) {
        let uuid = Uuid::new_v4();
        (ChrootBase::new(Path::new("/srv/catalyst"), uuid), uuid)
    }

    #[test]
    fn plain_paths_resolve_under_base() {
        let (c, uuid) = base();
        assert_eq!(
            c.resolve("world/level.dat").unwrap(),
            PathBuf::from(format!("/srv/catalyst/{uuid}/world/level.dat"))
        );
        assert_eq!(c.resolve("/").unwrap(), *c.base());
        assert_eq!(c.resolve("").unwrap(), *c.base());
    }

    #[test]
    fn backslashes_and_empty_segments_normalize() {
        let (c, uuid) = base();
        assert_eq!(
            c.resolve("plugins\\config.yml").unwrap(),
            PathBuf::from(format!("/srv/catalyst/{uuid}/plugins/config.yml"))
        );
        assert_eq!(
            c.resolve("//a///b/./c").unwrap(),
            PathBuf::from(format!("/srv/catalyst/{uuid}/a/b/c"))
        );
    }

    #[test]
    fn dotdot_inside_tree_is_lexical() {
        let (c, uuid) = base();
        assert_eq!(
            c.resolve("a/b/../c").unwrap(),
            PathBuf::from(format!("/srv/catalyst/{uuid}/a/c"))
        );
    }

    #[test]
    fn escape_attempts_fail() {
        let (c, _) = base();
        for p in ["../../etc/passwd", "..", "a/../../b", "..\\..\\etc\\passwd"] {
            assert!(
                matches!(c.resolve(p), Err(CoreError::PathTraversal(_))),
                "{p} should be rejected"
            );
        }
    }

    #[test]
    fn logical_paths_never_leak_the_base() {
        let (c, _) = base();
        let abs = c.resolve("world/region").unwrap();
        assert_eq!(c.logical(&abs).unwrap(), "/world/region");
        assert_eq!(c.logical(c.base()).unwrap(), "/");
        assert!(c.logical(Path::new("/etc")).is_err());
    }
}
