// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persisted SSH host key: one RSA key per control-plane instance,
//! generated on first start.

use anyhow::{Context, Result};
use russh::keys::key::{KeyPair, SignatureHash};
use std::path::Path;

const RSA_BITS: usize = 2048;

pub fn load_or_generate(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        return russh::keys::load_secret_key(path, None)
            .map_err(anyhow::Error::from)
            .with_context(|| format!("loading host key from {}", path.display()));
    }

    tracing::info!(path = %path.display(), "generating new {}-bit RSA host key", RSA_BITS);
    let key = KeyPair::generate_rsa(RSA_BITS, SignatureHash::SHA2_256)
        .context("generating host key")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut pem = Vec::new();
    russh::keys::encode_pkcs8_pem(&key, &mut pem).context("encoding host key")?;
    std::fs::write(path, &pem)
        .with_context(|| format!("writing host key to {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_once_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/host_key");

        let first = load_or_generate(&path).unwrap();
        assert!(path.exists());

        let second = load_or_generate(&path).unwrap();
        assert_eq!(
            first.clone_public_key().unwrap().fingerprint(),
            second.clone_public_key().unwrap().fingerprint()
        );
    }
}
