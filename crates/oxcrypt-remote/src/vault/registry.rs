//! Mounted vaults, keyed by plaintext root.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::vault::crypto_vault::CryptoVault;
use crate::vault::path::RemotePath;

/// Which vault, if any, governs a plaintext path.
///
/// Lookups check the path and then each ancestor, so when one vault's root
/// lies inside another's the inner vault masks the outer one below its root.
#[derive(Debug, Default)]
pub struct VaultRegistry {
    vaults: RwLock<BTreeMap<RemotePath, Arc<CryptoVault>>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vault, returning the one it replaces at the same root.
    pub fn add(&self, vault: Arc<CryptoVault>) -> Option<Arc<CryptoVault>> {
        let root = vault.root().clone();
        debug!(root = %root, "Registering vault");
        self.vaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root, vault)
    }

    /// Unregister and lock the vault at `root`.
    pub fn remove(&self, root: &RemotePath) -> Option<Arc<CryptoVault>> {
        let removed = self
            .vaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(root);
        if let Some(vault) = &removed {
            vault.lock();
            debug!(root = %root, "Unregistered vault");
        }
        removed
    }

    pub fn get(&self, root: &RemotePath) -> Option<Arc<CryptoVault>> {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root)
            .cloned()
    }

    /// The innermost vault containing `path`, with `path` relative to its root.
    pub fn find(&self, path: &RemotePath) -> Option<(Arc<CryptoVault>, RemotePath)> {
        let vaults = self.vaults.read().unwrap_or_else(PoisonError::into_inner);
        if vaults.is_empty() {
            return None;
        }
        let mut candidate = Some(path.clone());
        while let Some(root) = candidate {
            if let Some(vault) = vaults.get(&root) {
                let relative = path.strip_prefix(&root)?;
                trace!(path = %path, root = %root, "Path governed by vault");
                return Some((Arc::clone(vault), relative));
            }
            candidate = root.parent();
        }
        None
    }

    pub fn roots(&self) -> Vec<RemotePath> {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Lock every registered vault; registrations are kept.
    pub fn lock_all(&self) {
        for vault in self
            .vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            vault.lock();
        }
    }

    pub fn len(&self) -> usize {
        self.vaults.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
