//! Plaintext view of a backend with vaults mounted on it.
//!
//! [`VaultSession`] builds every feature decorator once, against one backend
//! and one registry, and exposes them on plaintext paths. It also implements
//! the backend capability traits itself, so code written against
//! `dyn Backend` works unchanged with vaults in effect.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use tracing::instrument;

use crate::backend::{
    Append, AttributesFeature, Backend, BackendError, DeleteFeature, DirectoryFeature,
    FindFeature, ListFeature, MoveFeature, ReadFeature, RemoteAttributes, RemoteEntry,
    TouchFeature, TransferStatus, WriteFeature, WriteStream,
};
use crate::error::VaultError;
use crate::features::{
    CryptoAttributesFeature, CryptoDeleteFeature, CryptoDirectoryFeature, CryptoFindFeature,
    CryptoListFeature, CryptoMoveFeature, CryptoReadFeature, CryptoTouchFeature,
    CryptoWriteFeature, ListListener,
};
use crate::vault::config::VaultOptions;
use crate::vault::crypto_vault::CryptoVault;
use crate::vault::path::RemotePath;
use crate::vault::registry::VaultRegistry;

pub struct VaultSession {
    backend: Arc<dyn Backend>,
    registry: Arc<VaultRegistry>,
    read: CryptoReadFeature,
    write: CryptoWriteFeature,
    list: CryptoListFeature,
    delete: CryptoDeleteFeature,
    rename: CryptoMoveFeature,
    find: CryptoFindFeature,
    attributes: CryptoAttributesFeature,
    touch: CryptoTouchFeature,
    directory: CryptoDirectoryFeature,
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("vaults", &self.registry.roots())
            .finish_non_exhaustive()
    }
}

impl VaultSession {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_registry(backend, Arc::new(VaultRegistry::new()))
    }

    /// Share a registry between sessions over the same backend.
    pub fn with_registry(backend: Arc<dyn Backend>, registry: Arc<VaultRegistry>) -> Self {
        let b = || Arc::clone(&backend);
        let r = || Arc::clone(&registry);
        Self {
            read: CryptoReadFeature::new(b(), r()),
            write: CryptoWriteFeature::new(b(), r()),
            list: CryptoListFeature::new(b(), r()),
            delete: CryptoDeleteFeature::new(b(), r()),
            rename: CryptoMoveFeature::new(b(), r()),
            find: CryptoFindFeature::new(b(), r()),
            attributes: CryptoAttributesFeature::new(b(), r()),
            touch: CryptoTouchFeature::new(b(), r()),
            directory: CryptoDirectoryFeature::new(b(), r()),
            backend,
            registry,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<VaultRegistry> {
        &self.registry
    }

    /// Create a vault at `root` and mount it unlocked.
    #[instrument(level = "debug", skip(self, passphrase, options), fields(root = %root))]
    pub fn create_vault(
        &self,
        root: &RemotePath,
        passphrase: &str,
        options: VaultOptions,
    ) -> Result<Arc<CryptoVault>, VaultError> {
        let vault = Arc::new(CryptoVault::create(
            &*self.backend,
            root.clone(),
            passphrase,
            options,
        )?);
        self.registry.add(Arc::clone(&vault));
        Ok(vault)
    }

    /// Mount the vault at `root` and unlock it.
    ///
    /// The vault stays mounted even if unlocking fails, so paths below its
    /// root keep failing as locked instead of exposing ciphertext.
    #[instrument(level = "debug", skip(self, passphrase, options), fields(root = %root))]
    pub fn unlock_vault(
        &self,
        root: &RemotePath,
        passphrase: &str,
        options: VaultOptions,
    ) -> Result<Arc<CryptoVault>, VaultError> {
        let vault = match self.registry.get(root) {
            Some(vault) => vault,
            None => {
                let vault = Arc::new(CryptoVault::open(root.clone(), options));
                self.registry.add(Arc::clone(&vault));
                vault
            }
        };
        vault.unlock(&*self.backend, passphrase)?;
        Ok(vault)
    }

    /// Lock the vault at `root`, keeping it mounted. Returns whether one was found.
    pub fn lock_vault(&self, root: &RemotePath) -> bool {
        match self.registry.get(root) {
            Some(vault) => {
                vault.lock();
                true
            }
            None => false,
        }
    }

    /// Unmount and lock the vault at `root`.
    pub fn unmount_vault(&self, root: &RemotePath) -> Option<Arc<CryptoVault>> {
        self.registry.remove(root)
    }

    /// Lock every mounted vault.
    pub fn close(&self) {
        self.registry.lock_all();
    }

    pub fn read(&self, path: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, VaultError> {
        self.read.read(path, offset)
    }

    pub fn read_to_end(&self, path: &RemotePath) -> Result<Vec<u8>, VaultError> {
        self.read.read_to_end(path)
    }

    pub fn write(
        &self,
        path: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, VaultError> {
        self.write.write(path, status)
    }

    /// Write a whole buffer and commit it.
    pub fn write_bytes(&self, path: &RemotePath, data: &[u8]) -> Result<(), VaultError> {
        let status = TransferStatus::new().with_length(data.len() as u64);
        let mut stream = self.write.write(path, &status)?;
        stream.write_all(data).map_err(VaultError::from_io)?;
        stream.finish().map_err(VaultError::from_io)
    }

    pub fn append(&self, path: &RemotePath) -> Result<Append, VaultError> {
        self.write.append(path)
    }

    pub fn checksum(
        &self,
        path: &RemotePath,
        reader: &mut dyn Read,
        status: &TransferStatus,
    ) -> Result<String, VaultError> {
        self.write.checksum(path, reader, status)
    }

    pub fn list(
        &self,
        directory: &RemotePath,
        listener: &mut dyn ListListener,
    ) -> Result<Vec<RemoteEntry>, VaultError> {
        self.list.list(directory, listener)
    }

    pub fn delete(
        &self,
        paths: &[RemotePath],
        deleted: &mut dyn FnMut(&RemotePath),
    ) -> Result<(), VaultError> {
        self.delete.delete(paths, deleted)
    }

    pub fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), VaultError> {
        self.rename.rename(source, target)
    }

    pub fn find(&self, path: &RemotePath) -> Result<bool, VaultError> {
        self.find.find(path)
    }

    pub fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, VaultError> {
        self.attributes.attributes(path)
    }

    pub fn touch(&self, path: &RemotePath) -> Result<(), VaultError> {
        self.touch.touch(path)
    }

    pub fn mkdir(&self, path: &RemotePath) -> Result<(), VaultError> {
        self.directory.mkdir(path)
    }
}

impl ListFeature for VaultSession {
    fn list(&self, directory: &RemotePath) -> Result<Vec<RemoteEntry>, BackendError> {
        Ok(self.list.list(directory, &mut ())?)
    }
}

impl ReadFeature for VaultSession {
    fn read(&self, file: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, BackendError> {
        Ok(self.read.read(file, offset)?)
    }
}

impl WriteFeature for VaultSession {
    fn write(
        &self,
        file: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, BackendError> {
        Ok(self.write.write(file, status)?)
    }

    fn append(&self, file: &RemotePath) -> Result<Append, BackendError> {
        Ok(self.write.append(file)?)
    }

    fn supports_conditional_create(&self) -> bool {
        self.backend.supports_conditional_create()
    }
}

impl DeleteFeature for VaultSession {
    fn delete(&self, path: &RemotePath) -> Result<(), BackendError> {
        Ok(self.delete.delete(std::slice::from_ref(path), &mut |_| {})?)
    }
}

impl MoveFeature for VaultSession {
    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), BackendError> {
        Ok(self.rename.rename(source, target)?)
    }
}

impl DirectoryFeature for VaultSession {
    fn mkdir(&self, directory: &RemotePath) -> Result<(), BackendError> {
        Ok(self.directory.mkdir(directory)?)
    }
}

impl TouchFeature for VaultSession {
    fn touch(&self, file: &RemotePath) -> Result<(), BackendError> {
        Ok(self.touch.touch(file)?)
    }
}

impl FindFeature for VaultSession {
    fn find(&self, path: &RemotePath) -> Result<bool, BackendError> {
        Ok(self.find.find(path)?)
    }
}

impl AttributesFeature for VaultSession {
    fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, BackendError> {
        Ok(self.attributes.attributes(path)?)
    }
}
