//! Tokio front end for [`VaultSession`].
//!
//! Every call runs the blocking session method on the blocking thread pool.
//! Streams are not exposed; reads and writes move whole buffers.

use std::io;
use std::sync::Arc;

use tokio::task;

use crate::backend::{RemoteAttributes, RemoteEntry};
use crate::error::{VaultError, VaultOpContext};
use crate::features::CollectingListener;
use crate::session::VaultSession;
use crate::vault::config::VaultOptions;
use crate::vault::crypto_vault::CryptoVault;
use crate::vault::path::RemotePath;

#[derive(Debug, Clone)]
pub struct AsyncVaultSession {
    inner: Arc<VaultSession>,
}

impl AsyncVaultSession {
    pub fn new(session: VaultSession) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn session(&self) -> &Arc<VaultSession> {
        &self.inner
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, VaultError>
    where
        T: Send + 'static,
        F: FnOnce(&VaultSession) -> Result<T, VaultError> + Send + 'static,
    {
        let session = Arc::clone(&self.inner);
        task::spawn_blocking(move || f(&session))
            .await
            .map_err(|e| VaultError::Io {
                source: io::Error::other(e),
                context: VaultOpContext::new().with_operation(operation),
            })?
    }

    pub async fn unlock_vault(
        &self,
        root: RemotePath,
        passphrase: String,
        options: VaultOptions,
    ) -> Result<Arc<CryptoVault>, VaultError> {
        self.run("unlock", move |s| s.unlock_vault(&root, &passphrase, options))
            .await
    }

    pub async fn create_vault(
        &self,
        root: RemotePath,
        passphrase: String,
        options: VaultOptions,
    ) -> Result<Arc<CryptoVault>, VaultError> {
        self.run("create vault", move |s| s.create_vault(&root, &passphrase, options))
            .await
    }

    pub fn lock_vault(&self, root: &RemotePath) -> bool {
        self.inner.lock_vault(root)
    }

    pub async fn read(&self, path: RemotePath) -> Result<Vec<u8>, VaultError> {
        self.run("read", move |s| s.read_to_end(&path)).await
    }

    pub async fn write(&self, path: RemotePath, data: Vec<u8>) -> Result<(), VaultError> {
        self.run("write", move |s| s.write_bytes(&path, &data)).await
    }

    /// Decoded entries plus the ciphertext paths that could not be decoded.
    pub async fn list(
        &self,
        directory: RemotePath,
    ) -> Result<(Vec<RemoteEntry>, Vec<RemotePath>), VaultError> {
        self.run("list", move |s| {
            let mut listener = CollectingListener::default();
            let entries = s.list(&directory, &mut listener)?;
            let unreadable = listener.unreadable.into_iter().map(|(p, _)| p).collect();
            Ok((entries, unreadable))
        })
        .await
    }

    pub async fn delete(&self, path: RemotePath) -> Result<(), VaultError> {
        self.run("delete", move |s| s.delete(std::slice::from_ref(&path), &mut |_| {}))
            .await
    }

    pub async fn rename(&self, source: RemotePath, target: RemotePath) -> Result<(), VaultError> {
        self.run("move", move |s| s.rename(&source, &target)).await
    }

    pub async fn find(&self, path: RemotePath) -> Result<bool, VaultError> {
        self.run("find", move |s| s.find(&path)).await
    }

    pub async fn attributes(&self, path: RemotePath) -> Result<RemoteAttributes, VaultError> {
        self.run("attributes", move |s| s.attributes(&path)).await
    }

    pub async fn mkdir(&self, path: RemotePath) -> Result<(), VaultError> {
        self.run("mkdir", move |s| s.mkdir(&path)).await
    }

    pub async fn touch(&self, path: RemotePath) -> Result<(), VaultError> {
        self.run("touch", move |s| s.touch(&path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_round_trip() {
        let session = AsyncVaultSession::new(VaultSession::new(Arc::new(MemoryBackend::new())));
        let root = RemotePath::new("/vault");
        session
            .create_vault(
                root.clone(),
                "pw".to_string(),
                VaultOptions::default().with_fast_kdf(true),
            )
            .await
            .unwrap();

        let file = root.join("notes.txt");
        session.write(file.clone(), b"async".to_vec()).await.unwrap();
        assert_eq!(session.read(file.clone()).await.unwrap(), b"async");

        let (entries, unreadable) = session.list(root.clone()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(unreadable.is_empty());

        assert!(session.lock_vault(&root));
        let err = session.read(file).await.unwrap_err();
        assert!(matches!(err, VaultError::Locked { .. }));
    }
}
