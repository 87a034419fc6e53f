#![allow(dead_code)]

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use oxcrypt_remote::backend::memory::MemoryBackend;
use oxcrypt_remote::backend::{
    Append, AttributesFeature, BackendError, DeleteFeature, DirectoryFeature, FindFeature,
    ListFeature, MoveFeature, ReadFeature, RemoteAttributes, RemoteEntry, TouchFeature,
    TransferStatus, WriteFeature, WriteStream,
};
use oxcrypt_remote::{RemotePath, VaultOptions, VaultSession};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

pub const TEST_PASSPHRASE: &str = "test-passphrase-12345";

/// Log to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_options() -> VaultOptions {
    VaultOptions::default().with_fast_kdf(true)
}

/// A session over a fresh in-memory backend with an unlocked vault at `/vault`.
pub struct MemoryVault {
    pub backend: Arc<MemoryBackend>,
    pub session: VaultSession,
    pub root: RemotePath,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::with_options(fast_options())
    }

    pub fn with_options(options: VaultOptions) -> Self {
        init_tracing();
        let backend = Arc::new(MemoryBackend::new());
        let session = VaultSession::new(backend.clone());
        let root = RemotePath::new("/vault");
        session
            .create_vault(&root, TEST_PASSPHRASE, options)
            .expect("create vault");
        Self {
            backend,
            session,
            root,
        }
    }

    pub fn path(&self, relative: &str) -> RemotePath {
        relative
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(self.root.clone(), |path, c| path.join(c))
    }

    /// A second session over the same backend, as after a restart.
    pub fn reopen(&self) -> VaultSession {
        let session = VaultSession::new(self.backend.clone());
        session
            .unlock_vault(&self.root, TEST_PASSPHRASE, fast_options())
            .expect("unlock vault");
        session
    }

    /// Backend paths of encrypted file blobs, excluding directory id files.
    pub fn content_blobs(&self) -> Vec<RemotePath> {
        self.backend
            .file_paths()
            .into_iter()
            .filter(|p| {
                let name = p.file_name().unwrap_or_default();
                (name.ends_with(".c9r") && name != "dir.c9r" && name != "dirid.c9r")
                    || name == "contents.c9r"
            })
            .collect()
    }

    /// Storage folder of the vault's root directory.
    pub fn root_storage(&self) -> RemotePath {
        self.backend
            .file_paths()
            .into_iter()
            .filter(|p| p.file_name() == Some("dirid.c9r"))
            .filter_map(|p| p.parent())
            .min_by_key(RemotePath::depth)
            .expect("root storage exists")
    }
}

/// Deterministic pseudo-random content of `size` bytes.
pub fn random_content(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}

/// Memory backend that can be told to fail its Nth delete or every rename.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    deletes: AtomicUsize,
    fail_delete_at: AtomicUsize,
    fail_renames: AtomicBool,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th delete from now on (1-based); 0 disables.
    pub fn fail_delete_at(&self, n: usize) {
        self.deletes.store(0, Ordering::SeqCst);
        self.fail_delete_at.store(n, Ordering::SeqCst);
    }

    pub fn fail_renames(&self, fail: bool) {
        self.fail_renames.store(fail, Ordering::SeqCst);
    }

    /// Deletes seen since the last `fail_delete_at`.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn injected(operation: &str, path: &RemotePath) -> BackendError {
        BackendError::Io {
            source: io::Error::other(format!("injected {operation} failure")),
            path: path.clone(),
        }
    }
}

impl ListFeature for FaultyBackend {
    fn list(&self, directory: &RemotePath) -> Result<Vec<RemoteEntry>, BackendError> {
        self.inner.list(directory)
    }
}

impl ReadFeature for FaultyBackend {
    fn read(&self, file: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, BackendError> {
        self.inner.read(file, offset)
    }
}

impl WriteFeature for FaultyBackend {
    fn write(
        &self,
        file: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, BackendError> {
        self.inner.write(file, status)
    }

    fn append(&self, file: &RemotePath) -> Result<Append, BackendError> {
        self.inner.append(file)
    }

    fn supports_conditional_create(&self) -> bool {
        self.inner.supports_conditional_create()
    }
}

impl DeleteFeature for FaultyBackend {
    fn delete(&self, path: &RemotePath) -> Result<(), BackendError> {
        let n = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_delete_at.load(Ordering::SeqCst) {
            return Err(Self::injected("delete", path));
        }
        self.inner.delete(path)
    }
}

impl MoveFeature for FaultyBackend {
    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), BackendError> {
        if self.fail_renames.load(Ordering::SeqCst) {
            return Err(Self::injected("rename", source));
        }
        self.inner.rename(source, target)
    }
}

impl DirectoryFeature for FaultyBackend {
    fn mkdir(&self, directory: &RemotePath) -> Result<(), BackendError> {
        self.inner.mkdir(directory)
    }
}

impl TouchFeature for FaultyBackend {
    fn touch(&self, file: &RemotePath) -> Result<(), BackendError> {
        self.inner.touch(file)
    }
}

impl FindFeature for FaultyBackend {
    fn find(&self, path: &RemotePath) -> Result<bool, BackendError> {
        self.inner.find(path)
    }
}

impl AttributesFeature for FaultyBackend {
    fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, BackendError> {
        self.inner.attributes(path)
    }
}

/// A session with an unlocked vault at `/vault` over a [`FaultyBackend`].
pub fn faulty_vault() -> (Arc<FaultyBackend>, VaultSession, RemotePath) {
    init_tracing();
    let backend = Arc::new(FaultyBackend::new());
    let session = VaultSession::new(backend.clone());
    let root = RemotePath::new("/vault");
    session
        .create_vault(&root, TEST_PASSPHRASE, fast_options())
        .expect("create vault");
    (backend, session, root)
}
