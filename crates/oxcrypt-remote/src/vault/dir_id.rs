//! Directory id persistence and caching.
//!
//! A directory's id lives in `dir.c9r` inside its entry in the parent's
//! storage directory. Ids never change once written, so they are cached by
//! the ciphertext path of that file until the directory is deleted or moved.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use dashmap::DashMap;
use tracing::{debug, instrument, trace, warn};

use crate::backend::{Backend, BackendError, TransferStatus, read_all, write_all};
use crate::error::{VaultError, VaultOpContext};
use crate::vault::path::{DirId, RemotePath};

/// Name of the file holding a directory's id inside its entry.
pub const DIR_ID_FILE: &str = "dir.c9r";

/// Longest id accepted from the backend; uuid strings are 36 bytes.
pub const MAX_DIR_ID_LENGTH: usize = 36;

type Slot = Arc<Mutex<Option<DirId>>>;

/// Per-vault cache of directory ids, keyed by `dir.c9r` ciphertext path.
///
/// Each key has its own slot lock, held across the backend round trip, so
/// two threads resolving the same new directory agree on one id.
#[derive(Debug, Default)]
pub struct DirectoryIdStore {
    slots: DashMap<RemotePath, Slot>,
}

impl DirectoryIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id_file: &RemotePath) -> Slot {
        self.slots.entry(id_file.clone()).or_default().clone()
    }

    /// Cached id for `id_file`, without touching the backend.
    pub fn cached(&self, id_file: &RemotePath) -> Option<DirId> {
        let slot = self.slots.get(id_file)?.clone();
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Forget the slot for `id_file` after a failed read, unless another
    /// caller holds it or it has been filled meanwhile.
    fn release_empty(&self, id_file: &RemotePath) {
        let released = self.slots.remove_if(id_file, |_, slot| match slot.try_lock() {
            Ok(guard) => guard.is_none(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_none(),
            Err(TryLockError::WouldBlock) => false,
        });
        if released.is_some() {
            trace!(id_file = %id_file, "Released empty directory id slot");
        }
    }

    /// Read an existing id. A missing `dir.c9r` is [`VaultError::NotFound`].
    #[instrument(level = "trace", skip(self, backend), fields(id_file = %id_file))]
    pub fn load(&self, backend: &dyn Backend, id_file: &RemotePath) -> Result<DirId, VaultError> {
        let slot = self.slot(id_file);
        let result = {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.clone() {
                Some(id) => {
                    trace!("Directory id cache hit");
                    Ok(id)
                }
                None => read_dir_id(backend, id_file).inspect(|id| *guard = Some(id.clone())),
            }
        };
        if result.is_err() {
            self.release_empty(id_file);
        }
        result
    }

    /// Read the id, or create and persist a fresh one if none exists.
    ///
    /// Returns the id and whether this call wrote it. When the backend
    /// supports conditional create, losing a race means adopting the
    /// winner's id. Otherwise the id is written unconditionally and read
    /// back, so concurrent creators from different processes converge on
    /// whichever write landed last.
    #[instrument(level = "debug", skip(self, backend), fields(id_file = %id_file))]
    pub fn load_or_create(
        &self,
        backend: &dyn Backend,
        id_file: &RemotePath,
    ) -> Result<(DirId, bool), VaultError> {
        let slot = self.slot(id_file);
        let result = {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.clone() {
                Some(id) => Ok((id, false)),
                None => read_or_create(backend, id_file).inspect(|(id, _)| *guard = Some(id.clone())),
            }
        };
        if result.is_err() {
            self.release_empty(id_file);
        }
        result
    }

    /// Remember an id already known to be on the backend.
    pub fn insert(&self, id_file: &RemotePath, id: DirId) {
        let slot = self.slot(id_file);
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    /// Drop the entry for a deleted or moved directory.
    pub fn invalidate(&self, id_file: &RemotePath) {
        if self.slots.remove(id_file).is_some() {
            trace!(id_file = %id_file, "Invalidated directory id");
        }
    }

    /// Drop every entry at or below `prefix`.
    pub fn invalidate_prefix(&self, prefix: &RemotePath) {
        self.slots.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Memory and local backends surface a lost create race either at open
/// time or when the stream is committed.
fn is_create_conflict(err: &BackendError) -> bool {
    match err {
        BackendError::AlreadyExists { .. } => true,
        BackendError::Io { source, .. } => source.kind() == std::io::ErrorKind::AlreadyExists,
        _ => false,
    }
}

fn read_or_create(backend: &dyn Backend, id_file: &RemotePath) -> Result<(DirId, bool), VaultError> {
    match read_dir_id(backend, id_file) {
        Ok(id) => return Ok((id, false)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let fresh = DirId::generate();
    let (id, created) = if backend.supports_conditional_create() {
        let status = TransferStatus::new().exclusive();
        match write_all(backend, id_file, fresh.as_bytes(), &status) {
            Ok(()) => (fresh, true),
            Err(e) if is_create_conflict(&e) => {
                warn!("Lost directory id creation race, adopting existing id");
                (read_dir_id(backend, id_file)?, false)
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        write_all(backend, id_file, fresh.as_bytes(), &TransferStatus::new())?;
        let stored = read_dir_id(backend, id_file)?;
        if stored != fresh {
            warn!("Directory id overwritten by a concurrent writer, adopting it");
        }
        let created = stored == fresh;
        (stored, created)
    };

    debug!(dir_id = %id, created, "Directory id resolved");
    Ok((id, created))
}

fn read_dir_id(backend: &dyn Backend, id_file: &RemotePath) -> Result<DirId, VaultError> {
    let context = || {
        VaultOpContext::new()
            .with_operation("read directory id")
            .with_encrypted_path(id_file)
    };
    let bytes = match read_all(backend, id_file) {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Err(VaultError::not_found(context())),
        Err(e) => return Err(e.into()),
    };
    parse_dir_id(bytes).map_err(|reason| VaultError::InvalidDirectoryId {
        reason,
        context: context(),
    })
}

/// Validate raw `dir.c9r` content.
pub fn parse_dir_id(bytes: Vec<u8>) -> Result<DirId, String> {
    if bytes.is_empty() {
        return Err("empty directory id".to_string());
    }
    if bytes.len() > MAX_DIR_ID_LENGTH {
        return Err(format!(
            "directory id is {} bytes, at most {MAX_DIR_ID_LENGTH} allowed",
            bytes.len()
        ));
    }
    String::from_utf8(bytes)
        .map(DirId::from_raw)
        .map_err(|e| format!("directory id is not UTF-8: {e}"))
}
