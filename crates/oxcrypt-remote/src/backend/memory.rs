//! In-memory object store.
//!
//! Directories exist implicitly whenever something lives beneath them, the
//! way most object stores behave, and can also be created explicitly with
//! `mkdir`. Every trait call bumps a counter so tests can assert that an
//! operation never reached the backend.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use tracing::trace;

use super::{
    Append, AttributesFeature, BackendError, DeleteFeature, DirectoryFeature,
    FindFeature, ListFeature, MoveFeature, ReadFeature, RemoteAttributes, RemoteEntry,
    TouchFeature, TransferStatus, WriteFeature, WriteStream,
};
use crate::vault::path::RemotePath;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    created: SystemTime,
    modified: SystemTime,
}

impl StoredObject {
    fn new(data: Vec<u8>) -> Self {
        let now = SystemTime::now();
        Self {
            data: Arc::new(data),
            created: now,
            modified: now,
        }
    }

    fn attributes(&self) -> RemoteAttributes {
        RemoteAttributes::file(self.data.len() as u64)
            .with_created(Some(self.created))
            .with_modified(Some(self.modified))
    }
}

#[derive(Debug, Default)]
struct Store {
    files: BTreeMap<RemotePath, StoredObject>,
    dirs: BTreeSet<RemotePath>,
}

impl Store {
    fn is_dir(&self, path: &RemotePath) -> bool {
        path.is_root()
            || self.dirs.contains(path)
            || self.dirs.iter().any(|d| d != path && d.starts_with(path))
            || self.files.keys().any(|f| f != path && f.starts_with(path))
    }

    fn exists(&self, path: &RemotePath) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    fn has_children(&self, path: &RemotePath) -> bool {
        self.dirs.iter().any(|d| d != path && d.starts_with(path))
            || self.files.keys().any(|f| f != path && f.starts_with(path))
    }
}

#[derive(Debug)]
struct Shared {
    store: RwLock<Store>,
    calls: AtomicU64,
    conditional_create: bool,
}

/// Object store held entirely in memory.
///
/// Cloning shares the same contents.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(Store::default()),
                calls: AtomicU64::new(0),
                conditional_create: true,
            }),
        }
    }

    /// A store whose writes ignore `create_new`, like a backend with plain
    /// PUT semantics.
    pub fn without_conditional_create() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(Store::default()),
                calls: AtomicU64::new(0),
                conditional_create: false,
            }),
        }
    }

    /// Number of trait calls served so far.
    pub fn call_count(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) {
        self.shared.calls.store(0, Ordering::SeqCst);
    }

    /// Raw stored bytes, bypassing the counter.
    pub fn raw_bytes(&self, path: &RemotePath) -> Option<Vec<u8>> {
        self.read_store()
            .ok()?
            .files
            .get(path)
            .map(|o| o.data.as_ref().clone())
    }

    /// Overwrite an object's bytes directly, bypassing the counter.
    pub fn put_raw(&self, path: &RemotePath, data: Vec<u8>) -> Result<(), BackendError> {
        self.write_store()?
            .files
            .insert(path.clone(), StoredObject::new(data));
        Ok(())
    }

    /// Every stored file path, in order.
    pub fn file_paths(&self) -> Vec<RemotePath> {
        self.read_store()
            .map(|s| s.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn count(&self) {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, Store>, BackendError> {
        self.shared
            .store
            .read()
            .map_err(|_| BackendError::other("memory store lock poisoned"))
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, Store>, BackendError> {
        self.shared
            .store
            .write()
            .map_err(|_| BackendError::other("memory store lock poisoned"))
    }
}

impl ListFeature for MemoryBackend {
    fn list(&self, directory: &RemotePath) -> Result<Vec<RemoteEntry>, BackendError> {
        self.count();
        let store = self.read_store()?;
        if !store.is_dir(directory) {
            return Err(BackendError::NotFound {
                path: directory.clone(),
            });
        }

        let mut children: BTreeMap<String, RemoteAttributes> = BTreeMap::new();
        for (path, object) in &store.files {
            let Some(rest) = path.strip_prefix(directory) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            if components.next().is_some() {
                children
                    .entry(first.to_string())
                    .or_insert_with(RemoteAttributes::directory);
            } else {
                children.insert(first.to_string(), object.attributes());
            }
        }
        for dir in &store.dirs {
            let Some(rest) = dir.strip_prefix(directory) else {
                continue;
            };
            if let Some(first) = rest.components().next() {
                children
                    .entry(first.to_string())
                    .or_insert_with(RemoteAttributes::directory);
            }
        }

        trace!(directory = %directory, count = children.len(), "Listed memory directory");
        Ok(children
            .into_iter()
            .map(|(name, attributes)| RemoteEntry { name, attributes })
            .collect())
    }
}

impl ReadFeature for MemoryBackend {
    fn read(&self, file: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, BackendError> {
        self.count();
        let store = self.read_store()?;
        let object = store
            .files
            .get(file)
            .ok_or_else(|| BackendError::NotFound { path: file.clone() })?;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(object.data.len());
        Ok(Box::new(Cursor::new(object.data[start..].to_vec())))
    }
}

impl WriteFeature for MemoryBackend {
    fn write(
        &self,
        file: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, BackendError> {
        self.count();
        let create_new = status.create_new && self.shared.conditional_create;
        {
            let store = self.read_store()?;
            if store.is_dir(file) {
                return Err(BackendError::AlreadyExists { path: file.clone() });
            }
            if create_new && store.files.contains_key(file) {
                return Err(BackendError::AlreadyExists { path: file.clone() });
            }
            if status.offset > 0 {
                let existing = store
                    .files
                    .get(file)
                    .ok_or_else(|| BackendError::NotFound { path: file.clone() })?;
                if (existing.data.len() as u64) < status.offset {
                    return Err(BackendError::other(format!(
                        "cannot resume {file} at offset {}: only {} bytes stored",
                        status.offset,
                        existing.data.len()
                    )));
                }
            }
        }
        Ok(Box::new(MemoryWriteStream {
            backend: self.clone(),
            path: file.clone(),
            offset: status.offset,
            create_new,
            buffer: Vec::new(),
        }))
    }

    fn append(&self, file: &RemotePath) -> Result<Append, BackendError> {
        self.count();
        let store = self.read_store()?;
        store
            .files
            .get(file)
            .map(|o| Append {
                size: o.data.len() as u64,
            })
            .ok_or_else(|| BackendError::NotFound { path: file.clone() })
    }

    fn supports_conditional_create(&self) -> bool {
        self.shared.conditional_create
    }
}

/// Buffers the upload and swaps it in atomically on `finish`.
struct MemoryWriteStream {
    backend: MemoryBackend,
    path: RemotePath,
    offset: u64,
    create_new: bool,
    buffer: Vec<u8>,
}

impl Write for MemoryWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for MemoryWriteStream {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        let mut store = this
            .backend
            .shared
            .store
            .write()
            .map_err(|_| io::Error::other("memory store lock poisoned"))?;

        if this.create_new && store.files.contains_key(&this.path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", this.path),
            ));
        }

        let (data, created) = if this.offset > 0 {
            let existing = store.files.get(&this.path).ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} vanished", this.path))
            })?;
            let keep = usize::try_from(this.offset)
                .map_err(io::Error::other)?
                .min(existing.data.len());
            let mut data = existing.data[..keep].to_vec();
            data.extend_from_slice(&this.buffer);
            (data, existing.created)
        } else {
            (this.buffer, SystemTime::now())
        };

        let mut object = StoredObject::new(data);
        object.created = created;
        trace!(path = %this.path, size = object.data.len(), "Committed memory object");
        store.files.insert(this.path, object);
        Ok(())
    }
}

impl DeleteFeature for MemoryBackend {
    fn delete(&self, path: &RemotePath) -> Result<(), BackendError> {
        self.count();
        let mut store = self.write_store()?;
        if store.files.remove(path).is_some() {
            return Ok(());
        }
        if path.is_root() || !store.is_dir(path) {
            return Err(BackendError::NotFound { path: path.clone() });
        }
        if store.has_children(path) {
            return Err(BackendError::DirectoryNotEmpty { path: path.clone() });
        }
        store.dirs.remove(path);
        Ok(())
    }
}

impl MoveFeature for MemoryBackend {
    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), BackendError> {
        self.count();
        let mut store = self.write_store()?;
        if store.exists(target) {
            return Err(BackendError::AlreadyExists {
                path: target.clone(),
            });
        }

        if let Some(mut object) = store.files.remove(source) {
            object.modified = SystemTime::now();
            store.files.insert(target.clone(), object);
            return Ok(());
        }
        if source.is_root() || !store.is_dir(source) {
            return Err(BackendError::NotFound {
                path: source.clone(),
            });
        }

        let moved_files: Vec<RemotePath> = store
            .files
            .keys()
            .filter(|p| p.starts_with(source))
            .cloned()
            .collect();
        for old in moved_files {
            if let (Some(object), Some(rest)) = (store.files.remove(&old), old.strip_prefix(source))
            {
                store.files.insert(target.join(rest.as_str()), object);
            }
        }
        let moved_dirs: Vec<RemotePath> = store
            .dirs
            .iter()
            .filter(|p| p.starts_with(source))
            .cloned()
            .collect();
        for old in moved_dirs {
            store.dirs.remove(&old);
            if let Some(rest) = old.strip_prefix(source) {
                store.dirs.insert(target.join(rest.as_str()));
            }
        }
        Ok(())
    }
}

impl DirectoryFeature for MemoryBackend {
    fn mkdir(&self, directory: &RemotePath) -> Result<(), BackendError> {
        self.count();
        let mut store = self.write_store()?;
        if store.exists(directory) {
            return Err(BackendError::AlreadyExists {
                path: directory.clone(),
            });
        }
        store.dirs.insert(directory.clone());
        Ok(())
    }
}

impl TouchFeature for MemoryBackend {
    fn touch(&self, file: &RemotePath) -> Result<(), BackendError> {
        self.count();
        let mut store = self.write_store()?;
        if store.is_dir(file) {
            return Err(BackendError::AlreadyExists { path: file.clone() });
        }
        match store.files.get_mut(file) {
            Some(object) => object.modified = SystemTime::now(),
            None => {
                store.files.insert(file.clone(), StoredObject::new(Vec::new()));
            }
        }
        Ok(())
    }
}

impl FindFeature for MemoryBackend {
    fn find(&self, path: &RemotePath) -> Result<bool, BackendError> {
        self.count();
        Ok(self.read_store()?.exists(path))
    }
}

impl AttributesFeature for MemoryBackend {
    fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, BackendError> {
        self.count();
        let store = self.read_store()?;
        if let Some(object) = store.files.get(path) {
            return Ok(object.attributes());
        }
        if store.is_dir(path) {
            return Ok(RemoteAttributes::directory());
        }
        Err(BackendError::NotFound { path: path.clone() })
    }
}
