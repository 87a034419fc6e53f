//! Backend over a local directory tree.
//!
//! Uploads go to a temporary file beside the target and are renamed into
//! place on `finish`, so a cancelled upload never leaves a partial object.
//! `create_new` uses a no-clobber persist and is therefore atomic.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::{
    Append, AttributesFeature, BackendError, DeleteFeature, DirectoryFeature, FindFeature,
    ListFeature, MoveFeature, ReadFeature, RemoteAttributes, RemoteEntry, TouchFeature,
    TransferStatus, WriteFeature, WriteStream,
};
use crate::vault::path::RemotePath;

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Serve the tree under `root`, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened local backend");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a backend path. Resolution is purely lexical;
    /// `RemotePath` never carries `..`, so the result stays below `root`.
    pub fn resolve(&self, path: &RemotePath) -> PathBuf {
        path.as_relative_path().to_logical_path(&self.root)
    }

    fn ensure_parent(&self, path: &RemotePath) -> Result<PathBuf, BackendError> {
        let local = self.resolve(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| BackendError::from_io(e, path))?;
        }
        Ok(local)
    }
}

fn attributes_of(metadata: &fs::Metadata) -> RemoteAttributes {
    let base = if metadata.is_dir() {
        RemoteAttributes::directory()
    } else {
        RemoteAttributes::file(metadata.len())
    };
    base.with_modified(metadata.modified().ok())
        .with_created(metadata.created().ok())
}

impl ListFeature for LocalBackend {
    fn list(&self, directory: &RemotePath) -> Result<Vec<RemoteEntry>, BackendError> {
        let local = self.resolve(directory);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&local).map_err(|e| BackendError::from_io(e, directory))? {
            let entry = entry.map_err(|e| BackendError::from_io(e, directory))?;
            let Ok(name) = entry.file_name().into_string() else {
                trace!(directory = %directory, "Skipping non-UTF-8 entry");
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| BackendError::from_io(e, &directory.join(&name)))?;
            entries.push(RemoteEntry {
                name,
                attributes: attributes_of(&metadata),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl ReadFeature for LocalBackend {
    fn read(&self, file: &RemotePath, offset: u64) -> Result<Box<dyn Read + Send>, BackendError> {
        let mut handle = File::open(self.resolve(file)).map_err(|e| BackendError::from_io(e, file))?;
        if offset > 0 {
            handle
                .seek(SeekFrom::Start(offset))
                .map_err(|e| BackendError::from_io(e, file))?;
        }
        Ok(Box::new(handle))
    }
}

impl WriteFeature for LocalBackend {
    fn write(
        &self,
        file: &RemotePath,
        status: &TransferStatus,
    ) -> Result<Box<dyn WriteStream>, BackendError> {
        let local = self.ensure_parent(file)?;
        if local.is_dir() {
            return Err(BackendError::AlreadyExists { path: file.clone() });
        }

        if status.offset > 0 {
            let mut handle = OpenOptions::new()
                .write(true)
                .open(&local)
                .map_err(|e| BackendError::from_io(e, file))?;
            let len = handle
                .metadata()
                .map_err(|e| BackendError::from_io(e, file))?
                .len();
            if len < status.offset {
                return Err(BackendError::other(format!(
                    "cannot resume {file} at offset {}: only {len} bytes stored",
                    status.offset
                )));
            }
            handle
                .set_len(status.offset)
                .and_then(|()| handle.seek(SeekFrom::Start(status.offset)).map(|_| ()))
                .map_err(|e| BackendError::from_io(e, file))?;
            return Ok(Box::new(LocalResumeStream { handle }));
        }

        if status.create_new && local.exists() {
            return Err(BackendError::AlreadyExists { path: file.clone() });
        }
        let dir = local.parent().unwrap_or(&self.root);
        let temp = NamedTempFile::new_in(dir).map_err(|e| BackendError::from_io(e, file))?;
        Ok(Box::new(LocalWriteStream {
            temp,
            target: local,
            create_new: status.create_new,
        }))
    }

    fn append(&self, file: &RemotePath) -> Result<Append, BackendError> {
        let metadata =
            fs::metadata(self.resolve(file)).map_err(|e| BackendError::from_io(e, file))?;
        if metadata.is_dir() {
            return Err(BackendError::Unsupported {
                operation: "append",
                path: file.clone(),
            });
        }
        Ok(Append {
            size: metadata.len(),
        })
    }

    fn supports_conditional_create(&self) -> bool {
        true
    }
}

struct LocalWriteStream {
    temp: NamedTempFile,
    target: PathBuf,
    create_new: bool,
}

impl Write for LocalWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl WriteStream for LocalWriteStream {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        this.temp.as_file().sync_all()?;
        let persisted = if this.create_new {
            this.temp.persist_noclobber(&this.target)
        } else {
            this.temp.persist(&this.target)
        };
        persisted.map(|_| ()).map_err(|e| e.error)
    }
}

struct LocalResumeStream {
    handle: File,
}

impl Write for LocalResumeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle.flush()
    }
}

impl WriteStream for LocalResumeStream {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.handle.sync_all()
    }
}

impl DeleteFeature for LocalBackend {
    fn delete(&self, path: &RemotePath) -> Result<(), BackendError> {
        let local = self.resolve(path);
        let metadata = fs::symlink_metadata(&local).map_err(|e| BackendError::from_io(e, path))?;
        let result = if metadata.is_dir() {
            fs::remove_dir(&local)
        } else {
            fs::remove_file(&local)
        };
        result.map_err(|e| BackendError::from_io(e, path))
    }
}

impl MoveFeature for LocalBackend {
    fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<(), BackendError> {
        let from = self.resolve(source);
        if !from.exists() {
            return Err(BackendError::NotFound {
                path: source.clone(),
            });
        }
        let to = self.ensure_parent(target)?;
        if to.exists() {
            return Err(BackendError::AlreadyExists {
                path: target.clone(),
            });
        }
        fs::rename(&from, &to).map_err(|e| BackendError::from_io(e, source))
    }
}

impl DirectoryFeature for LocalBackend {
    fn mkdir(&self, directory: &RemotePath) -> Result<(), BackendError> {
        let local = self.ensure_parent(directory)?;
        fs::create_dir(&local).map_err(|e| BackendError::from_io(e, directory))
    }
}

impl TouchFeature for LocalBackend {
    fn touch(&self, file: &RemotePath) -> Result<(), BackendError> {
        let local = self.ensure_parent(file)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&local)
            .map(|_| ())
            .map_err(|e| BackendError::from_io(e, file))
    }
}

impl FindFeature for LocalBackend {
    fn find(&self, path: &RemotePath) -> Result<bool, BackendError> {
        match fs::symlink_metadata(self.resolve(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::from_io(e, path)),
        }
    }
}

impl AttributesFeature for LocalBackend {
    fn attributes(&self, path: &RemotePath) -> Result<RemoteAttributes, BackendError> {
        let metadata =
            fs::metadata(self.resolve(path)).map_err(|e| BackendError::from_io(e, path))?;
        Ok(attributes_of(&metadata))
    }
}
