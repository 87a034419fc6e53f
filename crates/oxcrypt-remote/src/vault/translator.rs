//! Plaintext to ciphertext path translation.
//!
//! Translation walks the plaintext path from the vault root, resolving each
//! directory's id and encrypting each segment with its parent's id. There is
//! no inverse: ciphertext names are turned back into plaintext by listing.

use std::fmt;

use tracing::{trace, warn};

use crate::backend::{Backend, EntryKind};
use crate::error::{VaultError, VaultOpContext};
use crate::fs::name::{EncryptedName, FilenameCodec, NAME_FILE};
use crate::vault::dir_id::{DIR_ID_FILE, DirectoryIdStore};
use crate::vault::path::{DirId, RemotePath};

/// Top-level folder holding every directory's storage.
pub const DATA_DIR: &str = "d";

/// Content blob inside a shortened (`.c9s`) file entry.
pub const CONTENTS_FILE: &str = "contents.c9r";

/// A plaintext directory resolved to its id and storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDirectory {
    pub dir_id: DirId,
    pub storage: RemotePath,
}

/// Where one plaintext name lives inside its parent's storage directory.
#[derive(Debug, Clone)]
pub struct CiphertextEntry {
    pub parent_dir_id: DirId,
    pub parent_storage: RemotePath,
    pub name: EncryptedName,
    /// `storage/X.c9r` or `storage/H.c9s`
    pub entry: RemotePath,
}

impl CiphertextEntry {
    /// The object holding file content.
    pub fn file_blob(&self) -> RemotePath {
        match self.name {
            EncryptedName::Regular(_) => self.entry.clone(),
            EncryptedName::Shortened { .. } => self.entry.join(CONTENTS_FILE),
        }
    }

    /// The `dir.c9r` holding a directory's id.
    pub fn dir_id_file(&self) -> RemotePath {
        self.entry.join(DIR_ID_FILE)
    }

    /// Side file with the full encrypted name, for shortened entries only.
    pub fn name_file(&self) -> Option<RemotePath> {
        self.is_shortened().then(|| self.entry.join(NAME_FILE))
    }

    /// The object that moves when the entry is renamed as a `kind`.
    pub fn payload(&self, kind: EntryKind) -> RemotePath {
        match kind {
            EntryKind::File => self.file_blob(),
            EntryKind::Directory => self.dir_id_file(),
        }
    }

    pub fn is_shortened(&self) -> bool {
        self.name.is_shortened()
    }
}

/// Maps paths inside one vault to backend locations.
pub struct VaultPathTranslator {
    vault_root: RemotePath,
    codec: FilenameCodec,
    dir_ids: DirectoryIdStore,
}

impl fmt::Debug for VaultPathTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultPathTranslator")
            .field("vault_root", &self.vault_root)
            .field("cached_dir_ids", &self.dir_ids.len())
            .finish_non_exhaustive()
    }
}

impl VaultPathTranslator {
    pub fn new(vault_root: RemotePath, codec: FilenameCodec) -> Self {
        Self {
            vault_root,
            codec,
            dir_ids: DirectoryIdStore::new(),
        }
    }

    pub fn vault_root(&self) -> &RemotePath {
        &self.vault_root
    }

    pub fn codec(&self) -> &FilenameCodec {
        &self.codec
    }

    pub fn dir_ids(&self) -> &DirectoryIdStore {
        &self.dir_ids
    }

    /// `<root>/d/<h[0..2]>/<h[2..]>` for a directory id.
    pub fn storage_path(&self, dir_id: &DirId) -> Result<RemotePath, VaultError> {
        let hash = self.codec.hash_dir_id(dir_id).map_err(|e| {
            VaultError::name(e, VaultOpContext::new().with_dir_id(dir_id))
        })?;
        let (prefix, rest) = hash.split_at(2);
        Ok(self.vault_root.join(DATA_DIR).join(prefix).join(rest))
    }

    /// The vault root directory.
    pub fn root_directory(&self) -> Result<ResolvedDirectory, VaultError> {
        let dir_id = DirId::root();
        let storage = self.storage_path(&dir_id)?;
        Ok(ResolvedDirectory { dir_id, storage })
    }

    /// Entry for `name` inside a resolved directory. Pure computation.
    pub fn locate(&self, parent: &ResolvedDirectory, name: &str) -> Result<CiphertextEntry, VaultError> {
        let encrypted = self.codec.encrypt_name(&parent.dir_id, name).map_err(|e| {
            VaultError::name(
                e,
                VaultOpContext::new()
                    .with_operation("encrypt name")
                    .with_dir_id(&parent.dir_id),
            )
        })?;
        let entry = parent.storage.join(encrypted.entry_name());
        Ok(CiphertextEntry {
            parent_dir_id: parent.dir_id.clone(),
            parent_storage: parent.storage.clone(),
            name: encrypted,
            entry,
        })
    }

    /// Walk `relative` (a path below the vault root) down to its directory id.
    ///
    /// Every segment must be an existing directory; a missing one is
    /// [`VaultError::NotFound`].
    pub fn resolve_directory(
        &self,
        backend: &dyn Backend,
        relative: &RemotePath,
    ) -> Result<ResolvedDirectory, VaultError> {
        let mut current = self.root_directory()?;
        let mut walked = self.vault_root.clone();
        for segment in relative.components() {
            walked = walked.join(segment);
            let entry = self.locate(&current, segment)?;
            let dir_id = self
                .dir_ids
                .load(backend, &entry.dir_id_file())
                .map_err(|e| match e {
                    VaultError::NotFound { context } => {
                        VaultError::not_found(context.with_path(&walked))
                    }
                    other => other,
                })?;
            let storage = self.storage_path(&dir_id)?;
            trace!(path = %walked, storage = %storage, "Resolved directory");
            current = ResolvedDirectory { dir_id, storage };
        }
        Ok(current)
    }

    /// Entry for a non-root path below the vault root.
    ///
    /// Resolves the parent chain; whether the entry itself exists is left to
    /// [`node_kind`](Self::node_kind).
    pub fn resolve(
        &self,
        backend: &dyn Backend,
        relative: &RemotePath,
    ) -> Result<CiphertextEntry, VaultError> {
        let (parent, name) = relative.split().ok_or_else(|| {
            VaultError::interop(
                "the vault root has no entry in a parent directory",
                VaultOpContext::new().with_path(&self.vault_root),
            )
        })?;
        let directory = self.resolve_directory(backend, &parent)?;
        self.locate(&directory, name)
    }

    /// Ciphertext location of a plaintext path: the content blob for a
    /// file, the storage directory for a directory.
    pub fn to_encrypted(
        &self,
        backend: &dyn Backend,
        relative: &RemotePath,
    ) -> Result<RemotePath, VaultError> {
        if relative.is_root() {
            return Ok(self.root_directory()?.storage);
        }
        let entry = self.resolve(backend, relative)?;
        match self.node_kind(backend, &entry)? {
            Some(EntryKind::File) => Ok(entry.file_blob()),
            Some(EntryKind::Directory) => {
                let dir_id = self.dir_ids.load(backend, &entry.dir_id_file())?;
                self.storage_path(&dir_id)
            }
            None => Err(VaultError::not_found(
                VaultOpContext::new()
                    .with_path(&self.vault_root.join(relative.as_str()))
                    .with_encrypted_path(&entry.entry),
            )),
        }
    }

    /// What the backend holds for an entry, if anything.
    pub fn node_kind(
        &self,
        backend: &dyn Backend,
        entry: &CiphertextEntry,
    ) -> Result<Option<EntryKind>, VaultError> {
        if self.dir_ids.cached(&entry.dir_id_file()).is_some() {
            return Ok(Some(EntryKind::Directory));
        }
        match entry.name {
            EncryptedName::Regular(_) => {
                let attributes = match backend.attributes(&entry.entry) {
                    Ok(attributes) => attributes,
                    Err(e) if e.is_not_found() => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                if !attributes.is_dir() {
                    return Ok(Some(EntryKind::File));
                }
                if backend.find(&entry.dir_id_file())? {
                    Ok(Some(EntryKind::Directory))
                } else {
                    warn!(entry = %entry.entry, "Directory entry without dir.c9r");
                    Ok(None)
                }
            }
            EncryptedName::Shortened { .. } => {
                if backend.find(&entry.file_blob())? {
                    Ok(Some(EntryKind::File))
                } else if backend.find(&entry.dir_id_file())? {
                    Ok(Some(EntryKind::Directory))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
