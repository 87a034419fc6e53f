//! Rename, delete, mkdir, touch, resumable uploads and checksums.

mod common;

use std::collections::BTreeSet;
use std::io::Write;

use common::{MemoryVault, TEST_PASSPHRASE, fast_options, faulty_vault, random_content};
use oxcrypt_remote::fs::chunk::CHUNK_PLAINTEXT_SIZE;
use oxcrypt_remote::fs::file::FileHeader;
use oxcrypt_remote::{
    BackendError, CollectingListener, ErrorKind, NonceMode, RemotePath, TransferStatus, VaultError,
    VaultStatus,
};
use ring::digest;

// ==================== rename ====================

#[test]
fn test_rename_file() {
    let vault = MemoryVault::new();
    vault.session.write_bytes(&vault.path("old.txt"), b"content").unwrap();

    vault.session.rename(&vault.path("old.txt"), &vault.path("new.txt")).unwrap();
    assert!(!vault.session.find(&vault.path("old.txt")).unwrap());
    assert_eq!(vault.session.read_to_end(&vault.path("new.txt")).unwrap(), b"content");
}

#[test]
fn test_rename_directory_keeps_its_id() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("docs")).unwrap();
    vault.session.mkdir(&vault.path("docs/inner")).unwrap();
    vault.session.write_bytes(&vault.path("docs/a.txt"), b"a").unwrap();
    vault.session.write_bytes(&vault.path("docs/inner/b.txt"), b"b").unwrap();
    let blobs_before: BTreeSet<_> = vault.content_blobs().into_iter().collect();

    vault.session.rename(&vault.path("docs"), &vault.path("papers")).unwrap();

    // Children live under the directory id, which did not change.
    let blobs_after: BTreeSet<_> = vault.content_blobs().into_iter().collect();
    assert_eq!(blobs_before, blobs_after);
    assert_eq!(vault.session.read_to_end(&vault.path("papers/a.txt")).unwrap(), b"a");
    assert_eq!(vault.session.read_to_end(&vault.path("papers/inner/b.txt")).unwrap(), b"b");
    assert!(!vault.session.find(&vault.path("docs")).unwrap());
    assert!(vault.session.list(&vault.path("docs"), &mut ()).unwrap_err().is_not_found());
}

#[test]
fn test_rename_between_short_and_shortened_names() {
    let vault = MemoryVault::new();
    let long = "d".repeat(200);
    vault.session.mkdir(&vault.path(&long)).unwrap();
    vault.session.write_bytes(&vault.path(&format!("{long}/f.txt")), b"f").unwrap();
    vault.session.write_bytes(&vault.path("file.txt"), b"file").unwrap();

    vault.session.rename(&vault.path(&long), &vault.path("short")).unwrap();
    assert_eq!(vault.session.read_to_end(&vault.path("short/f.txt")).unwrap(), b"f");
    assert!(!vault.session.find(&vault.path(&long)).unwrap());

    let long_file = "f".repeat(230);
    vault.session.rename(&vault.path("file.txt"), &vault.path(&long_file)).unwrap();
    assert_eq!(vault.session.read_to_end(&vault.path(&long_file)).unwrap(), b"file");

    vault.session.rename(&vault.path("short"), &vault.path(&long)).unwrap();
    assert_eq!(vault.session.read_to_end(&vault.path(&format!("{long}/f.txt"))).unwrap(), b"f");

    let mut names: Vec<_> = vault
        .session
        .list(&vault.root, &mut ())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    let mut expected = vec![long, long_file];
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn test_failed_move_to_shortened_name_keeps_source() {
    let (backend, session, root) = faulty_vault();
    let source = root.join("file.txt");
    let long = root.join("g".repeat(230));
    session.write_bytes(&source, b"payload").unwrap();

    backend.fail_renames(true);
    assert!(session.rename(&source, &long).is_err());
    let name_files = backend
        .inner
        .file_paths()
        .into_iter()
        .filter(|p| p.file_name() == Some("name.c9s"))
        .count();
    assert_eq!(name_files, 1);

    let mut listener = CollectingListener::default();
    let names: Vec<_> = session
        .list(&root, &mut listener)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(listener.unreadable.is_empty());
    assert_eq!(names, vec!["file.txt"]);
    assert!(!session.find(&long).unwrap());

    backend.fail_renames(false);
    session.rename(&source, &long).unwrap();
    assert_eq!(session.read_to_end(&long).unwrap(), b"payload");
    assert!(!session.find(&source).unwrap());
    let mut listener = CollectingListener::default();
    let entries = session.list(&root, &mut listener).unwrap();
    assert!(listener.unreadable.is_empty());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "g".repeat(230));
}

#[test]
fn test_rename_refuses_existing_target_and_self_nesting() {
    let vault = MemoryVault::new();
    vault.session.write_bytes(&vault.path("a.txt"), b"a").unwrap();
    vault.session.write_bytes(&vault.path("b.txt"), b"b").unwrap();
    vault.session.mkdir(&vault.path("dir")).unwrap();

    let err = vault.session.rename(&vault.path("a.txt"), &vault.path("b.txt")).unwrap_err();
    assert!(matches!(err, VaultError::Backend(BackendError::AlreadyExists { .. })));

    let err = vault.session.rename(&vault.path("dir"), &vault.path("dir/sub")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interoperability);

    let err = vault
        .session
        .rename(&vault.path("a.txt"), &RemotePath::new("/outside.txt"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interoperability);
    assert_eq!(vault.session.read_to_end(&vault.path("a.txt")).unwrap(), b"a");
}

// ==================== delete ====================

#[test]
fn test_delete_directory_tree() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("tree")).unwrap();
    vault.session.mkdir(&vault.path("tree/branch")).unwrap();
    vault.session.write_bytes(&vault.path("tree/branch/leaf.txt"), b"leaf").unwrap();
    vault.session.write_bytes(&vault.path(&"n".repeat(220)), b"long").unwrap();
    vault.session.write_bytes(&vault.path("keep.txt"), b"keep").unwrap();
    let files_before = vault.backend.file_paths().len();

    let mut deleted = Vec::new();
    vault
        .session
        .delete(
            &[vault.path("tree"), vault.path(&"n".repeat(220))],
            &mut |p: &RemotePath| deleted.push(p.clone()),
        )
        .unwrap();
    assert_eq!(deleted, vec![vault.path("tree"), vault.path(&"n".repeat(220))]);

    let entries = vault.session.list(&vault.root, &mut ()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "keep.txt");
    // Root storage with its backup, the kept file, key file and config.
    assert!(vault.backend.file_paths().len() < files_before);
    assert_eq!(vault.content_blobs().len(), 1);
    assert!(
        vault
            .backend
            .file_paths()
            .iter()
            .all(|p| p.file_name() != Some("name.c9s"))
    );
}

#[test]
fn test_interrupted_directory_delete_can_be_retried() {
    fn populated() -> (std::sync::Arc<common::FaultyBackend>, oxcrypt_remote::VaultSession, RemotePath) {
        let (backend, session, root) = faulty_vault();
        let docs = root.join("docs");
        session.mkdir(&docs).unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            session.write_bytes(&docs.join(name), name.as_bytes()).unwrap();
        }
        (backend, session, docs)
    }

    let (backend, session, docs) = populated();
    backend.fail_delete_at(0);
    session.delete(&[docs.clone()], &mut |_: &RemotePath| {}).unwrap();
    let total = backend.deletes();
    // Three blobs, the id backup, the storage folder, dir.c9r, the entry.
    assert_eq!(total, 7);

    // Every cut before the entry itself goes leaves dir.c9r behind.
    for n in 1..total {
        let (backend, session, docs) = populated();
        backend.fail_delete_at(n);
        assert!(session.delete(&[docs.clone()], &mut |_: &RemotePath| {}).is_err());

        assert!(
            backend
                .inner
                .file_paths()
                .iter()
                .any(|p| p.file_name() == Some("dir.c9r")),
            "dir.c9r gone after failing delete #{n}"
        );
        assert!(session.find(&docs).unwrap(), "directory lost after failing delete #{n}");
        // The in-memory storage folder vanishes with its id backup.
        if n < total - 2 {
            let mut listener = CollectingListener::default();
            session.list(&docs, &mut listener).unwrap();
            assert!(listener.unreadable.is_empty());
        }

        backend.fail_delete_at(0);
        session.delete(&[docs.clone()], &mut |_: &RemotePath| {}).unwrap();
        assert!(!session.find(&docs).unwrap());
        assert!(session.list(&docs, &mut ()).unwrap_err().is_not_found());
    }
}

#[test]
fn test_delete_missing_path_is_not_found() {
    let vault = MemoryVault::new();
    let err = vault.session.delete(&[vault.path("ghost")], &mut |_: &RemotePath| {}).unwrap_err();
    assert!(err.is_not_found());
    let err = vault
        .session
        .delete(&[RemotePath::new("/plain-ghost")], &mut |_: &RemotePath| {})
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_delete_vault_root() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("dir")).unwrap();
    vault.session.write_bytes(&vault.path("dir/x.txt"), b"x").unwrap();
    let mounted = vault.session.registry().get(&vault.root).unwrap();
    vault.session.write_bytes(&RemotePath::new("/other.txt"), b"other").unwrap();

    vault.session.delete(&[vault.root.clone()], &mut |_: &RemotePath| {}).unwrap();

    assert!(vault.session.registry().is_empty());
    assert_eq!(mounted.status(), VaultStatus::Locked);
    let remaining = vault.backend.file_paths();
    assert_eq!(remaining, vec![RemotePath::new("/other.txt")]);
}

// ==================== mkdir / touch / find / attributes ====================

#[test]
fn test_mkdir_and_touch() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("photos")).unwrap();
    let err = vault.session.mkdir(&vault.path("photos")).unwrap_err();
    assert!(matches!(err, VaultError::Backend(BackendError::AlreadyExists { .. })));
    let err = vault.session.mkdir(&vault.root).unwrap_err();
    assert!(matches!(err, VaultError::Backend(BackendError::AlreadyExists { .. })));

    vault.session.touch(&vault.path("photos/empty.jpg")).unwrap();
    assert!(vault.session.find(&vault.path("photos/empty.jpg")).unwrap());
    assert_eq!(vault.session.attributes(&vault.path("photos/empty.jpg")).unwrap().size, 0);
    assert!(vault.session.read_to_end(&vault.path("photos/empty.jpg")).unwrap().is_empty());

    // Touching an existing file keeps its content.
    vault.session.write_bytes(&vault.path("photos/full.jpg"), b"jpeg").unwrap();
    vault.session.touch(&vault.path("photos/full.jpg")).unwrap();
    assert_eq!(vault.session.read_to_end(&vault.path("photos/full.jpg")).unwrap(), b"jpeg");

    assert!(vault.session.attributes(&vault.path("photos")).unwrap().is_dir());
    assert!(vault.session.attributes(&vault.root).unwrap().is_dir());
    assert!(vault.session.find(&vault.root).unwrap());
    assert!(!vault.session.find(&vault.path("nope/deeper")).unwrap());
    assert!(vault.session.attributes(&vault.path("nope")).unwrap_err().is_not_found());
}

#[test]
fn test_file_over_directory_is_refused() {
    let vault = MemoryVault::new();
    let long = "s".repeat(210);
    vault.session.mkdir(&vault.path(&long)).unwrap();
    let err = vault.session.write_bytes(&vault.path(&long), b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interoperability);
}

#[test]
fn test_directory_survives_restart() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("persist")).unwrap();
    vault.session.write_bytes(&vault.path("persist/p.txt"), b"p").unwrap();

    let reopened = vault.reopen();
    assert_eq!(reopened.read_to_end(&vault.path("persist/p.txt")).unwrap(), b"p");
    let entries = reopened.list(&vault.path("persist"), &mut ()).unwrap();
    assert_eq!(entries.len(), 1);
}

// ==================== append / resume ====================

#[test]
fn test_resume_upload_after_interruption() {
    let vault = MemoryVault::new();
    let file = vault.path("upload.bin");
    let content = random_content(3 * CHUNK_PLAINTEXT_SIZE + 1234, 9);
    let split = 2 * CHUNK_PLAINTEXT_SIZE;

    let status = TransferStatus::new().with_length(split as u64);
    let mut stream = vault.session.write(&file, &status).unwrap();
    stream.write_all(&content[..split]).unwrap();
    stream.finish().unwrap();

    let append = vault.session.append(&file).unwrap();
    assert_eq!(append.size, split as u64);

    let status = TransferStatus::new()
        .with_offset(append.size)
        .with_length((content.len() - split) as u64);
    let mut stream = vault.session.write(&file, &status).unwrap();
    stream.write_all(&content[split..]).unwrap();
    stream.finish().unwrap();

    assert_eq!(vault.session.read_to_end(&file).unwrap(), content);
    assert_eq!(vault.session.append(&file).unwrap().size, content.len() as u64);
}

#[test]
fn test_unaligned_resume_is_refused() {
    let vault = MemoryVault::new();
    let file = vault.path("upload.bin");
    vault.session.write_bytes(&file, &random_content(1000, 1)).unwrap();

    let status = TransferStatus::new().with_offset(1000);
    let err = vault.session.write(&file, &status).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Interoperability);
}

#[test]
fn test_unfinished_write_leaves_no_file() {
    let vault = MemoryVault::new();
    let file = vault.path("cancelled.bin");
    let mut stream = vault.session.write(&file, &TransferStatus::new()).unwrap();
    stream.write_all(b"never committed").unwrap();
    drop(stream);

    assert!(!vault.session.find(&file).unwrap());
}

// ==================== checksum ====================

#[test]
fn test_rotating_checksum_matches_stored_ciphertext() {
    let vault = MemoryVault::with_options(fast_options().with_nonce_mode(NonceMode::Rotating));
    let file = vault.path("checked.bin");
    let content = random_content(70_000, 11);
    let header = FileHeader::create();
    let status = TransferStatus::new()
        .with_length(content.len() as u64)
        .with_header(header);

    let expected = vault.session.checksum(&file, &mut &content[..], &status).unwrap();

    let mut stream = vault.session.write(&file, &status).unwrap();
    stream.write_all(&content).unwrap();
    stream.finish().unwrap();

    let stored = vault.backend.raw_bytes(&vault.content_blobs()[0]).unwrap();
    assert_eq!(expected, hex::encode(digest::digest(&digest::SHA256, &stored)));
    assert_eq!(vault.session.read_to_end(&file).unwrap(), content);
}

#[test]
fn test_checksum_refuses_random_nonces() {
    let vault = MemoryVault::new();
    let status = TransferStatus::new()
        .with_length(3)
        .with_header(FileHeader::create())
        .with_nonce_mode(NonceMode::Random);
    let err = vault
        .session
        .checksum(&vault.path("x"), &mut &b"abc"[..], &status)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interoperability);

    let err = vault
        .session
        .checksum(&vault.path("x"), &mut &b"abc"[..], &TransferStatus::new().with_length(3))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interoperability);
}

#[test]
fn test_rotating_write_needs_length() {
    let vault = MemoryVault::with_options(fast_options().with_nonce_mode(NonceMode::Rotating));
    let err = vault.session.write(&vault.path("x"), &TransferStatus::new()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Interoperability);
}

// ==================== nested vaults ====================

#[test]
fn test_inner_vault_masks_outer() {
    let vault = MemoryVault::new();
    let inner_root = vault.path("inner");
    vault
        .session
        .create_vault(&inner_root, "inner-passphrase", fast_options())
        .unwrap();

    let secret = inner_root.join("secret.txt");
    vault.session.write_bytes(&secret, b"inner secret").unwrap();
    vault.session.write_bytes(&vault.path("outer.txt"), b"outer").unwrap();

    // Inner ciphertext sits directly under the inner root at the backend.
    assert!(
        vault
            .backend
            .file_paths()
            .iter()
            .any(|p| p.starts_with(&inner_root.join("d")))
    );
    assert!(vault.backend.raw_bytes(&inner_root.join("masterkey.cryptomator")).is_some());

    let outer_names: Vec<_> = vault
        .session
        .list(&vault.root, &mut ())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(outer_names, vec!["outer.txt".to_string()]);

    vault.session.lock_vault(&inner_root);
    assert!(matches!(
        vault.session.read_to_end(&secret),
        Err(VaultError::Locked { .. })
    ));
    assert_eq!(vault.session.read_to_end(&vault.path("outer.txt")).unwrap(), b"outer");

    vault
        .session
        .unlock_vault(&inner_root, "inner-passphrase", fast_options())
        .unwrap();
    assert_eq!(vault.session.read_to_end(&secret).unwrap(), b"inner secret");

    vault.session.close();
    assert!(matches!(
        vault.session.read_to_end(&vault.path("outer.txt")),
        Err(VaultError::Locked { .. })
    ));
    let err = vault
        .session
        .unlock_vault(&vault.root, "wrong", fast_options())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    vault
        .session
        .unlock_vault(&vault.root, TEST_PASSPHRASE, fast_options())
        .unwrap();
}

#[test]
fn test_create_over_existing_vault_is_refused() {
    let vault = MemoryVault::new();
    let err = vault
        .session
        .create_vault(&vault.root, "another", fast_options())
        .unwrap_err();
    assert!(matches!(err, VaultError::Backend(BackendError::AlreadyExists { .. })));
}

#[test]
fn test_unmounted_vault_is_plain_ciphertext() {
    let vault = MemoryVault::new();
    vault.session.write_bytes(&vault.path("a.txt"), b"a").unwrap();
    assert!(vault.session.unmount_vault(&vault.root).is_some());

    let raw = vault.session.list(&vault.root, &mut ()).unwrap();
    let names: BTreeSet<_> = raw.into_iter().map(|e| e.name).collect();
    assert!(names.contains("masterkey.cryptomator"));
    assert!(names.contains("vault.cryptomator"));
    assert!(names.contains("d"));
}
