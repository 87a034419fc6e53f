//! End-to-end reads, writes and listings through a vault session.

mod common;

use std::io::Read;

use common::{MemoryVault, TEST_PASSPHRASE, fast_options, random_content};
use oxcrypt_remote::backend::{FindFeature, ListFeature, ReadFeature};
use oxcrypt_remote::fs::chunk::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_PLAINTEXT_SIZE, HEADER_SIZE, NONCE_SIZE, ciphertext_size,
};
use oxcrypt_remote::{CollectingListener, ErrorKind, RemotePath, VaultError, VaultStatus};

#[test]
fn test_hello_world_listing_and_content() {
    let vault = MemoryVault::new();
    let file = vault.path("hello.txt");
    vault.session.write_bytes(&file, b"hello world").unwrap();

    let entries = vault.session.list(&vault.root, &mut ()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "hello.txt");
    assert_eq!(entries[0].attributes.size, 11);
    assert!(!entries[0].attributes.is_dir());

    assert_eq!(vault.session.read_to_end(&file).unwrap(), b"hello world");

    // Nothing at the backend carries the plaintext name or content.
    for path in vault.backend.file_paths() {
        assert!(!path.as_str().contains("hello.txt"), "leaked name in {path}");
        let raw = vault.backend.raw_bytes(&path).unwrap();
        assert!(!raw.windows(11).any(|w| w == b"hello world"));
    }
    let blob = &vault.content_blobs()[0];
    assert_eq!(vault.backend.raw_bytes(blob).unwrap().len() as u64, ciphertext_size(11));
}

#[test]
fn test_empty_file_is_header_only() {
    let vault = MemoryVault::new();
    let file = vault.path("empty.bin");
    vault.session.write_bytes(&file, b"").unwrap();

    let blob = &vault.content_blobs()[0];
    assert_eq!(vault.backend.raw_bytes(blob).unwrap().len(), HEADER_SIZE);
    assert!(vault.session.read_to_end(&file).unwrap().is_empty());
    assert_eq!(vault.session.attributes(&file).unwrap().size, 0);
}

#[test]
fn test_rewriting_same_content_changes_ciphertext() {
    let vault = MemoryVault::new();
    let file = vault.path("same.bin");
    let content = random_content(CHUNK_PLAINTEXT_SIZE + 100, 5);

    vault.session.write_bytes(&file, &content).unwrap();
    let blob = vault.content_blobs()[0].clone();
    let first = vault.backend.raw_bytes(&blob).unwrap();
    vault.session.write_bytes(&file, &content).unwrap();
    let second = vault.backend.raw_bytes(&blob).unwrap();

    assert_eq!(first.len(), second.len());
    assert_ne!(first, second);
    assert_ne!(first[..NONCE_SIZE], second[..NONCE_SIZE]);
    for chunk_start in [HEADER_SIZE, HEADER_SIZE + CHUNK_ENCRYPTED_SIZE] {
        let nonce = chunk_start..chunk_start + NONCE_SIZE;
        assert_ne!(first[nonce.clone()], second[nonce]);
        assert_ne!(first[chunk_start..], second[chunk_start..]);
    }
    assert_eq!(vault.session.read_to_end(&file).unwrap(), content);

    // A second file with the same plaintext shares nothing either.
    let twin = vault.path("twin.bin");
    vault.session.write_bytes(&twin, &content).unwrap();
    let blobs = vault.content_blobs();
    assert_eq!(blobs.len(), 2);
    let raw: Vec<_> = blobs.iter().map(|b| vault.backend.raw_bytes(b).unwrap()).collect();
    assert_ne!(raw[0][HEADER_SIZE..], raw[1][HEADER_SIZE..]);
}

#[test]
fn test_large_file_survives_lock_and_unlock() {
    let vault = MemoryVault::new();
    let file = vault.path("random.bin");
    let content = random_content(1_000_000, 1);
    vault.session.write_bytes(&file, &content).unwrap();

    assert!(vault.session.lock_vault(&vault.root));
    vault
        .session
        .unlock_vault(&vault.root, TEST_PASSPHRASE, fast_options())
        .unwrap();
    assert_eq!(vault.session.read_to_end(&file).unwrap(), content);

    let reopened = vault.reopen();
    assert_eq!(reopened.read_to_end(&file).unwrap(), content);
}

#[test]
fn test_chunk_boundary_sizes() {
    let vault = MemoryVault::new();
    for (i, size) in [
        CHUNK_PLAINTEXT_SIZE - 1,
        CHUNK_PLAINTEXT_SIZE,
        CHUNK_PLAINTEXT_SIZE + 1,
        2 * CHUNK_PLAINTEXT_SIZE,
    ]
    .into_iter()
    .enumerate()
    {
        let file = vault.path(&format!("boundary-{size}.bin"));
        let content = random_content(size, i as u64);
        vault.session.write_bytes(&file, &content).unwrap();
        assert_eq!(vault.session.attributes(&file).unwrap().size, size as u64);
        assert_eq!(vault.session.read_to_end(&file).unwrap(), content);
    }
}

#[test]
fn test_ranged_reads() {
    let vault = MemoryVault::new();
    let file = vault.path("ranged.bin");
    let content = random_content(100_000, 7);
    vault.session.write_bytes(&file, &content).unwrap();

    for offset in [0u64, 1, 40_000, CHUNK_PLAINTEXT_SIZE as u64, 99_999, 100_000] {
        let mut reader = vault.session.read(&file, offset).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, &content[offset as usize..], "offset {offset}");
    }
}

#[test]
fn test_locked_vault_fails_without_backend_calls() {
    let vault = MemoryVault::new();
    let file = vault.path("secret.txt");
    vault.session.write_bytes(&file, b"secret").unwrap();
    vault.session.lock_vault(&vault.root);

    vault.backend.reset_call_count();
    let err = vault.session.read_to_end(&file).unwrap_err();
    assert!(matches!(err, VaultError::Locked { .. }));
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let err = vault.session.list(&vault.root, &mut ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(vault.session.write_bytes(&vault.path("new.txt"), b"x").is_err());
    assert!(vault.session.find(&file).is_err());
    assert_eq!(vault.backend.call_count(), 0);
}

#[test]
fn test_wrong_passphrase_keeps_vault_locked() {
    let vault = MemoryVault::new();
    let file = vault.path("a.txt");
    vault.session.write_bytes(&file, b"a").unwrap();
    vault.session.lock_vault(&vault.root);

    let err = vault
        .session
        .unlock_vault(&vault.root, "not the passphrase", fast_options())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let mounted = vault.session.registry().get(&vault.root).unwrap();
    assert_eq!(mounted.status(), VaultStatus::Locked);
    assert!(matches!(
        vault.session.read_to_end(&file),
        Err(VaultError::Locked { .. })
    ));

    vault
        .session
        .unlock_vault(&vault.root, TEST_PASSPHRASE, fast_options())
        .unwrap();
    assert_eq!(vault.session.read_to_end(&file).unwrap(), b"a");
}

#[test]
fn test_long_names_are_distinct_and_round_trip() {
    let vault = MemoryVault::new();
    let medium = "m".repeat(100);
    let long = "l".repeat(200);
    let longer = format!("{}x", "l".repeat(199));

    for (name, content) in [(&medium, b"medium"), (&long, b"long!!"), (&longer, b"longer")] {
        vault.session.write_bytes(&vault.path(name), content).unwrap();
    }

    let entries = vault.session.list(&vault.root, &mut ()).unwrap();
    let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    let mut expected = vec![medium.clone(), long.clone(), longer.clone()];
    expected.sort();
    assert_eq!(names, expected);

    assert_eq!(vault.session.read_to_end(&vault.path(&medium)).unwrap(), b"medium");
    assert_eq!(vault.session.read_to_end(&vault.path(&long)).unwrap(), b"long!!");
    assert_eq!(vault.session.read_to_end(&vault.path(&longer)).unwrap(), b"longer");

    let shortened: Vec<_> = vault
        .backend
        .file_paths()
        .into_iter()
        .filter(|p| p.file_name() == Some("name.c9s"))
        .collect();
    assert_eq!(shortened.len(), 2);
}

#[test]
fn test_nested_directories() {
    let vault = MemoryVault::new();
    vault.session.mkdir(&vault.path("a")).unwrap();
    vault.session.mkdir(&vault.path("a/b")).unwrap();
    vault.session.mkdir(&vault.path("a/b/c")).unwrap();
    vault.session.write_bytes(&vault.path("a/b/c/deep.txt"), b"deep").unwrap();

    assert_eq!(vault.session.read_to_end(&vault.path("a/b/c/deep.txt")).unwrap(), b"deep");
    let entries = vault.session.list(&vault.path("a/b"), &mut ()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "c");
    assert!(entries[0].attributes.is_dir());

    let err = vault.session.list(&vault.path("a/missing"), &mut ()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_listener_sees_unreadable_entries() {
    let vault = MemoryVault::new();
    vault.session.write_bytes(&vault.path("good.txt"), b"good").unwrap();

    let storage = vault.root_storage();
    vault
        .backend
        .put_raw(&storage.join("AAAAnot-a-real-name.c9r"), vec![0u8; 100])
        .unwrap();
    vault.backend.put_raw(&storage.join("desktop.ini"), b"x".to_vec()).unwrap();

    let mut listener = CollectingListener::default();
    let entries = vault.session.list(&vault.root, &mut listener).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "good.txt");
    assert_eq!(listener.entries, vec![vault.path("good.txt")]);
    assert_eq!(listener.unreadable.len(), 1);
    assert_eq!(listener.unreadable[0].0, storage.join("AAAAnot-a-real-name.c9r"));
}

#[test]
fn test_paths_outside_vaults_pass_through() {
    let vault = MemoryVault::new();
    let plain = RemotePath::new("/plain/readme.txt");
    vault.session.write_bytes(&plain, b"not encrypted").unwrap();

    assert_eq!(vault.backend.raw_bytes(&plain).unwrap(), b"not encrypted");
    assert_eq!(vault.session.read_to_end(&plain).unwrap(), b"not encrypted");

    let top = vault.session.list(&RemotePath::root(), &mut ()).unwrap();
    let names: Vec<_> = top.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"plain"));
    assert!(names.contains(&"vault"));
}

#[test]
fn test_session_as_backend() {
    let vault = MemoryVault::new();
    vault.session.write_bytes(&vault.path("x.txt"), b"xyz").unwrap();

    let backend: &dyn oxcrypt_remote::Backend = &vault.session;
    assert!(FindFeature::find(backend, &vault.path("x.txt")).unwrap());
    assert_eq!(ListFeature::list(backend, &vault.root).unwrap().len(), 1);

    let mut out = Vec::new();
    ReadFeature::read(backend, &vault.path("x.txt"), 1)
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, b"yz");

    let err = ReadFeature::read(backend, &vault.path("missing"), 0).err().unwrap();
    assert!(err.is_not_found());
}
