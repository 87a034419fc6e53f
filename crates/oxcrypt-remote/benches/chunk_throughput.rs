use std::hint::black_box;
use std::io::{Read, Write};
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use oxcrypt_remote::crypto::keys::MasterKey;
use oxcrypt_remote::crypto::nonce::{NonceGenerator, RandomNonceGenerator};
use oxcrypt_remote::fs::chunk::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_PLAINTEXT_SIZE, ChunkCipher, HEADER_SIZE, number_of_chunks,
};
use oxcrypt_remote::fs::file::{FileContext, FileHeader};
use oxcrypt_remote::fs::name::{DEFAULT_SHORTENING_THRESHOLD, FilenameCodec};
use oxcrypt_remote::fs::streaming::{
    DecryptingReader, EncryptingWriter, StreamingContext, read_header,
};
use oxcrypt_remote::vault::DirId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SIZES: [(&str, usize); 4] = [
    ("1KB", 1024),
    ("32KB", CHUNK_PLAINTEXT_SIZE),
    ("1MB", 1024 * 1024),
    ("8MB", 8 * 1024 * 1024),
];

fn generate_test_file(size: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(12345);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}

fn encrypt(plaintext: &[u8], header: &FileHeader, master_key: &MasterKey, rotating: bool) -> Vec<u8> {
    let nonces: Box<dyn NonceGenerator> = if rotating {
        Box::new(header.rotating_nonces(number_of_chunks(plaintext.len() as u64)))
    } else {
        Box::new(RandomNonceGenerator)
    };
    let mut writer = EncryptingWriter::new(
        Vec::new(),
        header,
        master_key,
        nonces,
        StreamingContext::new(),
    )
    .unwrap();
    writer.write_all(plaintext).unwrap();
    writer.finish().unwrap()
}

fn bench_chunk_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_cipher");
    let header = FileHeader::create();
    let cipher = ChunkCipher::new(&header);
    let plaintext = generate_test_file(CHUNK_PLAINTEXT_SIZE);
    let nonce = [7u8; 12];
    let sealed = cipher.encrypt_chunk(&plaintext, 3, &nonce).unwrap();

    group.throughput(Throughput::Bytes(CHUNK_PLAINTEXT_SIZE as u64));
    group.bench_function("encrypt", |b| {
        b.iter(|| cipher.encrypt_chunk(black_box(&plaintext), 3, &nonce).unwrap());
    });
    group.bench_function("decrypt", |b| {
        let context = FileContext::new();
        b.iter(|| cipher.decrypt_chunk(black_box(&sealed), 3, &context).unwrap());
    });
    group.finish();
}

fn bench_stream_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_encryption");
    let master_key = MasterKey::random().unwrap();

    for (name, size) in SIZES {
        let plaintext = generate_test_file(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("random", name), &plaintext, |b, data| {
            b.iter(|| encrypt(black_box(data), &FileHeader::create(), &master_key, false));
        });
        group.bench_with_input(BenchmarkId::new("rotating", name), &plaintext, |b, data| {
            b.iter(|| encrypt(black_box(data), &FileHeader::create(), &master_key, true));
        });
    }
    group.finish();
}

fn bench_stream_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decryption");
    let master_key = MasterKey::random().unwrap();

    for (name, size) in SIZES {
        let header = FileHeader::create();
        let ciphertext = encrypt(&generate_test_file(size), &header, &master_key, false);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &ciphertext, |b, data| {
            b.iter(|| {
                let mut input = &data[..];
                let context = FileContext::new();
                let header = read_header(&mut input, &master_key, &context).unwrap();
                let mut reader = DecryptingReader::new(input, &header, 0, 0, context);
                let mut out = Vec::with_capacity(size);
                reader.read_to_end(&mut out).unwrap();
                black_box(out)
            });
        });
    }
    group.finish();
}

fn bench_ranged_read(c: &mut Criterion) {
    let master_key = MasterKey::random().unwrap();
    let header = FileHeader::create();
    let ciphertext = encrypt(&generate_test_file(8 * 1024 * 1024), &header, &master_key, false);
    let chunk = 200u64;
    let start = HEADER_SIZE + chunk as usize * CHUNK_ENCRYPTED_SIZE;

    c.bench_function("ranged_read_last_chunks", |b| {
        b.iter(|| {
            let reader =
                DecryptingReader::new(&ciphertext[start..], &header, chunk, 100, FileContext::new());
            let mut out = Vec::new();
            reader.take(64 * 1024).read_to_end(&mut out).unwrap();
            black_box(out)
        });
    });
}

fn bench_filenames(c: &mut Criterion) {
    let mut group = c.benchmark_group("filenames");
    let codec = FilenameCodec::new(
        Arc::new(MasterKey::random().unwrap()),
        DEFAULT_SHORTENING_THRESHOLD,
    );
    let parent = DirId::generate();
    let short = "quarterly-report.pdf";
    let long = "x".repeat(200);
    let encrypted = codec.encrypt_name(&parent, short).unwrap();

    group.bench_function("encrypt_short", |b| {
        b.iter(|| codec.encrypt_name(&parent, black_box(short)).unwrap());
    });
    group.bench_function("encrypt_shortened", |b| {
        b.iter(|| codec.encrypt_name(&parent, black_box(&long)).unwrap());
    });
    group.bench_function("decrypt_short", |b| {
        b.iter(|| codec.decrypt_name(&parent, black_box(encrypted.full_name())).unwrap());
    });
    group.bench_function("hash_dir_id", |b| {
        b.iter(|| codec.hash_dir_id(black_box(&parent)).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_cipher,
    bench_stream_encryption,
    bench_stream_decryption,
    bench_ranged_read,
    bench_filenames
);
criterion_main!(benches);
