use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lib3mf_securecontent::crypto::{Aes256GcmCipher, FnKeyWrapper, SecureContext};
use lib3mf_securecontent::model::{
    Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore,
};
use lib3mf_securecontent::{KeyStorePackageReader, KeyStorePackageWriter};
use std::hint::black_box;
use std::io::Cursor;

const PART_PATH: &str = "/3D/payload.bin";

fn context() -> SecureContext {
    SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper(
            "bench",
            FnKeyWrapper::new(|key, _| Ok(key.to_vec()), |key, _| Ok(key.to_vec())),
        )
}

fn keystore(compression: Compression) -> KeyStore {
    let mut keystore = KeyStore::new();
    keystore.add_consumer(Consumer::new("bench")).unwrap();
    let group = keystore.add_resource_data_group();
    keystore
        .add_access_right(group, "bench", KEKParams::default())
        .unwrap();
    keystore
        .add_resource_data(group, PART_PATH, EncryptionAlgorithm::Aes256Gcm, compression)
        .unwrap();
    keystore
}

/// Semi-compressible payload of `size` bytes
fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i / 7) % 251) as u8).collect()
}

fn save(data: &[u8], compression: Compression) -> Vec<u8> {
    let mut writer =
        KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(compression), context())
            .unwrap();
    writer.write_part(PART_PATH, data).unwrap();
    writer.close().unwrap().0.into_inner()
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt_part");

    for size in [16 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        for compression in [Compression::None, Compression::Deflate] {
            group.bench_with_input(
                BenchmarkId::new(compression.as_str(), size),
                &data,
                |b, data| b.iter(|| save(black_box(data), compression)),
            );
        }
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt_part");
    group.sample_size(20);

    for size in [16 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        for compression in [Compression::None, Compression::Deflate] {
            let package = save(&payload(size), compression);
            group.bench_with_input(
                BenchmarkId::new(compression.as_str(), size),
                &package,
                |b, package| {
                    b.iter(|| {
                        let mut reader =
                            KeyStorePackageReader::open(Cursor::new(package.as_slice()), context())
                                .unwrap();
                        black_box(reader.read_part(PART_PATH).unwrap())
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_decrypt);
criterion_main!(benches);
