//! Property-based tests for the encrypted part pipeline
//!
//! Payloads of random size, from empty to several stream chunks, must come
//! back byte-identical through a full save and load.

#![cfg(feature = "crypto")]

mod common;

use common::*;
use lib3mf_securecontent::model::Compression;
use lib3mf_securecontent::streaming::CHUNK_SIZE;
use lib3mf_securecontent::{KeyStorePackageReader, KeyStorePackageWriter};
use proptest::prelude::*;
use std::io::{Cursor, Read, Write};

fn compression_strategy() -> impl Strategy<Value = Compression> {
    prop_oneof![Just(Compression::None), Just(Compression::Deflate)]
}

/// Payload sizes biased towards chunk boundaries
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..64),
        prop::collection::vec(any::<u8>(), CHUNK_SIZE - 16..CHUNK_SIZE + 16),
        prop::collection::vec(any::<u8>(), 0..3 * CHUNK_SIZE + 17),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_part_roundtrip(
        payload in payload_strategy(),
        compression in compression_strategy(),
        write_size in 1usize..20_000,
    ) {
        let mut writer = KeyStorePackageWriter::new(
            Cursor::new(Vec::new()),
            model_keystore(compression),
            full_context(),
        )
        .unwrap();
        let mut part = writer.add_part(MODEL_PATH).unwrap();
        for chunk in payload.chunks(write_size) {
            part.write_all(chunk).unwrap();
        }
        part.finish().unwrap();
        let (cursor, _) = writer.close().unwrap();

        let mut reader =
            KeyStorePackageReader::open(Cursor::new(cursor.into_inner()), full_context()).unwrap();
        let mut stream = reader.open_part(MODEL_PATH).unwrap().unwrap();
        let mut plain = Vec::new();
        let mut buf = vec![0u8; write_size];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            plain.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(plain, payload);
    }

    #[test]
    fn prop_ciphertext_differs_from_plaintext(payload in prop::collection::vec(any::<u8>(), 32..4096)) {
        let mut writer = KeyStorePackageWriter::new(
            Cursor::new(Vec::new()),
            model_keystore(Compression::None),
            full_context(),
        )
        .unwrap();
        writer.write_part(MODEL_PATH, &payload).unwrap();
        let (cursor, _) = writer.close().unwrap();

        let raw = read_entry(&cursor.into_inner(), "3D/model.bin");
        prop_assert_eq!(raw.len(), payload.len());
        prop_assert_ne!(raw, payload);
    }
}
