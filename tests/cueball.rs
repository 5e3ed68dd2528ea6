//! Cueball writer end-to-end over the local filesystem

use hank::storage::{Blake3Hasher, Cueball, Hasher, LocalPartitionFileOps};
use std::sync::Arc;
use tempfile::TempDir;

const KEY_HASH_SIZE: usize = 20;
const VALUE_SIZE: usize = 16;
const HASH_INDEX_BITS: u32 = 8;

#[test]
fn test_write_partition_file_with_blake3_digests() {
    let dir = TempDir::new().unwrap();
    let file_ops = LocalPartitionFileOps::new(dir.path(), 0);
    let cueball = Cueball::new(
        KEY_HASH_SIZE,
        VALUE_SIZE,
        HASH_INDEX_BITS,
        Arc::new(Blake3Hasher),
    )
    .unwrap();

    // The write contract wants ascending digest order, so sort the keys by
    // digest first, the way a partition sorter feeding the writer would.
    let hasher = Blake3Hasher;
    let mut keyed: Vec<(Vec<u8>, Vec<u8>)> = (0u64..1000)
        .map(|i| {
            let key = i.to_le_bytes().to_vec();
            let mut digest = vec![0u8; KEY_HASH_SIZE];
            hasher.hash(&key, &mut digest);
            (digest, key)
        })
        .collect();
    keyed.sort();

    let mut writer = cueball.writer(7, &file_ops).unwrap();
    for (_digest, key) in &keyed {
        writer.write(key, &[0u8; VALUE_SIZE]).unwrap();
    }
    let summary = writer.close().unwrap();

    assert_eq!(summary.num_records, 1000);
    assert_eq!(
        summary.num_bytes,
        1000 * (KEY_HASH_SIZE + VALUE_SIZE) as u64
    );

    let file_path = dir.path().join("0").join("00007.base.cueball");
    let bytes = std::fs::read(&file_path).unwrap();
    let record_region = summary.num_bytes as usize;
    let index_region = (1usize << HASH_INDEX_BITS) * 8;
    let footer = 8 + 4 + 4 + 4 + 8;
    assert_eq!(bytes.len(), record_region + index_region + footer);
    assert_eq!(&bytes[bytes.len() - 8..], b"CUEBALL1");

    // Digests in the record region ascend globally, hence per block.
    let record_size = KEY_HASH_SIZE + VALUE_SIZE;
    let mut previous: Option<&[u8]> = None;
    for record in 0..1000 {
        let at = record * record_size;
        let digest = &bytes[at..at + KEY_HASH_SIZE];
        if let Some(previous) = previous {
            assert!(previous <= digest);
        }
        previous = Some(digest);
    }
}

#[test]
fn test_unsorted_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let file_ops = LocalPartitionFileOps::new(dir.path(), 0);
    let cueball = Cueball::new(
        KEY_HASH_SIZE,
        VALUE_SIZE,
        HASH_INDEX_BITS,
        Arc::new(Blake3Hasher),
    )
    .unwrap();

    // Find two keys whose digests are out of order, write them that way.
    let hasher = Blake3Hasher;
    let mut a = vec![0u8; KEY_HASH_SIZE];
    let mut b = vec![0u8; KEY_HASH_SIZE];
    hasher.hash(b"first", &mut a);
    hasher.hash(b"second", &mut b);
    let (low, high): (&[u8], &[u8]) = if a < b {
        (b"first", b"second")
    } else {
        (b"second", b"first")
    };

    let mut writer = cueball.writer(0, &file_ops).unwrap();
    writer.write(high, &[0u8; VALUE_SIZE]).unwrap();
    assert!(writer.write(low, &[0u8; VALUE_SIZE]).is_err());
}
