//! Storage-engine write path
//!
//! The serving data plane lives elsewhere; this module carries the write
//! contract: per partition, a writer accepts `(key, value)` records, hashes
//! fixed-size keys to a fixed-width digest, and lays the records out in
//! hash-indexed blocks (see [`cueball`]).

pub mod cueball;

pub use cueball::{Cueball, CueballWriter, WriterSummary};

use crate::common::Result;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Fixed-width key hasher.
pub trait Hasher: Send + Sync {
    /// Fill `digest` with the hash of `key`. The digest width is the
    /// caller's `key_hash_size`.
    fn hash(&self, key: &[u8], digest: &mut [u8]);
}

/// Default hasher: BLAKE3 extended output truncated to the digest width.
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    fn hash(&self, key: &[u8], digest: &mut [u8]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key);
        hasher.finalize_xof().fill(digest);
    }
}

/// Access to one partition's remote files.
pub trait PartitionFileOps: Send + Sync {
    /// Open `file_name` in the partition's directory for writing.
    fn open_output(&self, file_name: &str) -> Result<Box<dyn Write + Send>>;
}

/// Partition files on the local filesystem, under `<root>/<partition>/`.
pub struct LocalPartitionFileOps {
    root: PathBuf,
    partition_number: u32,
}

impl LocalPartitionFileOps {
    pub fn new(root: impl Into<PathBuf>, partition_number: u32) -> Self {
        Self {
            root: root.into(),
            partition_number,
        }
    }

    pub fn partition_root(&self) -> PathBuf {
        self.root.join(self.partition_number.to_string())
    }
}

impl PartitionFileOps for LocalPartitionFileOps {
    fn open_output(&self, file_name: &str) -> Result<Box<dyn Write + Send>> {
        let dir = self.partition_root();
        fs::create_dir_all(&dir)?;
        let file = fs::File::create(dir.join(file_name))?;
        Ok(Box::new(file))
    }
}
