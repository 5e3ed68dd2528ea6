//! Cueball: fixed-width hash-indexed partition files
//!
//! File layout:
//! `[records][block index][footer]`
//! - record: `[digest: key_hash_size][value: value_size]`, fixed width
//! - block index: `2^hash_index_bits` u64 LE offsets into the record region,
//!   one per block, `u64::MAX` for an empty block
//! - footer: `[data_end: u64 LE][hash_index_bits: u32 LE]`
//!   `[key_hash_size: u32 LE][value_size: u32 LE][MAGIC: 8]`
//!
//! A record's block is the big-endian integer formed by the leading
//! `hash_index_bits / 8` bytes of its digest, so lexicographic digest order
//! is (block, intra-block) order and a single ordering check on the full
//! digest enforces both.

use crate::common::{Error, Result};
use crate::storage::{Hasher, PartitionFileOps};
use std::io::{BufWriter, Write};
use std::sync::Arc;

const CUEBALL_MAGIC: &[u8; 8] = b"CUEBALL1";

/// Offset sentinel for a block with no records
const EMPTY_BLOCK: u64 = u64::MAX;

/// Storage-engine factory for one domain's cueball files.
pub struct Cueball {
    key_hash_size: usize,
    value_size: usize,
    hash_index_bits: u32,
    hasher: Arc<dyn Hasher>,
}

impl Cueball {
    pub fn new(
        key_hash_size: usize,
        value_size: usize,
        hash_index_bits: u32,
        hasher: Arc<dyn Hasher>,
    ) -> Result<Self> {
        if hash_index_bits == 0 || hash_index_bits % 8 != 0 {
            return Err(Error::InvalidConfig(format!(
                "hash_index_bits must be a non-zero multiple of 8, got {hash_index_bits}"
            )));
        }
        if hash_index_bits > 24 {
            return Err(Error::InvalidConfig(format!(
                "hash_index_bits too large: {hash_index_bits}"
            )));
        }
        if key_hash_size < (hash_index_bits / 8) as usize {
            return Err(Error::InvalidConfig(format!(
                "key_hash_size {key_hash_size} shorter than the {hash_index_bits}-bit block prefix"
            )));
        }
        if value_size == 0 {
            return Err(Error::InvalidConfig("value_size must be non-zero".into()));
        }
        Ok(Self {
            key_hash_size,
            value_size,
            hash_index_bits,
            hasher,
        })
    }

    /// Open a writer for one partition of one domain version.
    pub fn writer(
        &self,
        domain_version_number: i32,
        file_ops: &dyn PartitionFileOps,
    ) -> Result<CueballWriter> {
        let file_name = format!("{domain_version_number:05}.base.cueball");
        let out = file_ops.open_output(&file_name)?;
        Ok(CueballWriter {
            out: BufWriter::new(out),
            key_hash_size: self.key_hash_size,
            value_size: self.value_size,
            block_offsets: vec![EMPTY_BLOCK; 1usize << self.hash_index_bits],
            hash_index_bits: self.hash_index_bits,
            hasher: Arc::clone(&self.hasher),
            last_digest: None,
            offset: 0,
            records_written: 0,
        })
    }
}

/// Totals reported by a closed writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterSummary {
    pub num_records: u64,
    /// Bytes in the record region (index and footer excluded).
    pub num_bytes: u64,
}

/// Writer for one partition file. Records must arrive in ascending digest
/// order; closing flushes the block index and footer and consumes the
/// writer, so a file is closed exactly once.
pub struct CueballWriter {
    out: BufWriter<Box<dyn Write + Send>>,
    key_hash_size: usize,
    value_size: usize,
    hash_index_bits: u32,
    hasher: Arc<dyn Hasher>,
    block_offsets: Vec<u64>,
    last_digest: Option<Vec<u8>>,
    offset: u64,
    records_written: u64,
}

impl CueballWriter {
    /// Append one record.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() != self.value_size {
            return Err(Error::Internal(format!(
                "value is {} bytes, writer is fixed at {}",
                value.len(),
                self.value_size
            )));
        }
        let mut digest = vec![0u8; self.key_hash_size];
        self.hasher.hash(key, &mut digest);

        if let Some(last) = &self.last_digest {
            if digest < *last {
                return Err(Error::OutOfOrderWrite(format!(
                    "digest {} after {}",
                    hex_prefix(&digest),
                    hex_prefix(last)
                )));
            }
        }

        let block = self.block_of(&digest);
        if self.block_offsets[block] == EMPTY_BLOCK {
            self.block_offsets[block] = self.offset;
        }

        self.out.write_all(&digest)?;
        self.out.write_all(value)?;
        self.offset += (self.key_hash_size + self.value_size) as u64;
        self.records_written += 1;
        self.last_digest = Some(digest);
        Ok(())
    }

    /// Flush the block index and footer. Consumes the writer.
    pub fn close(mut self) -> Result<WriterSummary> {
        let data_end = self.offset;
        for block_offset in &self.block_offsets {
            self.out.write_all(&block_offset.to_le_bytes())?;
        }
        self.out.write_all(&data_end.to_le_bytes())?;
        self.out.write_all(&self.hash_index_bits.to_le_bytes())?;
        self.out.write_all(&(self.key_hash_size as u32).to_le_bytes())?;
        self.out.write_all(&(self.value_size as u32).to_le_bytes())?;
        self.out.write_all(CUEBALL_MAGIC)?;
        self.out.flush()?;
        tracing::debug!(
            records = self.records_written,
            bytes = data_end,
            blocks = self.block_offsets.len(),
            "closed cueball writer"
        );
        Ok(WriterSummary {
            num_records: self.records_written,
            num_bytes: data_end,
        })
    }

    fn block_of(&self, digest: &[u8]) -> usize {
        let prefix_bytes = (self.hash_index_bits / 8) as usize;
        digest[..prefix_bytes]
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | *byte as usize)
    }
}

fn hex_prefix(digest: &[u8]) -> String {
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
