//! Byte-level delta capability.
//!
//! The pipeline only needs [`DeltaEncoder`]: given two files, produce a delta
//! blob whose length is what the library matcher minimises. [`BlockDelta`] is
//! the shipped implementation, an rsync-style block matcher:
//! 1. Split the source into fixed-size blocks and index them by a rolling
//!    Adler-32 checksum, with BLAKE3 as the strong check
//! 2. Slide a window over the target, emitting `Copy` for indexed blocks and
//!    `Insert` for everything else
//! 3. Serialize the chunk list with bincode and compress it with zstd

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::config::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{PatchError, Result};
use crate::tree::Contents;

pub const DELTA_MAGIC: &[u8; 8] = b"TDDELTA1";
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// An encoded delta blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    bytes: Vec<u8>,
}

impl Delta {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Produces a delta that rebuilds `target` from `source`. Must be deterministic.
pub trait DeltaEncoder: Send + Sync {
    fn diff(&self, source: &Path, target: &Path) -> Result<Delta>;

    /// Size of the delta `diff` would produce. Probes only need the size.
    fn probe(&self, source: &Path, target: &Path) -> Result<u64> {
        Ok(self.diff(source, target)?.size())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chunk {
    Copy { offset: u64, length: u64 },
    Insert { data: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize)]
struct DeltaBody {
    target_len: u64,
    target_hash: [u8; 32],
    chunks: Vec<Chunk>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing delta header")]
    BadMagic,
    #[error("corrupt delta body: {0}")]
    Corrupt(String),
    #[error("copy range {offset}+{length} outside source of {source_len} bytes")]
    OutOfRange {
        offset: u64,
        length: u64,
        source_len: usize,
    },
    #[error("reconstructed file does not match the recorded length or hash")]
    Mismatch,
}

/// Rolling-hash block matcher with zstd-compressed output.
#[derive(Debug, Clone)]
pub struct BlockDelta {
    block_size: usize,
    level: i32,
}

impl Default for BlockDelta {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl BlockDelta {
    pub fn new(level: i32) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            level,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Encode the delta between two in-memory buffers.
    pub fn encode(&self, source: &[u8], target: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let body = DeltaBody {
            target_len: target.len() as u64,
            target_hash: *blake3::hash(target).as_bytes(),
            chunks: compute_chunks(source, target, self.block_size),
        };
        let encoded = bincode::serialize(&body).map_err(|e| e.to_string())?;
        let compressed = zstd::bulk::compress(&encoded, self.level).map_err(|e| e.to_string())?;

        let mut out = Vec::with_capacity(DELTA_MAGIC.len() + compressed.len());
        out.extend_from_slice(DELTA_MAGIC);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Rebuild the target from `source` and a blob produced by [`BlockDelta::encode`].
    /// The result is checked against the length and hash recorded in the blob.
    pub fn apply(source: &[u8], delta: &[u8]) -> std::result::Result<Vec<u8>, DecodeError> {
        let body = delta
            .strip_prefix(DELTA_MAGIC.as_slice())
            .ok_or(DecodeError::BadMagic)?;
        let decoder = zstd::Decoder::new(body).map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        let body: DeltaBody =
            bincode::deserialize_from(decoder).map_err(|e| DecodeError::Corrupt(e.to_string()))?;

        let mut out = Vec::new();
        for chunk in &body.chunks {
            match chunk {
                Chunk::Copy { offset, length } => {
                    let range = usize::try_from(*offset)
                        .ok()
                        .zip(usize::try_from(*length).ok())
                        .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                        .filter(|r| r.end <= source.len())
                        .ok_or(DecodeError::OutOfRange {
                            offset: *offset,
                            length: *length,
                            source_len: source.len(),
                        })?;
                    out.extend_from_slice(&source[range]);
                }
                Chunk::Insert { data } => out.extend_from_slice(data),
            }
        }

        if out.len() as u64 != body.target_len || *blake3::hash(&out).as_bytes() != body.target_hash
        {
            return Err(DecodeError::Mismatch);
        }
        Ok(out)
    }
}

impl DeltaEncoder for BlockDelta {
    fn diff(&self, source: &Path, target: &Path) -> Result<Delta> {
        let old = Contents::open(source)?;
        let new = Contents::open(target)?;
        self.encode(&old, &new)
            .map(Delta::new)
            .map_err(|reason| PatchError::Delta {
                source_path: source.to_path_buf(),
                target_path: target.to_path_buf(),
                reason,
            })
    }
}

const MOD_ADLER: u64 = 65521;

/// Adler-32 style checksum over a fixed-width window, updatable in O(1) as the
/// window slides by one byte.
#[derive(Debug, Clone, Copy)]
struct Adler {
    a: u64,
    b: u64,
    width: u64,
}

impl Adler {
    fn over(window: &[u8]) -> Self {
        let (mut a, mut b) = (1u64, 0u64);
        for &byte in window {
            a += u64::from(byte);
            b += a;
        }
        Self {
            a: a % MOD_ADLER,
            b: b % MOD_ADLER,
            width: window.len() as u64,
        }
    }

    /// Drop `out` from the front of the window and append `inp` at the back.
    fn roll(&mut self, out: u8, inp: u8) {
        let out = u64::from(out);
        self.a = (self.a + MOD_ADLER - out + u64::from(inp)) % MOD_ADLER;
        let shed = (out * self.width + 1) % MOD_ADLER;
        self.b = (self.b + self.a + MOD_ADLER - shed) % MOD_ADLER;
    }

    fn value(&self) -> u32 {
        ((self.b as u32) << 16) | self.a as u32
    }
}

/// Full-size source blocks indexed by weak checksum.
struct BlockIndex {
    by_weak: HashMap<u32, Vec<(blake3::Hash, u64)>>,
}

impl BlockIndex {
    fn build(source: &[u8], block: usize) -> Self {
        let mut by_weak: HashMap<u32, Vec<(blake3::Hash, u64)>> =
            HashMap::with_capacity(source.len() / block + 1);
        for (i, chunk) in source.chunks_exact(block).enumerate() {
            by_weak
                .entry(Adler::over(chunk).value())
                .or_default()
                .push((blake3::hash(chunk), (i * block) as u64));
        }
        Self { by_weak }
    }

    fn find(&self, weak: u32, window: &[u8]) -> Option<u64> {
        let candidates = self.by_weak.get(&weak)?;
        let strong = blake3::hash(window);
        candidates
            .iter()
            .find(|(hash, _)| *hash == strong)
            .map(|(_, offset)| *offset)
    }
}

/// Accumulates chunks, coalescing adjacent copies and literal runs.
#[derive(Default)]
struct ChunkWriter {
    chunks: Vec<Chunk>,
    literal: Vec<u8>,
}

impl ChunkWriter {
    fn copy(&mut self, offset: u64, length: u64) {
        self.flush_literal();
        if let Some(Chunk::Copy {
            offset: prev,
            length: prev_len,
        }) = self.chunks.last_mut()
        {
            if *prev + *prev_len == offset {
                *prev_len += length;
                return;
            }
        }
        self.chunks.push(Chunk::Copy { offset, length });
    }

    fn literal(&mut self, bytes: &[u8]) {
        self.literal.extend_from_slice(bytes);
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.chunks.push(Chunk::Insert {
                data: std::mem::take(&mut self.literal),
            });
        }
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush_literal();
        self.chunks
    }
}

fn compute_chunks(source: &[u8], target: &[u8], block: usize) -> Vec<Chunk> {
    let mut out = ChunkWriter::default();
    if source.len() < block || target.len() < block {
        out.literal(target);
        return out.finish();
    }

    let index = BlockIndex::build(source, block);
    let mut pos = 0;
    let mut window = Adler::over(&target[..block]);

    while pos + block <= target.len() {
        if let Some(offset) = index.find(window.value(), &target[pos..pos + block]) {
            out.copy(offset, block as u64);
            pos += block;
            if pos + block <= target.len() {
                window = Adler::over(&target[pos..pos + block]);
            }
        } else {
            out.literal(&target[pos..pos + 1]);
            if pos + block < target.len() {
                window.roll(target[pos], target[pos + block]);
            }
            pos += 1;
        }
    }

    out.literal(&target[pos..]);
    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 64;

    fn encoder() -> BlockDelta {
        BlockDelta::default().with_block_size(BLOCK)
    }

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i / 7) as u8)
            .collect()
    }

    fn rebuild(source: &[u8], target: &[u8]) -> Vec<u8> {
        let blob = encoder().encode(source, target).unwrap();
        BlockDelta::apply(source, &blob).unwrap()
    }

    #[test]
    fn test_rolling_matches_fresh_window() {
        let data = patterned(300, 3);
        let mut rolling = Adler::over(&data[0..BLOCK]);
        for start in 1..=(data.len() - BLOCK) {
            rolling.roll(data[start - 1], data[start + BLOCK - 1]);
            assert_eq!(
                rolling.value(),
                Adler::over(&data[start..start + BLOCK]).value(),
                "window at {start}"
            );
        }
    }

    #[test]
    fn test_identical_data_is_one_copy() {
        let data = patterned(BLOCK * 8, 1);
        let chunks = compute_chunks(&data, &data, BLOCK);
        assert_eq!(
            chunks,
            vec![Chunk::Copy {
                offset: 0,
                length: (BLOCK * 8) as u64
            }]
        );
        assert_eq!(rebuild(&data, &data), data);
    }

    #[test]
    fn test_insertion_in_middle() {
        let old = patterned(BLOCK * 6, 9);
        let mut new = old.clone();
        new.splice(BLOCK * 3..BLOCK * 3, vec![0xAA; 17]);

        let chunks = compute_chunks(&old, &new, BLOCK);
        let copied: u64 = chunks
            .iter()
            .map(|c| match c {
                Chunk::Copy { length, .. } => *length,
                Chunk::Insert { .. } => 0,
            })
            .sum();
        assert_eq!(copied, (BLOCK * 6) as u64);
        assert_eq!(rebuild(&old, &new), new);
    }

    #[test]
    fn test_small_and_empty_inputs() {
        assert_eq!(rebuild(b"", b"brand new"), b"brand new");
        assert_eq!(rebuild(b"old stuff", b""), b"");
        assert_eq!(rebuild(b"Hello, World!", b"Hello, Rust!"), b"Hello, Rust!");
    }

    #[test]
    fn test_similar_source_gives_smaller_delta() {
        let target = patterned(BLOCK * 64, 5);
        let mut close = target.clone();
        close[BLOCK * 10] ^= 0xFF;
        let far = patterned(BLOCK * 64, 200);

        let enc = encoder();
        let near_size = enc.encode(&close, &target).unwrap().len();
        let far_size = enc.encode(&far, &target).unwrap().len();
        assert!(near_size < far_size, "{near_size} >= {far_size}");
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let old = patterned(BLOCK * 10, 2);
        let new = patterned(BLOCK * 12, 2);
        assert_eq!(
            encoder().encode(&old, &new).unwrap(),
            encoder().encode(&old, &new).unwrap()
        );
    }

    #[test]
    fn test_apply_rejects_wrong_source() {
        let old = patterned(BLOCK * 4, 1);
        let new = patterned(BLOCK * 4, 1);
        let blob = encoder().encode(&old, &new).unwrap();
        let wrong = patterned(BLOCK * 4, 2);
        assert!(matches!(
            BlockDelta::apply(&wrong, &blob),
            Err(DecodeError::Mismatch)
        ));
        assert!(matches!(
            BlockDelta::apply(&old[..BLOCK], &blob),
            Err(DecodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_garbage() {
        assert!(matches!(
            BlockDelta::apply(b"", b"not a delta"),
            Err(DecodeError::BadMagic)
        ));
        let mut blob = DELTA_MAGIC.to_vec();
        blob.extend_from_slice(b"\x00\x01\x02");
        assert!(matches!(
            BlockDelta::apply(b"", &blob),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_diff_reads_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let old = dir.path().join("old.bin");
        let new = dir.path().join("new.bin");
        std::fs::write(&old, patterned(BLOCK * 3, 4)).unwrap();
        std::fs::write(&new, patterned(BLOCK * 3, 8)).unwrap();

        let enc = encoder();
        let delta = enc.diff(&old, &new).unwrap();
        assert_eq!(enc.probe(&old, &new).unwrap(), delta.size());
        let rebuilt = BlockDelta::apply(&std::fs::read(&old).unwrap(), delta.as_bytes()).unwrap();
        assert_eq!(rebuilt, std::fs::read(&new).unwrap());

        let missing = enc.diff(&dir.path().join("nope"), &new).unwrap_err();
        assert!(matches!(missing, PatchError::Read { .. }));
    }
}
