//! Single-file container of named, typed arrays.
//!
//! ## Binary format
//!
//! ```text
//! [magic: b"SVQA"][version: u32][manifest_len: u32][payload_len: u64]
//! [manifest: JSON]
//! [deflated payload bytes...]
//! [checksum: u64]   xxh3 of every byte before it
//! ```
//!
//! The manifest lists every array as `{name, dtype, shape, offset, len}`
//! with `offset`/`len` in bytes relative to the start of the inflated
//! payload, which must come out at exactly `payload_len` bytes. Values are
//! little-endian: `f16` and `i16` take 2 bytes, `f32` takes 4. Manifest
//! values are checked for overflow on read even when the checksum matches.

use std::io::{Read, Write};
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use half::f16;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, VqError};

const MAGIC: &[u8; 4] = b"SVQA";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;
const CHECKSUM_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    F32,
    I16,
}

impl DType {
    pub fn size(self) -> usize {
        match self {
            DType::F16 | DType::I16 => 2,
            DType::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayEntry {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub len: usize,
}

impl ArrayEntry {
    /// Shape product, `None` on overflow.
    fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Reject entries whose shape, byte length and payload span disagree.
    fn check(&self, payload_len: usize) -> Result<()> {
        let bytes = self
            .element_count()
            .and_then(|c| c.checked_mul(self.dtype.size()));
        if bytes != Some(self.len) {
            return Err(VqError::CorruptArtifact(format!(
                "array {}: shape {:?} disagrees with byte length {}",
                self.name, self.shape, self.len
            )));
        }
        match self.offset.checked_add(self.len) {
            Some(end) if end <= payload_len => Ok(()),
            _ => Err(VqError::CorruptArtifact(format!(
                "array {} extends past the payload",
                self.name
            ))),
        }
    }
}

/// Accumulates arrays, then emits the finished container.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    entries: Vec<ArrayEntry>,
    payload: BytesMut,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&mut self, name: &str, dtype: DType, shape: &[usize], count: usize) -> Result<()> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(VqError::Validation(format!("duplicate array name: {name}")));
        }
        let expected: usize = shape.iter().product();
        if expected != count {
            return Err(VqError::Validation(format!(
                "array {name}: shape {shape:?} holds {expected} values, got {count}"
            )));
        }
        self.entries.push(ArrayEntry {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            offset: self.payload.len(),
            len: count * dtype.size(),
        });
        Ok(())
    }

    pub fn put_f16(&mut self, name: &str, shape: &[usize], values: &[f16]) -> Result<()> {
        self.begin(name, DType::F16, shape, values.len())?;
        for v in values {
            self.payload.put_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    pub fn put_f32(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<()> {
        self.begin(name, DType::F32, shape, values.len())?;
        for &v in values {
            self.payload.put_f32_le(v);
        }
        Ok(())
    }

    pub fn put_i16(&mut self, name: &str, shape: &[usize], values: &[i16]) -> Result<()> {
        self.begin(name, DType::I16, shape, values.len())?;
        for &v in values {
            self.payload.put_i16_le(v);
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Bytes> {
        let manifest = serde_json::to_vec(&self.entries)?;
        let manifest_len = u32::try_from(manifest.len()).map_err(|_| {
            VqError::Validation(format!("manifest of {} bytes is too large", manifest.len()))
        })?;
        let deflated = deflate(&self.payload)?;

        let mut buf =
            BytesMut::with_capacity(HEADER_LEN + manifest.len() + deflated.len() + CHECKSUM_LEN);
        buf.put_slice(MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u32_le(manifest_len);
        buf.put_u64_le(self.payload.len() as u64);
        buf.put_slice(&manifest);
        buf.put_slice(&deflated);
        let checksum = xxh3_64(&buf);
        buf.put_u64_le(checksum);

        debug!(
            arrays = self.entries.len(),
            payload_bytes = self.payload.len(),
            deflated_bytes = deflated.len(),
            "archive serialized"
        );
        Ok(buf.freeze())
    }
}

/// A parsed, checksum-verified container.
#[derive(Debug, Clone)]
pub struct Archive {
    entries: Vec<ArrayEntry>,
    payload: Bytes,
}

impl Archive {
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(VqError::CorruptArtifact(
                "archive too small for header".into(),
            ));
        }
        if &data[0..4] != MAGIC {
            return Err(VqError::CorruptArtifact("bad archive magic".into()));
        }
        let version = read_u32(&data[4..8])?;
        if version != VERSION {
            return Err(VqError::CorruptArtifact(format!(
                "unsupported archive version {version}"
            )));
        }
        let manifest_len = read_u32(&data[8..12])? as usize;
        let payload_len = u64::from_le_bytes(
            data[12..20]
                .try_into()
                .map_err(|_| VqError::CorruptArtifact("header parse error".into()))?,
        );
        let payload_end = data.len() - CHECKSUM_LEN;
        let payload_start = match HEADER_LEN.checked_add(manifest_len) {
            Some(start) if start <= payload_end => start,
            _ => {
                return Err(VqError::CorruptArtifact(
                    "archive truncated inside manifest".into(),
                ))
            }
        };

        let stored = u64::from_le_bytes(
            data[payload_end..]
                .try_into()
                .map_err(|_| VqError::CorruptArtifact("checksum parse error".into()))?,
        );
        let actual = xxh3_64(&data[..payload_end]);
        if stored != actual {
            return Err(VqError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let entries: Vec<ArrayEntry> = serde_json::from_slice(&data[HEADER_LEN..payload_start])
            .map_err(|e| VqError::CorruptArtifact(format!("unreadable manifest: {e}")))?;
        let payload = Bytes::from(inflate(&data[payload_start..payload_end], payload_len)?);
        for entry in &entries {
            entry.check(payload.len())?;
        }

        Ok(Self { entries, payload })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(Bytes::from(data))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entry(&self, name: &str) -> Result<&ArrayEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| VqError::CorruptArtifact(format!("missing array: {name}")))
    }

    fn raw(&self, name: &str, dtype: DType) -> Result<(&ArrayEntry, &[u8])> {
        let entry = self.entry(name)?;
        if entry.dtype != dtype {
            return Err(VqError::CorruptArtifact(format!(
                "array {name} is {:?}, expected {dtype:?}",
                entry.dtype
            )));
        }
        Ok((entry, &self.payload[entry.offset..entry.offset + entry.len]))
    }

    pub fn f16(&self, name: &str) -> Result<(Vec<usize>, Vec<f16>)> {
        let (entry, raw) = self.raw(name, DType::F16)?;
        let values = raw
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok((entry.shape.clone(), values))
    }

    pub fn f32(&self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let (entry, raw) = self.raw(name, DType::F32)?;
        let values = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok((entry.shape.clone(), values))
    }

    pub fn i16(&self, name: &str) -> Result<(Vec<usize>, Vec<i16>)> {
        let (entry, raw) = self.raw(name, DType::I16)?;
        let values = raw
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok((entry.shape.clone(), values))
    }
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

/// Inflate a payload that must decode to exactly `expected` bytes.
fn inflate(stored: &[u8], expected: u64) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    DeflateDecoder::new(stored)
        .take(expected.saturating_add(1))
        .read_to_end(&mut raw)
        .map_err(|e| VqError::CorruptArtifact(format!("payload does not inflate: {e}")))?;
    if raw.len() as u64 != expected {
        return Err(VqError::CorruptArtifact(format!(
            "payload inflates to {} bytes, header says {expected}",
            raw.len()
        )));
    }
    Ok(raw)
}

fn read_u32(b: &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(b.try_into().map_err(|_| {
        VqError::CorruptArtifact("header parse error".into())
    })?))
}

/// Write `bytes` to `path`.
pub fn write(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    std::fs::write(path.as_ref(), bytes)?;
    Ok(())
}
