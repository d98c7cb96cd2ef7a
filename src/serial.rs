//! Binary persistence of a repository's cached feature payloads.
//!
//! A host can write the cache on shutdown and restore it on start, so the
//! first evaluations run against real features before any fetch completes.
//! The format is a 32-byte fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"GKFC"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! decoding fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.
//!
//! Feature payloads are stored as JSON text: bincode is not self-describing,
//! and recompiling on import keeps the stored form independent of the
//! compiled representation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::repository::{EntryExport, FeatureRepository};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"GKFC";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when writing a feature cache.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode feature cache: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to encode features as json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when reading a feature cache.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a gatekeep cache: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedCache {
    metadata: CacheMetadata,
    entries: Vec<SerializedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    entry_count: usize,
    feature_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedEntry {
    key: String,
    features_json: String,
    date_updated: Option<String>,
    /// Milliseconds since the entry was fetched; `None` when already stale.
    age_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Entries <-> SerializedCache
// ---------------------------------------------------------------------------

fn entries_to_serialized(entries: &[EntryExport]) -> Result<SerializedCache, serde_json::Error> {
    let serialized = entries
        .iter()
        .map(|entry| {
            Ok(SerializedEntry {
                key: entry.key.clone(),
                features_json: serde_json::to_string(&*entry.features)?,
                date_updated: entry.date_updated.clone(),
                age_ms: entry
                    .age
                    .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
            })
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()?;

    Ok(SerializedCache {
        metadata: CacheMetadata {
            entry_count: serialized.len(),
            feature_count: entries.iter().map(|e| e.features.len()).sum(),
        },
        entries: serialized,
    })
}

fn serialized_to_entries(ser: SerializedCache) -> Result<Vec<EntryExport>, DeserializeError> {
    validate(&ser)?;

    let mut features_seen = 0;
    let entries = ser
        .entries
        .into_iter()
        .map(|entry| {
            let features: Map<String, Value> =
                serde_json::from_str(&entry.features_json).map_err(|e| {
                    DeserializeError::Validation(format!(
                        "entry '{}' does not hold a features object: {e}",
                        entry.key
                    ))
                })?;
            features_seen += features.len();
            Ok(EntryExport {
                key: entry.key,
                features: Arc::new(features),
                date_updated: entry.date_updated,
                age: entry.age_ms.map(Duration::from_millis),
            })
        })
        .collect::<Result<Vec<_>, DeserializeError>>()?;

    if features_seen != ser.metadata.feature_count {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} features but payload has {}",
            ser.metadata.feature_count, features_seen
        )));
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(ser: &SerializedCache) -> Result<(), DeserializeError> {
    if ser.metadata.entry_count != ser.entries.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} entries but payload has {}",
            ser.metadata.entry_count,
            ser.entries.len()
        )));
    }

    let mut keys = HashSet::with_capacity(ser.entries.len());
    for entry in &ser.entries {
        if !entry.key.contains("||") {
            return Err(DeserializeError::Validation(format!(
                "cache key '{}' is not of the form host||client-key",
                entry.key
            )));
        }
        if !keys.insert(entry.key.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "duplicate cache key '{}'",
                entry.key
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) {
    let hash = blake3::hash(payload);
    let hash_bytes = hash.as_bytes();

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    #[allow(clippy::cast_possible_truncation)] // payload will never exceed 4 GiB
    let payload_len = payload.len() as u32;
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash_bytes[..16]);
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<(u16, u32, [u8; 16]), DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);

    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Encode/decode
// ---------------------------------------------------------------------------

fn encode(entries: &[EntryExport]) -> Result<Vec<u8>, SerializeError> {
    let serialized = entries_to_serialized(entries)?;
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode(bytes: &[u8]) -> Result<Vec<EntryExport>, DeserializeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload_end = HEADER_SIZE + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        });
    }
    let payload = &bytes[HEADER_SIZE..payload_end];

    let computed_hash = blake3::hash(payload);
    if computed_hash.as_bytes()[..16] != stored_hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, _): (SerializedCache, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    serialized_to_entries(serialized)
}

// ---------------------------------------------------------------------------
// Repository API
// ---------------------------------------------------------------------------

impl FeatureRepository {
    /// Serialize every cached payload.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`] if encoding fails.
    pub fn export_cache(&self) -> Result<Vec<u8>, SerializeError> {
        encode(&self.export_entries())
    }

    /// Restore payloads written by [`export_cache`](Self::export_cache).
    /// Returns the number of entries restored.
    ///
    /// Restored entries keep their age, so ones that were already stale are
    /// refetched on the next load. An entry never replaces a cached payload
    /// with a newer `dateUpdated`.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`] on format, integrity, or validation
    /// failure. Nothing is restored in that case.
    pub fn import_cache(&self, bytes: &[u8]) -> Result<usize, DeserializeError> {
        let entries = decode(bytes)?;
        let count = entries.len();
        for entry in entries {
            self.import_entry(entry);
        }
        tracing::debug!(entries = count, "restored feature cache");
        Ok(count)
    }

    /// Write [`export_cache`](Self::export_cache) output to a file.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`] on encoding or I/O failure.
    pub fn export_cache_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), SerializeError> {
        let bytes = self.export_cache()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read a file and restore the cache it contains.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`] on I/O, format, integrity, or validation
    /// failure.
    pub fn import_cache_file(&self, path: impl AsRef<std::path::Path>) -> Result<usize, DeserializeError> {
        let bytes = std::fs::read(path)?;
        self.import_cache(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
