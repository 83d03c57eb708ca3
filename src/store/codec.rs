//! Versioned binary encoding of revision payloads.
//!
//! Layout:
//!
//! ```text
//! +--------+-----------+------+---------------------------------+
//! | "RKBR" | version   | kind | body                            |
//! | 4 B    | u16 LE    | u8   | bincode Vec<Triple>, fixint LE  |
//! +--------+-----------+------+---------------------------------+
//! ```
//!
//! The body uses bincode's fixed-width little-endian encoding: strings and
//! sequences carry a `u64` length prefix, enum variants a `u32` tag. Triples
//! are written in sorted order, so two equal sets encode to identical bytes.

use bincode::Options;

use crate::term::Triple;

use super::RevisionKind;

/// File magic for revision payloads.
pub const MAGIC: &[u8; 4] = b"RKBR";

/// Current payload schema version.
pub const SCHEMA_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 1;

/// Why a payload failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a well-formed payload.
    Malformed(String),
    /// The payload was written with a newer schema.
    UnsupportedVersion(u16),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Encode a batch of triples as a revision payload.
pub fn encode(kind: RevisionKind, batch: &[Triple]) -> Result<Vec<u8>, bincode::Error> {
    let mut sorted: Vec<&Triple> = batch.iter().collect();
    sorted.sort();
    sorted.dedup();

    let body = options().serialize(&sorted)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    out.push(kind.tag());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a revision payload into its kind and ordered batch.
pub fn decode(bytes: &[u8]) -> Result<(RevisionKind, Vec<Triple>), DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Malformed(format!(
            "payload is {} bytes, shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    if &bytes[..4] != MAGIC {
        return Err(DecodeError::Malformed("bad magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    if version == 0 {
        return Err(DecodeError::Malformed("schema version 0".into()));
    }
    let kind = RevisionKind::from_tag(bytes[6])
        .ok_or_else(|| DecodeError::Malformed(format!("unknown kind tag {}", bytes[6])))?;
    let batch: Vec<Triple> = options()
        .deserialize(&bytes[HEADER_LEN..])
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok((kind, batch))
}
