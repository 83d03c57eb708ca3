//! Context key ↔ directory name mapping.
//!
//! Every byte outside `[A-Za-z0-9-]` is percent-encoded, so encoded names never
//! contain `_`, `.` or a path separator. The reserved literals below all
//! contain `_` and therefore cannot be produced by encoding a real key.
//!
//! Encodings longer than [`MAX_DIR_NAME`] bytes are replaced by
//! `_h_<encoded prefix>_<sha256 of the key>`. Such a name cannot be inverted
//! on its own; the directory carries a [`KEY_FILE`] holding the full key.

use std::path::Path;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::term::ContextKey;

/// Directory name of the default (unnamed) context.
pub const DEFAULT_CONTEXT_DIR: &str = "_default_";

/// Directory name of the context whose key is the empty string.
pub const EMPTY_CONTEXT_DIR: &str = "_empty_";

/// Name of the staging area under the base directory.
pub const STAGING_DIR: &str = "staging";

/// Longest percent-encoded name used verbatim as a directory name.
pub const MAX_DIR_NAME: usize = 200;

/// File inside a hashed context directory holding the full context name.
pub const KEY_FILE: &str = ".key";

const HASHED_PREFIX: &str = "_h_";
const HASHED_READABLE_LEN: usize = 96;

const CONTEXT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-');

/// Encode a context key as a filesystem-safe directory name.
pub fn encode_context(key: &ContextKey) -> String {
    let Some(name) = key.name() else {
        return DEFAULT_CONTEXT_DIR.to_string();
    };
    if name.is_empty() {
        return EMPTY_CONTEXT_DIR.to_string();
    }
    let encoded = utf8_percent_encode(name, CONTEXT_ENCODE_SET).to_string();
    if encoded.eq_ignore_ascii_case(STAGING_DIR) {
        // Escape the leading byte so the key cannot shadow the staging area.
        let first = encoded.as_bytes()[0];
        return format!("%{first:02X}{}", &encoded[1..]);
    }
    if encoded.len() > MAX_DIR_NAME {
        return hashed_name(name, &encoded);
    }
    encoded
}

/// Whether `dir_name` is a hashed name that needs its [`KEY_FILE`] to decode.
pub fn is_hashed(dir_name: &str) -> bool {
    dir_name.starts_with(HASHED_PREFIX)
}

fn hashed_name(name: &str, encoded: &str) -> String {
    // Cut the readable prefix without splitting a %XX escape.
    let mut cut = HASHED_READABLE_LEN.min(encoded.len());
    if let Some(pos) = encoded[..cut].rfind('%') {
        if pos + 3 > cut {
            cut = pos;
        }
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{HASHED_PREFIX}{}_{digest}", &encoded[..cut])
}

/// Decode a directory name back into its context key.
///
/// Returns `Ok(None)` for the staging directory and for names that belong to
/// the store's own bookkeeping rather than a context.
pub fn decode_context(dir_name: &str) -> Result<Option<ContextKey>, StoreError> {
    match dir_name {
        STAGING_DIR => return Ok(None),
        DEFAULT_CONTEXT_DIR => return Ok(Some(ContextKey::unnamed())),
        EMPTY_CONTEXT_DIR => return Ok(Some(ContextKey::named(""))),
        _ => {}
    }
    let invalid = || StoreError::InvalidContextName {
        name: dir_name.to_string(),
    };
    let name = percent_decode_str(dir_name)
        .decode_utf8()
        .map_err(|_| invalid())?;
    let key = ContextKey::named(name.into_owned());
    // Only canonical encodings are accepted; this keeps the mapping bijective.
    if encode_context(&key) != dir_name {
        return Err(invalid());
    }
    Ok(Some(key))
}

/// Decode the context directory `dir` named `dir_name`.
///
/// Hashed names are resolved through the directory's [`KEY_FILE`]; the stored
/// key must hash back to `dir_name`.
pub fn decode_context_dir(dir: &Path, dir_name: &str) -> Result<Option<ContextKey>, StoreError> {
    if !is_hashed(dir_name) {
        return decode_context(dir_name);
    }
    let invalid = || StoreError::InvalidContextName {
        name: dir_name.to_string(),
    };
    let name = std::fs::read_to_string(dir.join(KEY_FILE)).map_err(|_| invalid())?;
    let key = ContextKey::named(name);
    if encode_context(&key) != dir_name {
        return Err(invalid());
    }
    Ok(Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(key: ContextKey) {
        let dir = encode_context(&key);
        assert!(!dir.is_empty());
        assert!(!dir.contains('/') && !dir.contains('\\'), "{dir}");
        assert_ne!(dir, ".");
        assert_ne!(dir, "..");
        assert_eq!(decode_context(&dir).unwrap(), Some(key));
    }

    #[test]
    fn hostile_names_round_trip() {
        for name in [
            "ctx",
            "http://example.org/graph#1",
            "../../etc/passwd",
            ".",
            "..",
            "_default_",
            "_empty_",
            "100%",
            "spaces and\ttabs",
            "ünïcödé/名前",
            "staging",
            "STAGING",
            "%73taging",
        ] {
            round_trip(ContextKey::named(name));
        }
        round_trip(ContextKey::named(""));
        round_trip(ContextKey::unnamed());
    }

    #[test]
    fn reserved_names_are_distinct() {
        assert_eq!(encode_context(&ContextKey::unnamed()), DEFAULT_CONTEXT_DIR);
        assert_eq!(encode_context(&ContextKey::named("")), EMPTY_CONTEXT_DIR);
        assert_ne!(encode_context(&ContextKey::named("staging")), STAGING_DIR);
        assert_ne!(
            encode_context(&ContextKey::named("_default_")),
            DEFAULT_CONTEXT_DIR
        );
    }

    #[test]
    fn staging_dir_is_not_a_context() {
        assert_eq!(decode_context(STAGING_DIR).unwrap(), None);
    }

    #[test]
    fn non_canonical_names_are_rejected() {
        // "%61" decodes to "a", whose canonical encoding is "a".
        assert!(decode_context("%61").is_err());
        assert!(decode_context("has_underscore").is_err());
        assert!(decode_context("%FF").is_err());
    }

    #[test]
    fn long_names_are_hashed_and_bounded() {
        let cjk = ContextKey::named("知識ベースの名前付きグラフ識別子テスト用の長いコンテキスト名");
        let iri = ContextKey::named(format!("http://example.org/graphs/{}", "segment/".repeat(40)));
        for key in [&cjk, &iri] {
            let dir = encode_context(key);
            assert!(is_hashed(&dir), "{dir}");
            assert!(dir.len() <= MAX_DIR_NAME, "{} bytes", dir.len());
            assert!(!dir.contains('/') && !dir.contains('.'));
            // The name alone is not enough to recover the key.
            assert!(decode_context(&dir).is_err());
        }
        assert_ne!(encode_context(&cjk), encode_context(&iri));

        // Keys sharing a long prefix still get distinct directories.
        let a = ContextKey::named(format!("{}a", "x".repeat(300)));
        let b = ContextKey::named(format!("{}b", "x".repeat(300)));
        assert_ne!(encode_context(&a), encode_context(&b));

        // A name just under the limit stays readable.
        let short = ContextKey::named("y".repeat(MAX_DIR_NAME));
        assert!(!is_hashed(&encode_context(&short)));
        round_trip(short);
    }

    #[test]
    fn hashed_dir_decodes_through_key_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let key = ContextKey::named("名".repeat(40));
        let name = encode_context(&key);
        let dir = tmp.path().join(&name);
        std::fs::create_dir(&dir).unwrap();

        assert!(decode_context_dir(&dir, &name).is_err());
        std::fs::write(dir.join(KEY_FILE), "名".repeat(40)).unwrap();
        assert_eq!(decode_context_dir(&dir, &name).unwrap(), Some(key));

        // A key file that does not hash to the directory name is rejected.
        std::fs::write(dir.join(KEY_FILE), "something else").unwrap();
        assert!(decode_context_dir(&dir, &name).is_err());
    }
}
