//! Filesystem-safe record-id codec
//!
//! Record ids are arbitrary user strings but have to double as file names.
//! Encoding is standard-alphabet Base64 with the one path-hostile output
//! character (`/`) swapped for `$`. The mapping is a bijection, so on-disk
//! names decode back to the exact original id.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::common::error::{Error, Result};

/// Encode a record id for use as an on-disk file name.
pub fn encode(key: &str) -> String {
    STANDARD.encode(key.as_bytes()).replace('/', "$")
}

/// Decode an on-disk file name back into the record id.
pub fn decode(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.replace('$', "/"))
        .map_err(|e| Error::MalformedPayload(format!("not a filesystem-safe key: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::MalformedPayload(format!("key is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for key in [
            "k1",
            "hello world",
            "with/slashes/inside",
            "ünïcödé-キー",
            "",
            "a?b&c=d#e",
        ] {
            assert_eq!(decode(&encode(key)).unwrap(), key);
        }
    }

    #[test]
    fn test_output_has_no_path_separators() {
        // ">>>" encodes to "Pj4+", "???" to "Pz8/" - the latter exercises
        // the '/' substitution.
        let encoded = encode("???");
        assert!(!encoded.contains('/'));
        assert!(encoded.contains('$'));
        assert_eq!(decode(&encoded).unwrap(), "???");
    }

    #[test]
    fn test_distinct_keys_encode_distinctly() {
        assert_ne!(encode("a"), encode("b"));
        assert_ne!(encode("ab"), encode("a"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not base64 at all!").is_err());
    }
}
