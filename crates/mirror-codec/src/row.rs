//! Config database row payloads.
//!
//! Encrypted payloads are the marker character followed by hex ciphertext.
//! Each byte is XORed with two neighbouring bytes of a fixed passphrase.

use crate::{Error, Result};
use std::borrow::Cow;

/// First character of an encrypted row payload.
pub const ROW_MARKER: char = '`';

/// Passphrase shared by every client.
pub const ROW_KEY: &[u8] = b"dpstorm.or.2019.07.24";

fn xor_chain(data: &mut [u8]) {
    let len = ROW_KEY.len();
    for (i, byte) in data.iter_mut().enumerate() {
        let intermediate = ROW_KEY[(i + 1) % len] ^ *byte;
        *byte = ROW_KEY[i % len] ^ intermediate;
    }
}

/// Check whether a payload carries the encryption marker.
pub fn is_encrypted(payload: &str) -> bool {
    payload.starts_with(ROW_MARKER)
}

/// Decode one row payload. Plain payloads are returned unchanged.
pub fn decode_row(payload: &str) -> Result<Cow<'_, str>> {
    let Some(cipher_hex) = payload.strip_prefix(ROW_MARKER) else {
        return Ok(Cow::Borrowed(payload));
    };

    let mut bytes = hex::decode(cipher_hex)
        .map_err(|e| Error::InvalidEncoding(format!("row is not valid hex: {}", e)))?;
    xor_chain(&mut bytes);

    String::from_utf8(bytes)
        .map(Cow::Owned)
        .map_err(|e| Error::InvalidEncoding(format!("row is not valid UTF-8: {}", e)))
}

/// Encode a plaintext row into its marker-prefixed form.
pub fn encode_row(plain: &str) -> String {
    let mut bytes = plain.as_bytes().to_vec();
    xor_chain(&mut bytes);
    let mut out = String::with_capacity(1 + bytes.len() * 2);
    out.push(ROW_MARKER);
    out.push_str(&hex::encode(bytes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_row_untouched() {
        let row = "100#@#Slime";
        assert!(matches!(decode_row(row).unwrap(), Cow::Borrowed("100#@#Slime")));
        assert_eq!(decode_row("").unwrap(), "");
    }

    #[test]
    fn test_encode_then_decode() {
        for plain in ["100#@#Slime", "", "{\"a\":[1,2]}#@#名前", "x"] {
            let encoded = encode_row(plain);
            assert!(is_encrypted(&encoded));
            assert_eq!(decode_row(&encoded).unwrap(), plain);
        }
    }

    #[test]
    fn test_known_ciphertext() {
        // 'd' ^ 'p' ^ 'A' = 0x55, 'p' ^ 's' ^ 'B' = 0x41
        assert_eq!(encode_row("AB"), "`5541");
        assert_eq!(decode_row("`5541").unwrap(), "AB");
    }

    #[test]
    fn test_bad_hex() {
        let err = decode_row("`zz").unwrap_err();
        assert!(matches!(err, Error::InvalidEncoding(_)));
    }

    #[test]
    fn test_bad_utf8() {
        // 0xff ^ 'd' ^ 'p' = 0xeb, a lone lead byte
        let err = decode_row("`eb").unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
