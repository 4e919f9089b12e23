//! XXTEA block cipher over little-endian 32-bit words.
//!
//! Byte buffers follow the cocos2d convention: the plaintext is zero padded
//! to a word boundary and one extra word holding the plaintext length is
//! appended before encryption.

const DELTA: u32 = 0x9E37_79B9;

fn mx(sum: u32, y: u32, z: u32, p: usize, e: u32, k: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(k[((p as u32 & 3) ^ e) as usize] ^ z))
}

fn rounds(n: usize) -> usize {
    6 + 52 / n
}

/// Encrypt `v` in place. Slices shorter than two words are left untouched.
pub(crate) fn encrypt_words(v: &mut [u32], k: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }

    let mut sum: u32 = 0;
    let mut z = v[n - 1];

    for _ in 0..rounds(n) {
        sum = sum.wrapping_add(DELTA);
        let e = (sum >> 2) & 3;

        for p in 0..n - 1 {
            let y = v[p + 1];
            v[p] = v[p].wrapping_add(mx(sum, y, z, p, e, k));
            z = v[p];
        }

        let y = v[0];
        v[n - 1] = v[n - 1].wrapping_add(mx(sum, y, z, n - 1, e, k));
        z = v[n - 1];
    }
}

/// Decrypt `v` in place. Slices shorter than two words are left untouched.
pub(crate) fn decrypt_words(v: &mut [u32], k: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }

    let rounds = rounds(n);
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];

    for _ in 0..rounds {
        let e = (sum >> 2) & 3;

        for p in (1..n).rev() {
            let z = v[p - 1];
            v[p] = v[p].wrapping_sub(mx(sum, y, z, p, e, k));
            y = v[p];
        }

        let z = v[n - 1];
        v[0] = v[0].wrapping_sub(mx(sum, y, z, 0, e, k));
        y = v[0];

        sum = sum.wrapping_sub(DELTA);
    }
}

fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn key_words(key: &[u8; 16]) -> [u32; 4] {
    let mut k = [0u32; 4];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        k[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    k
}

/// Encrypt `plain`, appending the length word. Empty input yields an empty region.
pub fn encrypt(plain: &[u8], key: &[u8; 16]) -> Vec<u8> {
    if plain.is_empty() {
        return Vec::new();
    }
    let mut v = to_words(plain);
    v.push(plain.len() as u32);
    encrypt_words(&mut v, &key_words(key));
    to_bytes(&v)
}

/// Decrypt `region`.
///
/// Regions shorter than two words are returned unchanged. When the trailing
/// length word is out of range the decrypted words are returned as-is,
/// truncated to the region length.
pub fn decrypt(region: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let mut v = to_words(region);
    if v.len() < 2 {
        return region.to_vec();
    }

    decrypt_words(&mut v, &key_words(key));

    let n = v.len() * 4;
    let m = v[v.len() - 1] as usize;
    let mut out = to_bytes(&v);
    if m + 7 >= n && m + 4 <= n {
        out.truncate(m);
    } else {
        log::debug!(
            "xxtea length word {} out of range for {} byte region, keeping raw words",
            m,
            region.len()
        );
        out.truncate(region.len());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn test_word_roundtrip() {
        let k = key_words(&KEY);
        let original = vec![1u32, 2, 3, 0xdead_beef, 42];
        let mut v = original.clone();
        encrypt_words(&mut v, &k);
        assert_ne!(v, original);
        decrypt_words(&mut v, &k);
        assert_eq!(v, original);
    }

    #[test]
    fn test_single_word_untouched() {
        let k = key_words(&KEY);
        let mut v = vec![7u32];
        encrypt_words(&mut v, &k);
        assert_eq!(v, vec![7]);
    }

    #[test]
    fn test_length_word_truncates() {
        let plain = b"seven b";
        let cipher = encrypt(plain, &KEY);
        assert_eq!(cipher.len(), 12);
        assert_eq!(decrypt(&cipher, &KEY), plain);
    }

    #[test]
    fn test_short_region_passes_through() {
        assert_eq!(decrypt(b"abc", &KEY), b"abc");
        assert_eq!(decrypt(b"", &KEY), b"");
    }

    #[test]
    fn test_wrong_key_keeps_region_length() {
        let cipher = encrypt(b"some longer plaintext here", &KEY);
        let other = *b"fedcba9876543210";
        let out = decrypt(&cipher, &other);
        assert!(out.len() <= cipher.len());
    }
}
