//! Cryptographic utilities for CubeSQL login and payload encryption
//!
//! This module provides:
//! - SHA-1 helpers for the challenge/response login
//! - AES-CBC with ciphertext stealing over a random 16-byte IV
//! - Session key derivation for the encrypted login
//!
//! A sealed payload is always `IV || ciphertext`, 16 bytes longer than the
//! plaintext. Payloads that are not a whole number of blocks use ciphertext
//! stealing (CBC-CS2, via the `cts` crate), so no padding is ever sent.

use aes::cipher::{BlockDecrypt, BlockEncrypt, InnerIvInit, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use cts::{CbcCs2Dec, CbcCs2Enc, Decrypt, Encrypt};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::constants::{Encryption, BLOCK_LEN, RAND_POOL_SIZE, SHA1_DIGEST_SIZE};
use crate::error::{Error, Result};

/// SHA-1 digest
pub type Digest20 = [u8; SHA1_DIGEST_SIZE];

// =============================================================================
// Hashing
// =============================================================================

/// SHA-1 of `data`
pub fn sha1(data: &[u8]) -> Digest20 {
    Sha1::digest(data).into()
}

/// SHA-1 applied twice: `H(H(data))`
pub fn double_sha1(data: &[u8]) -> Digest20 {
    sha1(&sha1(data))
}

/// Lowercase hex SHA-1 of the username, sent in place of the clear name
pub fn hex_hash_username(username: &str) -> String {
    hex::encode(sha1(username.as_bytes()))
}

/// Lowercase hex of `SHA1(username || hex(iv))`, used by the encrypted login
pub fn hex_hash_username_with_iv(username: &str, iv: &[u8; BLOCK_LEN]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(username.as_bytes());
    hasher.update(hex::encode(iv).as_bytes());
    hex::encode(hasher.finalize())
}

/// Challenge response for the clear login: `SHA1(R || SHA1(SHA1(P)))`
pub fn scramble_password(challenge: &[u8], password: &str) -> Digest20 {
    let mut hasher = Sha1::new();
    hasher.update(challenge);
    hasher.update(double_sha1(password.as_bytes()));
    hasher.finalize().into()
}

/// Derive the session key from `H(H(P))`, the client pool `X` and the server pool `Y`
///
/// `s1 = SHA1(H(H(P)) || X || Y)` and `s2 = SHA1(X ^ Y)`. AES-128 uses the
/// first 16 bytes of `s1`; the wider keys overlay a prefix of `s2` on `s1`
/// and zero-fill the rest.
pub fn derive_session_key(
    mode: Encryption,
    password_hash: &Digest20,
    client_pool: &[u8; RAND_POOL_SIZE],
    server_pool: &[u8; RAND_POOL_SIZE],
) -> Result<Vec<u8>> {
    let mut hasher = Sha1::new();
    hasher.update(password_hash);
    hasher.update(client_pool);
    hasher.update(server_pool);
    let s1: Digest20 = hasher.finalize().into();

    let mut mixed = [0u8; RAND_POOL_SIZE];
    for (i, byte) in mixed.iter_mut().enumerate() {
        *byte = client_pool[i] ^ server_pool[i];
    }
    let s2 = sha1(&mixed);

    let key_len = mode.key_len();
    let overlay = match key_len {
        16 => 0,
        24 => 4,
        32 => 12,
        _ => {
            return Err(Error::Protocol(format!(
                "no session key for encryption mode {}",
                mode
            )))
        }
    };

    let mut key = vec![0u8; key_len];
    let copied = key_len.min(SHA1_DIGEST_SIZE);
    key[..copied].copy_from_slice(&s1[..copied]);
    key[..overlay].copy_from_slice(&s2[..overlay]);
    Ok(key)
}

// =============================================================================
// Randomness
// =============================================================================

/// Fresh random IV
pub fn random_iv() -> [u8; BLOCK_LEN] {
    let mut iv = [0u8; BLOCK_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Fresh random pool for the encrypted login
pub fn random_pool() -> [u8; RAND_POOL_SIZE] {
    let mut pool = [0u8; RAND_POOL_SIZE];
    rand::thread_rng().fill_bytes(&mut pool);
    pool
}

// =============================================================================
// AES
// =============================================================================

/// AES block cipher keyed for one session
#[derive(Clone)]
pub enum PayloadCipher {
    /// 128-bit key
    Aes128(Aes128),
    /// 192-bit key
    Aes192(Aes192),
    /// 256-bit key
    Aes256(Aes256),
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PayloadCipher::Aes128(_) => "Aes128",
            PayloadCipher::Aes192(_) => "Aes192",
            PayloadCipher::Aes256(_) => "Aes256",
        };
        f.debug_tuple("PayloadCipher").field(&name).finish()
    }
}

impl PayloadCipher {
    /// Key a cipher; the key length picks the AES variant
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::Protocol(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(PayloadCipher::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(PayloadCipher::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(PayloadCipher::Aes256).map_err(invalid),
            n => Err(Error::Protocol(format!("invalid AES key length {}", n))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = Block::from_mut_slice(block);
        match self {
            PayloadCipher::Aes128(c) => c.encrypt_block(block),
            PayloadCipher::Aes192(c) => c.encrypt_block(block),
            PayloadCipher::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = Block::from_mut_slice(block);
        match self {
            PayloadCipher::Aes128(c) => c.decrypt_block(block),
            PayloadCipher::Aes192(c) => c.decrypt_block(block),
            PayloadCipher::Aes256(c) => c.decrypt_block(block),
        }
    }

    fn cts_encrypt(&self, iv: &Block, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        match self {
            PayloadCipher::Aes128(c) => CbcCs2Enc::inner_iv_init(c, iv).encrypt(buf),
            PayloadCipher::Aes192(c) => CbcCs2Enc::inner_iv_init(c, iv).encrypt(buf),
            PayloadCipher::Aes256(c) => CbcCs2Enc::inner_iv_init(c, iv).encrypt(buf),
        }
        .map_err(|_| Error::Protocol(format!("AES encryption failed for {} bytes", len)))
    }

    fn cts_decrypt(&self, iv: &Block, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        match self {
            PayloadCipher::Aes128(c) => CbcCs2Dec::inner_iv_init(c, iv).decrypt(buf),
            PayloadCipher::Aes192(c) => CbcCs2Dec::inner_iv_init(c, iv).decrypt(buf),
            PayloadCipher::Aes256(c) => CbcCs2Dec::inner_iv_init(c, iv).decrypt(buf),
        }
        .map_err(|_| Error::Protocol(format!("AES decryption failed for {} bytes", len)))
    }

    /// Seal `plain` under a fresh random IV
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        self.seal_with_iv(&random_iv(), plain)
    }

    /// Seal `plain` under the given IV, returning `IV' || ciphertext`
    ///
    /// Whole inputs of at least one block use CBC-CS2. Inputs shorter than
    /// one block are xored with the IV and the final 16 bytes of
    /// `IV || data` are enciphered, which also rewrites the IV.
    pub fn seal_with_iv(&self, iv: &[u8; BLOCK_LEN], plain: &[u8]) -> Result<Vec<u8>> {
        let len = plain.len();
        let mut out = Vec::with_capacity(BLOCK_LEN + len);
        out.extend_from_slice(iv);
        out.extend_from_slice(plain);

        if len < BLOCK_LEN {
            for i in 0..len {
                out[BLOCK_LEN + i] ^= out[i];
            }
            self.encrypt_block(&mut out[len..len + BLOCK_LEN]);
        } else {
            self.cts_encrypt(Block::from_slice(iv), &mut out[BLOCK_LEN..])?;
        }
        Ok(out)
    }

    /// Open an `IV || ciphertext` payload
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < BLOCK_LEN {
            return Err(Error::MalformedFrame(format!(
                "encrypted payload of {} bytes is shorter than the IV",
                data.len()
            )));
        }
        let len = data.len() - BLOCK_LEN;

        if len < BLOCK_LEN {
            let mut buf = data.to_vec();
            self.decrypt_block(&mut buf[len..len + BLOCK_LEN]);
            return Ok((0..len).map(|i| buf[BLOCK_LEN + i] ^ buf[i]).collect());
        }

        let (iv, sealed) = data.split_at(BLOCK_LEN);
        let mut out = sealed.to_vec();
        self.cts_decrypt(Block::from_slice(iv), &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_128: [u8; 16] = [7u8; 16];

    #[test]
    fn test_seal_open_all_lengths() {
        let cipher = PayloadCipher::new(&KEY_128).unwrap();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 47, 100] {
            let plain: Vec<u8> = (0..len as u8).collect();
            let sealed = cipher.seal(&plain).unwrap();
            assert_eq!(sealed.len(), len + BLOCK_LEN, "len {}", len);
            assert_eq!(cipher.open(&sealed).unwrap(), plain, "len {}", len);
        }
    }

    #[test]
    fn test_seal_is_randomized() {
        let cipher = PayloadCipher::new(&KEY_128).unwrap();
        assert_ne!(
            cipher.seal(b"SELECT 1;").unwrap(),
            cipher.seal(b"SELECT 1;").unwrap()
        );
    }

    #[test]
    fn test_seal_with_fixed_iv_is_deterministic() {
        let cipher = PayloadCipher::new(&[1u8; 32]).unwrap();
        let iv = [9u8; BLOCK_LEN];
        assert_eq!(
            cipher.seal_with_iv(&iv, b"hello world, this is long").unwrap(),
            cipher.seal_with_iv(&iv, b"hello world, this is long").unwrap()
        );
    }

    #[test]
    fn test_block_aligned_matches_cbc() {
        let cipher = PayloadCipher::new(&KEY_128).unwrap();
        let iv = [3u8; BLOCK_LEN];
        let plain = [0x41u8; 16];
        let sealed = cipher.seal_with_iv(&iv, &plain).unwrap();

        let mut expected = [0u8; BLOCK_LEN];
        for i in 0..BLOCK_LEN {
            expected[i] = plain[i] ^ iv[i];
        }
        cipher.encrypt_block(&mut expected);
        assert_eq!(&sealed[..BLOCK_LEN], &iv);
        assert_eq!(&sealed[BLOCK_LEN..], &expected);
    }

    #[test]
    fn test_partial_tail_swaps_last_blocks() {
        let cipher = PayloadCipher::new(&KEY_128).unwrap();
        let iv = [3u8; BLOCK_LEN];
        let plain: Vec<u8> = (0..20u8).collect();
        let sealed = cipher.seal_with_iv(&iv, &plain).unwrap();
        assert_eq!(sealed.len(), BLOCK_LEN + 20);

        // First block chains off the IV as plain CBC
        let mut first = [0u8; BLOCK_LEN];
        for i in 0..BLOCK_LEN {
            first[i] = plain[i] ^ iv[i];
        }
        cipher.encrypt_block(&mut first);

        // The zero-padded tail chains off the first block
        let mut last = first;
        for i in 0..4 {
            last[i] ^= plain[BLOCK_LEN + i];
        }
        cipher.encrypt_block(&mut last);

        // Full final block goes first, the truncated first block trails
        assert_eq!(&sealed[BLOCK_LEN..2 * BLOCK_LEN], &last);
        assert_eq!(&sealed[2 * BLOCK_LEN..], &first[..4]);
        assert_eq!(cipher.open(&sealed).unwrap(), plain);
    }

    #[test]
    fn test_open_too_short() {
        let cipher = PayloadCipher::new(&KEY_128).unwrap();
        assert!(matches!(
            cipher.open(&[0u8; 8]),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(PayloadCipher::new(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_session_key_layout() {
        let hash = double_sha1(b"secret");
        let x = [1u8; RAND_POOL_SIZE];
        let y = [2u8; RAND_POOL_SIZE];

        let k128 = derive_session_key(Encryption::Aes128, &hash, &x, &y).unwrap();
        let k192 = derive_session_key(Encryption::Aes192, &hash, &x, &y).unwrap();
        let k256 = derive_session_key(Encryption::Aes256, &hash, &x, &y).unwrap();
        assert_eq!(k128.len(), 16);
        assert_eq!(k192.len(), 24);
        assert_eq!(k256.len(), 32);

        let s2 = sha1(&[3u8; RAND_POOL_SIZE]);
        assert_eq!(&k192[..4], &s2[..4]);
        assert_eq!(&k192[4..16], &k128[4..16]);
        assert_eq!(&k192[20..], &[0u8; 4]);
        assert_eq!(&k256[..12], &s2[..12]);
        assert_eq!(&k256[20..], &[0u8; 12]);

        assert!(derive_session_key(Encryption::None, &hash, &x, &y).is_err());
    }

    #[test]
    fn test_hex_hash_username() {
        assert_eq!(
            hex_hash_username("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_scramble_password() {
        let challenge = [5u8; 20];
        let mut expected = challenge.to_vec();
        expected.extend_from_slice(&double_sha1(b"pw"));
        assert_eq!(scramble_password(&challenge, "pw"), sha1(&expected));
    }
}
