//! Cryptographic helpers for KRY/PATCH content files.
//!
//! ## AES-192-ECB with a chained XOR mask
//!
//! The file body is AES-192 ciphertext in 16-byte blocks, but the mode is
//! not plain ECB and not standard CBC either. After AES-decrypting block
//! `i`, each byte `j` of the result is XORed with a mask built from the
//! ciphertext of the block physically preceding it on disk:
//!
//! ```text
//! pt[16i + j] = AES_dec(ct_i)[j] XOR ((back[j] - j) mod 256)
//! ```
//!
//! where `back` is the previous block's *ciphertext* (not plaintext). The
//! per-byte subtraction of the position `j` is what distinguishes the
//! scheme from CBC; it applies to every block, including the first of a
//! segment where `back` is all zeros and the mask degenerates to
//! `(256 - j) mod 256`.
//!
//! ## Chain reset
//!
//! Every [`SEGMENT`] (4080) bytes - 255 blocks - the chain restarts:
//! `back` is reset to zeros instead of carrying the previous ciphertext.
//! Segments therefore decrypt independently, which is what makes
//! arbitrary-offset reads cheap: at most one look-behind block is needed.
//!
//! ## Key derivation for patch files
//!
//! `SHA-512(subkey ‖ secret)` truncated to 24 bytes. Arcade files derive
//! their keys through the dongle capability instead and never reach
//! [`derive_secret_key`].

use aes::Aes192Dec;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use sha2::{Digest, Sha512};

use crate::keys::AesKey;
use crate::{Error, Result};

/// AES block size in bytes.
pub const BLOCK: usize = 16;

/// Chain-reset period in bytes (255 blocks). The backbuffer returns to
/// zeros whenever a block boundary lands on a multiple of this.
pub const SEGMENT: u64 = 4080;

/// Plaintext prefix the verify block must decrypt to.
pub const VERIFY_MAGIC: [u8; 2] = *b":D";

/// Derive a patch-file AES key: the first 24 bytes of
/// `SHA-512(subkey ‖ secret)`.
pub fn derive_secret_key(subkey: &[u8], secret: &[u8]) -> AesKey {
    let mut hasher = Sha512::new();
    hasher.update(subkey);
    hasher.update(secret);
    let digest = hasher.finalize();

    let mut key = [0u8; 24];
    key.copy_from_slice(&digest[..24]);
    key
}

/// AES-192 decryptor with a pre-expanded key schedule.
///
/// Key expansion happens once at construction; the per-block decrypt in
/// [`decrypt_window`](Self::decrypt_window) dominates read latency.
pub struct KryCipher {
    inner: Aes192Dec,
}

impl KryCipher {
    /// Expand the decryption key schedule for `key`.
    pub fn new(key: &AesKey) -> Self {
        Self {
            inner: Aes192Dec::new(GenericArray::from_slice(key)),
        }
    }

    /// Decrypt a single 16-byte block (raw ECB, no chaining mask).
    pub fn decrypt_block(&self, block: &[u8; BLOCK]) -> [u8; BLOCK] {
        let mut b = GenericArray::clone_from_slice(block);
        self.inner.decrypt_block(&mut b);
        b.into()
    }

    /// Check a header verify block against this key.
    ///
    /// The decrypted block must begin with `":D"`; the remaining 14 bytes
    /// are not checked. Returns [`Error::KeyMismatch`] otherwise.
    pub fn check_verify_block(&self, block: &[u8; BLOCK]) -> Result<()> {
        let plaintext = self.decrypt_block(block);
        if plaintext[..2] != VERIFY_MAGIC {
            return Err(Error::KeyMismatch);
        }
        Ok(())
    }

    /// Decrypt a block-aligned ciphertext window into `out`.
    ///
    /// * `start` - plaintext offset of the window's first byte; must be
    ///   block-aligned.
    /// * `back` - the look-behind block: the 16 ciphertext bytes that
    ///   precede the window on disk, or zeros when `start` falls on a
    ///   segment boundary.
    /// * `ct` - the ciphertext window; length must be a multiple of 16.
    /// * `out` - receives the plaintext; same length as `ct`.
    pub fn decrypt_window(&self, start: u64, mut back: [u8; BLOCK], ct: &[u8], out: &mut [u8]) {
        assert_eq!(start % BLOCK as u64, 0, "window start must be block-aligned");
        assert_eq!(ct.len() % BLOCK, 0, "window must be whole blocks");
        assert_eq!(ct.len(), out.len());

        for (i, block) in ct.chunks_exact(BLOCK).enumerate() {
            let ct_block: [u8; BLOCK] = block.try_into().unwrap();
            let xor_block = self.decrypt_block(&ct_block);

            let dst = &mut out[i * BLOCK..(i + 1) * BLOCK];
            for j in 0..BLOCK {
                dst[j] = xor_block[j] ^ back[j].wrapping_sub(j as u8);
            }

            // The next block chains to this block's ciphertext, unless its
            // boundary lands on a segment multiple, where the chain restarts.
            if (start + (i as u64 + 1) * BLOCK as u64) % SEGMENT == 0 {
                back = [0u8; BLOCK];
            } else {
                back = ct_block;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aes::Aes192Enc;
    use aes::cipher::BlockEncrypt;

    use super::*;

    /// Inverse of the read transform, for building test ciphertext:
    /// mask the plaintext, then AES-encrypt. Chain updates mirror
    /// `decrypt_window` exactly (ciphertext feeds the chain).
    fn encrypt_window(
        key: &AesKey,
        start: u64,
        mut back: [u8; BLOCK],
        pt: &[u8],
    ) -> Vec<u8> {
        assert_eq!(start % BLOCK as u64, 0);
        assert_eq!(pt.len() % BLOCK, 0);

        let enc = Aes192Enc::new(GenericArray::from_slice(key));
        let mut ct = vec![0u8; pt.len()];

        for (i, block) in pt.chunks_exact(BLOCK).enumerate() {
            let mut masked = [0u8; BLOCK];
            for j in 0..BLOCK {
                masked[j] = block[j] ^ back[j].wrapping_sub(j as u8);
            }
            let mut ga = GenericArray::clone_from_slice(&masked);
            enc.encrypt_block(&mut ga);
            let ct_block: [u8; BLOCK] = ga.into();
            ct[i * BLOCK..(i + 1) * BLOCK].copy_from_slice(&ct_block);

            if (start + (i as u64 + 1) * BLOCK as u64) % SEGMENT == 0 {
                back = [0u8; BLOCK];
            } else {
                back = ct_block;
            }
        }
        ct
    }

    fn test_key() -> AesKey {
        std::array::from_fn(|i| (i as u8).wrapping_mul(11).wrapping_add(3))
    }

    fn test_plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(7)).collect()
    }

    #[test]
    fn derive_secret_key_is_truncated_sha512() {
        let subkey: Vec<u8> = (0u8..64).collect();
        let secret = crate::keys::PATCH_SECRET.as_bytes();

        let mut concat = subkey.clone();
        concat.extend_from_slice(secret);
        let expected = Sha512::digest(&concat);

        assert_eq!(&derive_secret_key(&subkey, secret)[..], &expected[..24]);
    }

    #[test]
    fn derive_secret_key_depends_on_subkey() {
        let secret = crate::keys::PATCH_SECRET.as_bytes();
        let a = derive_secret_key(&[1, 2, 3], secret);
        let b = derive_secret_key(&[1, 2, 4], secret);
        assert_ne!(a, b);
    }

    #[test]
    fn window_roundtrip_across_segment_reset() {
        let key = test_key();
        // Two full segments plus a tail: exercises both resets.
        let pt = test_plaintext(SEGMENT as usize * 2 + 64);
        let ct = encrypt_window(&key, 0, [0u8; BLOCK], &pt);

        let cipher = KryCipher::new(&key);
        let mut out = vec![0u8; pt.len()];
        cipher.decrypt_window(0, [0u8; BLOCK], &ct, &mut out);
        assert_eq!(out, pt);
    }

    #[test]
    fn window_decrypts_from_interior_offset() {
        let key = test_key();
        let pt = test_plaintext(256);
        let ct = encrypt_window(&key, 0, [0u8; BLOCK], &pt);

        // Start at block 3; look-behind is block 2's ciphertext.
        let cipher = KryCipher::new(&key);
        let back: [u8; BLOCK] = ct[32..48].try_into().unwrap();
        let mut out = vec![0u8; 64];
        cipher.decrypt_window(48, back, &ct[48..112], &mut out);
        assert_eq!(out, pt[48..112]);
    }

    #[test]
    fn segment_start_uses_zero_lookbehind() {
        let key = test_key();
        let pt = test_plaintext(SEGMENT as usize + BLOCK);
        let ct = encrypt_window(&key, 0, [0u8; BLOCK], &pt);

        // The block at the segment boundary decrypts with no knowledge of
        // the prior ciphertext at all.
        let cipher = KryCipher::new(&key);
        let mut out = [0u8; BLOCK];
        let seg = SEGMENT as usize;
        cipher.decrypt_window(SEGMENT, [0u8; BLOCK], &ct[seg..seg + BLOCK], &mut out);
        assert_eq!(out, pt[seg..seg + BLOCK]);
    }

    #[test]
    fn first_block_mask_is_position_only() {
        // With a zero backbuffer the mask at byte j is (0 - j) mod 256,
        // so plaintext byte 0 is exactly the raw AES decryption's byte 0.
        let key = test_key();
        let pt = test_plaintext(BLOCK);
        let ct = encrypt_window(&key, 0, [0u8; BLOCK], &pt);

        let cipher = KryCipher::new(&key);
        let ct_block: [u8; BLOCK] = ct[..BLOCK].try_into().unwrap();
        let raw = cipher.decrypt_block(&ct_block);
        assert_eq!(pt[0], raw[0]);
        assert_eq!(pt[1], raw[1] ^ 0xFF);
    }

    #[test]
    fn verify_block_gates_on_plaintext_magic() {
        let key = test_key();
        let enc = Aes192Enc::new(GenericArray::from_slice(&key));

        let mut good = *b":D hello, world!";
        let mut ga = GenericArray::clone_from_slice(&good);
        enc.encrypt_block(&mut ga);
        good = ga.into();

        let cipher = KryCipher::new(&key);
        assert!(cipher.check_verify_block(&good).is_ok());

        let other_key = derive_secret_key(b"nope", crate::keys::PATCH_SECRET.as_bytes());
        let wrong = KryCipher::new(&other_key);
        assert!(matches!(
            wrong.check_verify_block(&good),
            Err(Error::KeyMismatch)
        ));
    }
}
