//! KRY / PATCH - AES-192 encrypted content file.
//!
//! The encrypted-content format of the arcade platform, used for song and
//! theme data (`.kry`, keyed by the cabinet dongle) and for game updates
//! (`.patch`, keyed by an embedded secret).
//!
//! ## Layout
//! ```text
//! [0x00] Magic          ":|" arcade / "8O" patch   (2 bytes)
//! [0x02] PlaintextSize  logical file length        (u32 LE)
//! [0x06] SubkeyLen                                 (u32 LE)
//! [0x0A] Subkey         key-derivation material    (SubkeyLen bytes)
//! [....] VerifyBlock    decrypts to ":D" + 14 unchecked bytes (16 bytes)
//! [....] Body           AES-192 ciphertext, multiple of 16 bytes; the
//!                       first PlaintextSize decoded bytes are the file
//! ```
//!
//! ## Reading
//! The body uses the chain-reset transform of [`crate::crypto::kry`]: each
//! block's XOR mask comes from the ciphertext block before it on disk, and
//! the chain restarts from zeros every 4080 bytes. A read therefore only
//! needs the block-aligned window covering the requested range plus one
//! look-behind block, which keeps arbitrary seek+read cheap. Ciphertext
//! padding past `PlaintextSize` is decrypted and discarded.
//!
//! ## Notes
//! * The verify block is a key-correctness check only; the format has no
//!   MAC and nothing authenticates the body.
//! * Derived keys are memoized in the caller's [`KeyCache`] by path, so
//!   re-opening (and [`KryFile::try_clone`], which re-opens) skips the
//!   dongle/hash derivation.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::crypto::kry::{BLOCK, KryCipher, SEGMENT};
use crate::keys::{KeyCache, KeySource};
use crate::{Error, Result};

/// Header magic of dongle-keyed arcade files.
pub const MAGIC_ARCADE: [u8; 2] = *b":|";

/// Header magic of secret-keyed patch files.
pub const MAGIC_PATCH: [u8; 2] = *b"8O";

/// Extension the VFS layer registers the arcade variant under.
pub const EXT_ARCADE: &str = "kry";

/// Extension the VFS layer registers the patch variant under.
pub const EXT_PATCH: &str = "patch";

/// Cap on the declared subkey length, bounding allocation for corrupt
/// headers. Real files carry 64-byte subkeys.
pub const MAX_SUBKEY_LEN: u32 = 4096;

const B: u64 = BLOCK as u64;

/// Parsed KRY/PATCH header.
#[derive(Debug, Clone)]
pub struct KryMeta {
    /// Magic as found in the file.
    pub magic: [u8; 2],
    /// Logical plaintext length in bytes - excludes the header and any
    /// ciphertext padding.
    pub plaintext_size: u32,
    /// Per-file key-derivation material.
    pub subkey: Vec<u8>,
    /// Ciphertext sample that must decrypt to `":D"...` under the derived
    /// key.
    pub verify_block: [u8; BLOCK],
    /// Total header length; body ciphertext starts here.
    pub header_size: u64,
}

impl KryMeta {
    /// Parse a header from `r`, which must be positioned at offset 0.
    ///
    /// `expected_magic` selects the variant being opened (see
    /// [`KeySource::expected_magic`]). The reader is left positioned
    /// immediately after the header.
    pub fn parse<R: Read>(r: &mut R, expected_magic: [u8; 2]) -> Result<Self> {
        let magic = bytesa::<2>(r, "magic")?;
        if magic != expected_magic {
            return Err(Error::BadMagic);
        }

        let plaintext_size = le_u32(r, "plaintext size")?;

        let subkey_len = le_u32(r, "subkey length")?;
        if subkey_len > MAX_SUBKEY_LEN {
            return Err(Error::SubkeyTooLarge(subkey_len));
        }
        let subkey = bytesv(r, subkey_len as usize, "subkey")?;

        let verify_block = bytesa::<BLOCK>(r, "verify block")?;

        Ok(Self {
            magic,
            plaintext_size,
            subkey,
            verify_block,
            header_size: 2 + 4 + 4 + subkey_len as u64 + BLOCK as u64,
        })
    }
}

/// Decrypting file object over a KRY/PATCH source.
///
/// Tracks a logical cursor in plaintext coordinates and decrypts on every
/// [`read`](Self::read); nothing is buffered between calls. A `KryFile` is
/// exclusively owned - for concurrent access, [`try_clone`](Self::try_clone)
/// an independent cursor. The underlying source closes when the `KryFile`
/// drops.
pub struct KryFile<R> {
    source: R,
    path: String,
    meta: KryMeta,
    cipher: KryCipher,
    cursor: u64,
    keys: KeySource,
    cache: KeyCache,
}

impl<R: Read + Seek> KryFile<R> {
    /// Open a file over any `Read + Seek` source.
    ///
    /// `path` is the cache-identity string: opens with the same `path`
    /// share one key derivation through `cache`. Parses the header,
    /// derives (or recalls) the AES key, and checks the verify block;
    /// on any failure no file object is returned and the cache is left
    /// untouched.
    pub fn from_source(source: R, path: &str, keys: KeySource, cache: &KeyCache) -> Result<Self> {
        Self::open_inner(source, path, keys, cache)
            .inspect_err(|e| tracing::warn!("{path}: open failed: {e}"))
    }

    fn open_inner(mut source: R, path: &str, keys: KeySource, cache: &KeyCache) -> Result<Self> {
        source.seek(SeekFrom::Start(0))?;
        let meta = KryMeta::parse(&mut source, keys.expected_magic())?;

        let key = cache.get_or_derive(path, || {
            let key = keys.derive(&meta.subkey)?;
            // Gate the cache on the handshake, so a wrong dongle or secret
            // is never memoized.
            KryCipher::new(&key).check_verify_block(&meta.verify_block)?;
            Ok(key)
        })?;

        let cipher = KryCipher::new(&key);
        // A cached key can still be wrong for this particular file.
        cipher.check_verify_block(&meta.verify_block)?;

        Ok(Self {
            source,
            path: path.to_owned(),
            meta,
            cipher,
            cursor: 0,
            keys,
            cache: cache.clone(),
        })
    }

    /// Read plaintext at the cursor into `buf`.
    ///
    /// Returns the number of bytes delivered, which is less than
    /// `buf.len()` only at end of file. The cursor advances by exactly
    /// that amount. `Ok(0)` means the cursor is at end of file (or `buf`
    /// is empty).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = (buf.len() as u64).min(self.size() - self.cursor) as usize;
        if n == 0 {
            return Ok(0);
        }

        // Block-aligned window covering the requested range.
        let start = self.cursor / B * B;
        let end = (self.cursor + n as u64).div_ceil(B) * B;
        let window = (end - start) as usize;
        let skip = (self.cursor - start) as usize;

        // Look-behind block: the window's first block chains to the
        // ciphertext just before it, except at a segment boundary where
        // the chain restarts from zeros.
        let mut back = [0u8; BLOCK];
        if start % SEGMENT != 0 {
            self.source
                .seek(SeekFrom::Start(self.meta.header_size + start - B))?;
            fill(&mut self.source, &mut back, "ciphertext")?;
        }

        let mut ct = vec![0u8; window];
        self.source
            .seek(SeekFrom::Start(self.meta.header_size + start))?;
        fill(&mut self.source, &mut ct, "ciphertext")?;

        let mut pt = vec![0u8; window];
        self.cipher.decrypt_window(start, back, &ct, &mut pt);

        buf[..n].copy_from_slice(&pt[skip..skip + n]);
        self.cursor += n as u64;
        Ok(n)
    }

    /// Set the cursor, clamped to `[0, size]`. No I/O happens.
    pub fn seek(&mut self, pos: u64) {
        self.cursor = pos.min(self.size());
    }

    /// Current cursor position in plaintext coordinates.
    pub fn tell(&self) -> u64 {
        self.cursor
    }

    /// Logical plaintext length in bytes.
    pub fn size(&self) -> u64 {
        self.meta.plaintext_size as u64
    }

    /// The parsed header.
    pub fn meta(&self) -> &KryMeta {
        &self.meta
    }

    /// The cache-identity path this file was opened under.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl KryFile<File> {
    /// Open an encrypted file from disk.
    pub fn open(path: impl AsRef<Path>, keys: KeySource, cache: &KeyCache) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_source(file, &path.to_string_lossy(), keys, cache)
    }

    /// Create an independent reader over the same file.
    ///
    /// Re-opens the path with the same key source and cache (the key
    /// derivation is recalled, not repeated) and places the clone's cursor
    /// at this reader's current position. Failures are wrapped in
    /// [`Error::Reopen`].
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::open(&self.path, self.keys.clone(), &self.cache)
            .map_err(|e| Error::Reopen(Box::new(e)))?;
        clone.cursor = self.cursor;
        Ok(clone)
    }
}

/// Read exactly `buf.len()` bytes; a short source is a [`Error::ShortRead`]
/// naming `what`.
fn fill(r: &mut impl Read, buf: &mut [u8], what: &'static str) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ShortRead(what),
        _ => Error::Io(e),
    })
}

/// Read exactly `N` bytes into a fixed-size array.
fn bytesa<const N: usize>(r: &mut impl Read, what: &'static str) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    fill(r, &mut b, what)?;
    Ok(b)
}

/// Read exactly `len` bytes into a `Vec`.
fn bytesv(r: &mut impl Read, len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut b = vec![0u8; len];
    fill(r, &mut b, what)?;
    Ok(b)
}

/// Read a little-endian `u32`.
fn le_u32(r: &mut impl Read, what: &'static str) -> Result<u32> {
    Ok(u32::from_le_bytes(bytesa::<4>(r, what)?))
}
