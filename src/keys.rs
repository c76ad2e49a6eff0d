//! Key material for encrypted content files.
//!
//! Every encrypted file carries a per-file **subkey** blob in its header;
//! the 24-byte AES key that actually decrypts the body is derived from it
//! in one of two ways:
//!
//! * **Arcade files** (`.kry`) hand the subkey to the cabinet's hardware
//!   dongle, modeled here as the injected [`DongleKeySource`] capability.
//! * **Patch files** (`.patch`) hash the subkey together with a 47-byte
//!   secret compiled into the program: the key is the first 24 bytes of
//!   `SHA-512(subkey ‖ secret)`.
//!
//! Derivation can be slow (the dongle is real hardware), so derived keys
//! are memoized in a process-wide [`KeyCache`] keyed by file path. The
//! cache is an injected handle rather than a global so tests can build a
//! fresh one per case.
//!
//! This module holds key material and selection logic only; the actual
//! cipher and hash operations live in [`crate::crypto`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// A derived AES-192 key.
pub type AesKey = [u8; 24];

/// Required byte length of an embedded secret.
pub const SECRET_LEN: usize = 47;

/// Secret compiled into the game for `.patch` update files.
pub const PATCH_SECRET: &str = "58691958710496814910943867304986071324198643072";

/// Secret compiled into standalone (non-arcade) builds, which have no
/// dongle hardware to derive keys from.
pub const STANDALONE_SECRET: &str = "65487573252940086457044055343188392138734144585";

/// Capability that maps a per-file subkey blob to a 24-byte AES key.
///
/// Implemented by the hardware dongle driver on arcade cabinets. The call
/// may block on device I/O; failures are surfaced as
/// [`Error::DongleUnavailable`] and never retried by this library.
pub trait DongleKeySource: Send + Sync {
    fn derive_aes_key(&self, subkey: &[u8]) -> io::Result<AesKey>;
}

/// Where a file's AES key comes from.
///
/// Selects both the derivation strategy and the header magic the file is
/// expected to carry: secrets go with patch files (`"8O"`), the dongle
/// with arcade files (`":|"`).
#[derive(Clone)]
pub enum KeySource {
    /// Derive by hashing the subkey with an embedded 47-byte secret.
    Secret(String),
    /// Derive through the injected dongle capability.
    Dongle(Arc<dyn DongleKeySource>),
}

impl KeySource {
    /// Key source for `.patch` update files.
    pub fn patch() -> Self {
        KeySource::Secret(PATCH_SECRET.to_owned())
    }

    /// Key source for standalone builds that read `.kry` content without a
    /// dongle.
    pub fn standalone() -> Self {
        KeySource::Secret(STANDALONE_SECRET.to_owned())
    }

    /// Key source using a caller-supplied secret.
    ///
    /// Returns [`Error::SecretLength`] unless the secret is exactly 47
    /// bytes; anything else is a configuration mistake, not a file error.
    pub fn secret(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() != SECRET_LEN {
            return Err(Error::SecretLength(secret.len()));
        }
        Ok(KeySource::Secret(secret))
    }

    /// Key source using the injected dongle capability.
    pub fn dongle(dongle: Arc<dyn DongleKeySource>) -> Self {
        KeySource::Dongle(dongle)
    }

    /// The header magic a file opened with this key source must carry.
    pub fn expected_magic(&self) -> [u8; 2] {
        match self {
            KeySource::Secret(_) => crate::formats::kry::MAGIC_PATCH,
            KeySource::Dongle(_) => crate::formats::kry::MAGIC_ARCADE,
        }
    }

    /// Derive the AES key for a file's subkey blob.
    pub(crate) fn derive(&self, subkey: &[u8]) -> Result<AesKey> {
        match self {
            KeySource::Secret(secret) => {
                tracing::debug!("deriving file key from embedded secret");
                Ok(crate::crypto::kry::derive_secret_key(subkey, secret.as_bytes()))
            }
            KeySource::Dongle(dongle) => {
                tracing::debug!("requesting file key from dongle");
                dongle.derive_aes_key(subkey).map_err(Error::DongleUnavailable)
            }
        }
    }
}

// Never print secret bytes.
impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Secret(_) => f.write_str("KeySource::Secret([REDACTED])"),
            KeySource::Dongle(_) => f.write_str("KeySource::Dongle(..)"),
        }
    }
}

/// Process-wide path → AES-key memoization table.
///
/// Cloning the handle is cheap and shares the underlying map. Entries are
/// never evicted; the footprint is bounded by the number of distinct
/// encrypted files opened in a process run. Two different spellings of a
/// path are two entries.
#[derive(Clone, Default)]
pub struct KeyCache {
    inner: Arc<Mutex<HashMap<String, AesKey>>>,
}

impl KeyCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key for `path`, deriving and caching it on a miss.
    ///
    /// The map lock is held across `derive`, so two racing opens of the
    /// same new path perform a single derivation. `derive` must fully
    /// validate the key it returns (the file object checks the verify
    /// block inside its closure) because a cached entry is trusted for the
    /// rest of the process run; on error nothing is cached.
    pub fn get_or_derive(
        &self,
        path: &str,
        derive: impl FnOnce() -> Result<AesKey>,
    ) -> Result<AesKey> {
        let mut keys = self.inner.lock().unwrap();
        if let Some(key) = keys.get(path) {
            tracing::debug!(path, "key cache hit");
            return Ok(*key);
        }
        let key = derive()?;
        keys.insert(path.to_owned(), key);
        Ok(key)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True if no key has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_length_is_validated() {
        assert!(matches!(
            KeySource::secret("too short"),
            Err(Error::SecretLength(9))
        ));
        assert!(KeySource::secret(PATCH_SECRET).is_ok());
        assert_eq!(PATCH_SECRET.len(), SECRET_LEN);
        assert_eq!(STANDALONE_SECRET.len(), SECRET_LEN);
    }

    #[test]
    fn cache_derives_once_per_path() {
        let cache = KeyCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let key = cache
                .get_or_derive("Songs/a.kry", || {
                    calls += 1;
                    Ok([7u8; 24])
                })
                .unwrap();
            assert_eq!(key, [7u8; 24]);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_paths_are_distinct_entries() {
        let cache = KeyCache::new();
        cache.get_or_derive("a", || Ok([1u8; 24])).unwrap();
        cache.get_or_derive("./a", || Ok([2u8; 24])).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_derivation_caches_nothing() {
        let cache = KeyCache::new();
        let err = cache.get_or_derive("bad", || Err(Error::KeyMismatch));
        assert!(matches!(err, Err(Error::KeyMismatch)));
        assert!(cache.is_empty());

        // A later, successful derivation still runs.
        cache.get_or_derive("bad", || Ok([9u8; 24])).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn debug_never_prints_secrets() {
        let dbg = format!("{:?}", KeySource::patch());
        assert!(!dbg.contains(PATCH_SECRET));
    }
}
