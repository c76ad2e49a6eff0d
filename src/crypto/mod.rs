//! Cryptographic operations for encrypted content files.
//!
//! This module contains the cipher adapter and key-derivation hash used to
//! decrypt KRY/PATCH content. All functions accept already-loaded key
//! material; key selection, the dongle capability, and the key cache are
//! handled by [`crate::keys`].
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`kry`] | AES-192 ECB block decryption, SHA-512 secret-key derivation, chain-reset window transform |
//!
//! ## Scheme (brief)
//!
//! ```text
//! header subkey
//!   ├── arcade: dongle capability ──────────────┐
//!   └── patch:  SHA-512(subkey ‖ secret)[..24] ─┴─► 24-byte AES key
//!         └── AES-192 ECB decrypt verify block  (must start ":D")
//!         └── AES-192 ECB decrypt body blocks, then XOR with the
//!             position-adjusted previous ciphertext block; the chain
//!             restarts from zeros every 4080 bytes
//! ```

pub mod kry;
