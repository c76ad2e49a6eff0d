//! **krykit** - a reusable Rust library for reading ITG2-style encrypted
//! arcade content files.
//!
//! # Supported formats
//! | Module | Format |
//! |--------|--------|
//! | [`formats::kry`] | KRY / PATCH - AES-192 encrypted content file with chain-reset block transform |
//!
//! Two on-disk variants share the format: **arcade** files (`.kry`, magic
//! `":|"`) whose AES key comes from a hardware dongle, and **patch** files
//! (`.patch`, magic `"8O"`) whose key is derived from an embedded secret.
//! Key-source selection, derivation, and the process-wide key cache live in
//! [`keys`]; the cipher and chaining transform live in [`crypto`].

pub mod crypto;
pub mod error;
pub mod formats;
pub mod keys;

pub use error::{Error, Result};
