//! Parsers and file objects for encrypted content formats.
//!
//! All parsers follow the same conventions:
//!
//! * **Generic over** [`std::io::Read`] + [`std::io::Seek`] - pass a
//!   [`std::fs::File`], a [`std::io::Cursor`], or anything else that
//!   implements both traits.
//! * **Metadata first** - `parse` reads and validates the header only;
//!   body data is decrypted lazily, per read, never eagerly loaded.
//! * **Crypto is separate** - the cipher adapter and key derivation live
//!   in [`crate::crypto`]; key selection and caching in [`crate::keys`].
//!
//! ## Format overview
//!
//! | Module  | Format      | Description |
//! |---------|-------------|-------------|
//! | [`kry`] | KRY / PATCH | AES-192 encrypted content file; random-access decrypting reader |

pub mod kry;
