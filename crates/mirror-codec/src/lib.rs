//! # mirror-codec
//!
//! Decoding layer for the client asset pipeline.
//!
//! This crate provides:
//! - Signature-tagged XXTEA asset containers (`StreamCodec`)
//! - Config database row payload decoding (`decode_row`)
//! - Update package archives with their `update` manifest
//! - A package builder producing archives in the CDN layout
//!
//! ## Example
//!
//! ```ignore
//! use mirror_codec::{StreamCodec, UpdatePackage};
//!
//! let codec = StreamCodec::default();
//! let mut package = UpdatePackage::open("1042.zip")?;
//! for record in package.manifest().records.clone() {
//!     // ...
//! }
//! let plain = codec.decode(&package.read_entry("ab/cdef")?)?;
//! ```

mod builder;
mod error;
mod package;
pub mod row;
mod stream;
pub mod xxtea;

pub use builder::PackageBuilder;
pub use error::{Error, Result};
pub use package::{
    extract_zip, list_zip_entries, read_zip_entry, ArchiveEntry, ManifestRecord, PackageAction,
    PackageManifest, UpdatePackage, MANIFEST_ENTRY,
};
pub use row::{decode_row, encode_row, ROW_KEY, ROW_MARKER};
pub use stream::{
    decode_asset, CipherProfile, PayloadKind, StreamCodec, GENERIC_SIGNATURE, KEY_LEN, KEY_SEED,
    SCRIPT_SIGNATURE,
};
