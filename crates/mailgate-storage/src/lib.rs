//! mailgate Storage - Blob storage abstraction
//!
//! This crate provides the [`BlobStore`] capability set used for message
//! bodies, together with filesystem, in-memory and SQLite backends and a
//! conformance suite every backend is tested against.

pub mod blob;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

pub use blob::{
    BlobError, BlobKey, BlobResult, BlobStore, BlobWriter, FsBlobStore, MemoryBlobStore,
    MissingKeyPolicy, OverwritePolicy, SqliteBlobStore,
};
