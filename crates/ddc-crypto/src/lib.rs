//! Hashing primitives for the derived-data cache.
//!
//! Every identifier in DDC is a truncated BLAKE3 digest (see
//! [`ddc_types::ContentHash`]). This crate provides the incremental hasher used
//! when bytes arrive in pieces and the verification helpers used by every
//! write path. All crypto operations wrap the `blake3` crate.

pub mod hasher;

pub use hasher::{ContentHasher, HashMismatch};
