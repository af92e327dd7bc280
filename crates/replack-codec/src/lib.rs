//! replack wire codec primitives.
//!
//! Defines the replica result-code record and its CBOR encode/decode helpers.

pub mod error;
pub mod result_code;
