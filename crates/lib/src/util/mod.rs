//! Shared utilities.
//!
//! Tree digests, copy helpers and test helpers.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
