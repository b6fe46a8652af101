//! Raw representations of the records written by the kernel-side programs.

/// Fixed little-endian binary layouts and their decoding rules.
pub mod layout;
/// Per-kind record layouts.
pub mod records;

pub use layout::*;
pub use records::*;
