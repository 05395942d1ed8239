//! Device wire protocol
//!
//! - Two-byte sample encoding with marker bits ([`sample`])
//! - Frame boundary search and marker verification ([`sync`])

pub mod sample;
pub mod sync;
