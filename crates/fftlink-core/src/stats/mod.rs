//! Acquisition statistics
//!
//! Operator-facing counters and a bounded history of synchronization faults,
//! fed from engine events.

pub mod store;
