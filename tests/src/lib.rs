//! # Event Relay Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # In-process relay fleet over the in-memory bus
//! ├── integration/      # End-to-end delivery across relay processes
//! ├── exploits/         # Replay, forgery, clock and store-outage attacks
//! └── properties.rs     # Property tests for signing and canonical form
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p relay-tests
//! cargo test -p relay-tests integration::
//! cargo test -p relay-tests exploits::
//!
//! # Benchmarks
//! cargo bench -p relay-tests
//! ```

#![allow(dead_code)]

pub mod exploits;
pub mod harness;
pub mod integration;
pub mod properties;
