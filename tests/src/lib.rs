//! # Quantum-Chain Test Suite
//!
//! Unified test crate for the parallel execution subsystem.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Scripted executor + sequential reference interpreter
//! └── integration/      # End-to-end batch scenarios
//!     ├── equivalence.rs  # Parallel == sequential (proptest)
//!     ├── phantom.rs      # Range-scan validation
//!     └── scenarios.rs    # Ledger scenarios, termination, cancellation
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::equivalence
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```
