// tests/property_test.rs

//! Property-based tests for RepGuard
//!
//! These tests verify the protocol invariants that must hold regardless of
//! input: term monotonicity, single-candidate-per-term, best-candidate
//! determinism, and LSN ordering.

mod property {
    pub mod election_invariants_test;
    pub mod lsn_order_test;
}
