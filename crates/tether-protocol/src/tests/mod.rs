//! Crate-level tests for the protocol.

mod behaviour;
