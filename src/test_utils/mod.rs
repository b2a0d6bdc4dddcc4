//! Test utilities and mock implementations.
//!
//! Reusable in-memory implementations of the domain traits for unit and
//! integration tests.

pub mod mocks;

pub use mocks::{
    MockBlockchainClient, MockConfig, MockJobRepository, MockNotifier, MockWalletRepository,
};
