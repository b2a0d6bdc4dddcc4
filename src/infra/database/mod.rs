//! Concrete database client implementations.
//!
//! This module contains the PostgreSQL adapter that implements both the
//! `JobRepository` and `WalletRepository` traits defined in the domain layer.

pub mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
