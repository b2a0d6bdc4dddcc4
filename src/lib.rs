//! Wallet Jobs
//!
//! Queued, resumable orchestration of the on-chain steps that create and
//! manage smart-contract wallets on a home chain and a foreign chain.
//!
//! # Layout
//!
//! ```text
//!  POST /jobs ──► api ──► app::JobService ──► JobRepository (Postgres)
//!                                                   │ claim (lease)
//!                                                   ▼
//!        app::JobWorker ──► JobProcessor ──► TaskRunner handlers
//!                                                   │
//!               ┌───────────────────┬───────────────┴──────────┐
//!               ▼                   ▼                          ▼
//!     TransactionSender    MultiSigCoordinator     WalletRepository,
//!     (home / foreign RPC)  (co-signed execute)    SMS, deep links,
//!                                                  subscriptions
//! ```
//!
//! `domain` holds the types, traits, errors and ABI encoding; `infra`
//! implements the traits against Postgres, EVM JSON-RPC and HTTP.
//!
//! Every job handler records each settled step in the job's data blob, so a
//! job that fails halfway resumes after its last checkpoint instead of
//! sending the same transaction twice.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wallet_jobs::api::create_router;
//! use wallet_jobs::app::{AppState, ChainClients, JobService};
//!
//! let service = Arc::new(JobService::new(db, ChainClients::new(home, foreign), 5));
//! let state = Arc::new(AppState::new(service, api_key, metrics));
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

// In-memory doubles for unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
