//! # Refinery Eye
//!
//! Orchestration service for AI-assisted video inspection of refinery
//! instrumentation.
//!
//! An operator logs in, uploads a walkthrough video and optional reference
//! standards (PDFs and cited URLs), and asks for an analysis. The service
//! hands the video and documents to a multimodal model, normalizes what
//! comes back into a fixed list of findings, and keeps saved results as
//! reports that can be listed, opened, exported, and deleted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Client  │──▶│  HTTP server  │──▶│   Service    │
//! │ (reye)   │   │ session gate  │   │ upload/save  │
//! └──────────┘   └───────────────┘   └──────┬───────┘
//!                                           │
//!                    ┌──────────────────────┼───────────────┐
//!                    ▼                      ▼               ▼
//!              ┌───────────┐         ┌────────────┐   ┌──────────┐
//!              │ BlobStore │         │  Gateway   │   │  SQLite  │
//!              │ disk / S3 │         │  (Gemini)  │   │ reports  │
//!              └───────────┘         └────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`session`] | Operator credentials and sessions |
//! | [`blob_fs`] | Local-disk blob storage |
//! | [`blob_s3`] | S3-compatible blob storage |
//! | [`sqlite_store`] | Report persistence |
//! | [`gateway`] | Model orchestration and response normalization |
//! | [`service`] | Session-gated operations |
//! | [`server`] | HTTP API |
//! | [`client`] | HTTP client and inspection driver |
//! | [`export`] | Markdown/JSON report documents |
//! | [`reports_cmd`] | `reye reports` commands |
//! | [`migrate`] | Schema migrations |
//!
//! Domain types, the error taxonomy, and the inspection flow state machine
//! live in the `refinery-eye-core` crate.

pub mod blob_fs;
pub mod blob_s3;
pub mod client;
pub mod config;
pub mod export;
pub mod gateway;
pub mod migrate;
pub mod reports_cmd;
pub mod server;
pub mod service;
pub mod session;
pub mod sqlite_store;
