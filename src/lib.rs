//! # PKI Authority
//!
//! Internal PKI subsystem for a web server platform: a root+intermediate
//! certificate authority with automatic rotation, local trust-store
//! installation, an embedded RFC 8555 ACME server, TLS session-ticket key
//! management, and an issuance policy engine, all backed by a pluggable
//! atomic key/value storage interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         PkiApp (C4)                             │
//! │   owns CAs, runs the maintenance loop, drives trust install     │
//! ├───────────────┬───────────────┬───────────────┬────────────────┤
//! │   Ca (C3)      │  admin (C5)   │   acme (C7)   │   stek (C6)    │
//! │  root+inter-   │  read-only    │  RFC 8555     │  session-      │
//! │  mediate mgmt  │  HTTP API     │  ACME server  │  ticket keys   │
//! ├───────────────┴───────────────┴───────────────┴────────────────┤
//! │            policy (C8)          │         dbpool (C9)          │
//! │      issuance allow/deny        │   shared sled Db refcounts   │
//! ├──────────────────────────────────────────────────────────────── ┤
//! │                     storage (C2): Storage + Lock                │
//! │              memory (tests) / file (default backend)            │
//! ├──────────────────────────────────────────────────────────────── ┤
//! │                     crypto (C1) / trust (C10)                   │
//! │         rcgen generation, x509-parser, OS trust stores           │
//! └──────────────────────────────────────────────────────────────── ┘
//! ```

pub mod acme;
pub mod admin;
pub mod app;
pub mod ca;
pub mod config;
pub mod crypto;
pub mod dbpool;
pub mod error;
pub mod policy;
pub mod stek;
pub mod storage;
pub mod trust;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
