//! Trellis Core - transactional record storage for a property graph
//!
//! This crate stores nodes, relationships, relationship groups, properties
//! and tokens in fixed-size record files and mutates them through
//! transactions:
//! - Bit-packed record codecs with 35/36-bit ids
//! - Memory-mapped record stores with reusable id allocators
//! - Doubly linked relationship chains, promoted to per-type groups for
//!   dense nodes
//! - Write transactions staging copy-on-write records, turned into commands
//!   on prepare and applied on commit
//! - A CRC-framed command log replayed on open
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  Kernel                     │
//! │   (begin/commit/rollback, recovery, ids)    │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │            Transaction Layer                │
//! │  (Write/Read tx, Commands, Row locks, Log)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Chain Model                    │
//! │  (Relationship chains, Groups, Positions)   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │             Storage Layer                   │
//! │ (Record codecs, Record stores, Id files)    │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod kernel;
pub mod log;
pub mod record;
pub mod store;
pub mod transaction;

pub use error::{Error, Result};
pub use kernel::Kernel;
