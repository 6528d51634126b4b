//! nftsync - incremental nftables table management
//!
//! Keeps one nftables table mirrored in memory and pushes only what changed
//! to the kernel through the `nft` command line tool.
//!
//! # Architecture
//!
//! - [`core`] - Table model, script generation, and nft invocation
//! - [`audit`] - Audit logging for applies and reloads
//! - [`config`] - Settings file for the CLI
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Apply semantics
//!
//! - Chains with any change are flushed and rewritten whole
//! - Map and set elements are added and deleted individually
//! - Pending changes are only forgotten once nft reports success
//! - Nothing is rolled back; a failed apply is retried by applying again

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::nft::{ApplyReport, Nft, NftConfig};
pub use core::table::{Chain, Set, Table, VerdictMap};
pub use core::types::{ChainType, Family, Hook, Policy};
