//! Core table management functionality
//!
//! - [`types`]: nftables keywords (families, hooks, policies, element types)
//! - [`table`]: the in-memory table, chains, verdict maps and sets
//! - [`script`]: rendering pending changes into an nft script
//! - [`nft`]: running scripts through `nft -f -` and committing on success
//! - [`probe`]: process-wide nft availability
//! - [`cleanup`]: undo records for rules and elements
//! - [`description`]: JSON descriptions of whole tables
//! - [`error`]: error types

pub mod cleanup;
pub mod description;
pub mod error;
pub mod nft;
pub mod probe;
pub mod script;
pub mod table;
pub mod types;

#[cfg(test)]
pub mod test_helpers;
