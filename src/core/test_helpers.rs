//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::nft::{Nft, NftConfig};
use std::sync::Mutex;

/// Path of the shell script standing in for nft (`tests/mock_nft.sh`).
///
/// It echoes the script it receives, rejects scripts containing `mock-fail`
/// and hangs on scripts containing `mock-sleep`.
pub const MOCK_NFT_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/mock_nft.sh");

/// Mutex for tests that change the process-wide probe state.
///
/// Tests that only need to run nft should use [`mock_nft`] with
/// `Table::apply_with` instead, which leaves the probe alone.
///
/// # Example
///
/// ```ignore
/// let _guard = PROBE_MUTEX.lock().unwrap();
/// probe::disable();
/// assert!(probe::enable_with(&NftConfig::new(MOCK_NFT_PATH)));
/// // ... test against the global probe ...
/// probe::disable();
/// ```
pub static PROBE_MUTEX: Mutex<()> = Mutex::new(());

/// The mock nft, located without touching the probe.
pub fn mock_nft() -> Nft {
    Nft::locate(&NftConfig::new(MOCK_NFT_PATH)).expect("tests/mock_nft.sh is missing")
}
