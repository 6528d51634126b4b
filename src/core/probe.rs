//! Process-wide nft availability
//!
//! [`enable`] looks for nft once and remembers the outcome until [`disable`]
//! is called. Building tables never needs nft; only applying does, and
//! [`Table::apply`](crate::core::table::Table::apply) fails with
//! [`Error::NotEnabled`] until a probe has succeeded.

use crate::core::error::{Error, Result};
use crate::core::nft::{Nft, NftConfig};
use std::sync::{PoisonError, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
enum Probe {
    Found(Nft),
    Missing(String),
}

static STATE: RwLock<Option<Probe>> = RwLock::new(None);

/// Probes for the nft named by `NFTSYNC_NFT` (default `nft`).
pub fn enable() -> bool {
    enable_with(&NftConfig::from_env())
}

/// Probes for `config.program` unless a probe already ran.
///
/// The first call decides: later calls return the remembered result whatever
/// config they pass.
pub fn enable_with(config: &NftConfig) -> bool {
    if let Some(probe) = STATE.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        return matches!(probe, Probe::Found(_));
    }

    let mut state = STATE.write().unwrap_or_else(PoisonError::into_inner);
    let probe = state.get_or_insert_with(|| match Nft::locate(config) {
        Ok(nft) => {
            info!(path = %nft.path().display(), "nftables: enabled");
            Probe::Found(nft)
        }
        Err(e) => {
            warn!(program = %config.program, error = %e, "nftables: not available");
            Probe::Missing(e.to_string())
        }
    });
    matches!(probe, Probe::Found(_))
}

/// Whether a probe has found nft.
pub fn enabled() -> bool {
    matches!(
        *STATE.read().unwrap_or_else(PoisonError::into_inner),
        Some(Probe::Found(_))
    )
}

/// Why the last probe failed, if it did.
pub fn enable_error() -> Option<String> {
    match &*STATE.read().unwrap_or_else(PoisonError::into_inner) {
        Some(Probe::Missing(reason)) => Some(reason.clone()),
        _ => None,
    }
}

/// The nft found by the probe.
///
/// # Errors
///
/// Returns [`Error::NotEnabled`] if no probe ran or the probe failed.
pub fn nft() -> Result<Nft> {
    match &*STATE.read().unwrap_or_else(PoisonError::into_inner) {
        Some(Probe::Found(nft)) => Ok(nft.clone()),
        Some(Probe::Missing(reason)) => Err(Error::NotEnabled(reason.clone())),
        None => Err(Error::NotEnabled("nft has not been probed".to_string())),
    }
}

/// Forgets the probe result so the next [`enable`] probes again.
pub fn disable() {
    *STATE.write().unwrap_or_else(PoisonError::into_inner) = None;
}
