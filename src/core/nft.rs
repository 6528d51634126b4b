//! Running generated scripts through the nft binary
//!
//! Every apply spawns a fresh `nft -f -`, streams the script over stdin and
//! waits for it to exit. The table's change tracking is reset only once nft
//! has reported success, so a failed or cancelled apply leaves everything
//! pending and the next apply resends it.
//!
//! # Example
//!
//! ```no_run
//! use nftsync::core::{probe, table::Table, types::Family};
//!
//! # async fn example() -> nftsync::Result<()> {
//! probe::enable();
//! let mut table = Table::new(Family::IPv4, "containers");
//! table.get_or_create_chain("isolation").append_rule(0, "return")?;
//! let report = table.apply().await?;
//! println!("{}", report.script);
//! # Ok(())
//! # }
//! ```

use crate::core::error::{Error, Result};
use crate::core::probe;
use crate::core::script::{number_lines, reload_script, update_script};
use crate::core::table::Table;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Environment variable naming the nft program to probe for.
pub const NFT_ENV: &str = "NFTSYNC_NFT";

const DEFAULT_PROGRAM: &str = "nft";

/// Which nft program to look for.
///
/// A bare name is searched on `PATH`; anything containing a `/` is taken as a
/// path to the binary itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftConfig {
    pub program: String,
}

impl Default for NftConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
        }
    }
}

impl NftConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Reads `NFTSYNC_NFT`, falling back to `nft`.
    pub fn from_env() -> Self {
        std::env::var(NFT_ENV)
            .ok()
            .filter(|program| !program.trim().is_empty())
            .map_or_else(Self::default, Self::new)
    }
}

/// A located nft executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nft {
    path: PathBuf,
}

impl Nft {
    /// Resolves `config.program` to an executable file.
    ///
    /// Files on `PATH` without an execute bit are skipped, like a shell does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnabled`] if the program cannot be found.
    pub fn locate(config: &NftConfig) -> Result<Self> {
        let program = config.program.trim();
        if program.contains('/') {
            let path = PathBuf::from(program);
            return if is_executable(&path) {
                Ok(Self { path })
            } else {
                Err(Error::NotEnabled(format!(
                    "{program} is not an executable file"
                )))
            };
        }

        std::env::var_os("PATH")
            .and_then(|paths| {
                std::env::split_paths(&paths).find_map(|dir| {
                    let full_path = dir.join(program);
                    is_executable(&full_path).then_some(full_path)
                })
            })
            .map(|path| Self { path })
            .ok_or_else(|| Error::NotEnabled(format!("{program} not found in PATH")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feeds `script` to `nft -f -` and collects its output.
    ///
    /// The child is killed if the returned future is dropped before it
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Apply`] if nft cannot be driven or exits non-zero.
    pub async fn run(&self, script: &str) -> Result<(String, String)> {
        let fail = |message: String, stderr: String, exit_code: Option<i32>| {
            let numbered_script = number_lines(script);
            error!(
                nft = %self.path.display(),
                exit_code = ?exit_code,
                stderr = %stderr.trim(),
                script = %numbered_script,
                "nftables: {message}"
            );
            Error::apply(message, stderr, exit_code, numbered_script)
        };

        let mut child = Command::new(&self.path)
            .args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("failed to spawn nft: {e}"), String::new(), None))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| fail(format!("failed to write to nft stdin: {e}"), String::new(), None))?;
            // Dropping stdin closes it so nft sees end of input
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| fail(format!("failed to wait for nft: {e}"), String::new(), None))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(fail(
                format!("nft exited with {}", output.status),
                stderr,
                output.status.code(),
            ));
        }
        Ok((stdout, stderr))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// What a successful apply sent and what nft printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub script: String,
    pub stdout: String,
    pub stderr: String,
}

impl Table {
    /// Sends every pending change to nft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnabled`] unless [`probe::enable`] succeeded, and
    /// [`Error::Apply`] if nft fails. Pending changes survive a failure.
    pub async fn apply(&mut self) -> Result<ApplyReport> {
        let nft = probe::nft()?;
        self.apply_with(&nft).await
    }

    /// [`Table::apply`] with an explicit nft.
    ///
    /// Skips the [`probe`] gate: the caller located nft itself, e.g. with
    /// [`Nft::locate`]. Commit-on-success is the same.
    pub async fn apply_with(&mut self, nft: &Nft) -> Result<ApplyReport> {
        let script = update_script(self);
        let report = self.execute(nft, script).await?;
        info!(
            family = %self.family(),
            table = %self.name(),
            lines = report.script.lines().count(),
            "nftables: applied table"
        );
        Ok(report)
    }

    /// Deletes the table in nft and recreates it from the in-memory model.
    ///
    /// Used to get back in sync when an apply failed halfway and the kernel
    /// state is unknown.
    pub async fn reload(&mut self) -> Result<ApplyReport> {
        let nft = probe::nft()?;
        self.reload_with(&nft).await
    }

    /// [`Table::reload`] with an explicit nft, skipping the [`probe`] gate
    /// like [`Table::apply_with`].
    pub async fn reload_with(&mut self, nft: &Nft) -> Result<ApplyReport> {
        warn!(
            family = %self.family(),
            table = %self.name(),
            "nftables: reloading table"
        );
        let script = reload_script(self);
        self.execute(nft, script).await
    }

    /// [`Table::apply`], abandoned with [`Error::Cancelled`] if `cancel`
    /// completes first. The nft process is killed and nothing is committed.
    pub async fn apply_until<F>(&mut self, cancel: F) -> Result<ApplyReport>
    where
        F: Future<Output = ()>,
    {
        let nft = probe::nft()?;
        let family = self.family();
        let name = self.name().to_string();
        tokio::select! {
            result = self.apply_with(&nft) => result,
            () = cancel => {
                warn!(%family, table = %name, "nftables: apply cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    /// [`Table::apply`] bounded by `timeout`.
    pub async fn apply_with_timeout(&mut self, timeout: Duration) -> Result<ApplyReport> {
        let nft = probe::nft()?;
        match tokio::time::timeout(timeout, self.apply_with(&nft)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    family = %self.family(),
                    table = %self.name(),
                    ?timeout,
                    "nftables: apply timed out"
                );
                Err(Error::TimedOut(timeout))
            }
        }
    }

    async fn execute(&mut self, nft: &Nft, script: String) -> Result<ApplyReport> {
        let (stdout, stderr) = nft.run(&script).await?;
        debug!(
            family = %self.family(),
            table = %self.name(),
            stdout = %stdout.trim(),
            stderr = %stderr.trim(),
            "nftables: nft output"
        );
        self.updates_applied();
        Ok(ApplyReport {
            script,
            stdout,
            stderr,
        })
    }
}
