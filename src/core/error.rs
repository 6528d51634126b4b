use crate::core::types::RuleGroup;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Core error types for nftsync
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("chain '{chain}' already exists")]
    ChainExists { chain: String },

    #[error("chain '{chain}' does not exist")]
    ChainNotFound { chain: String },

    /// Policy can only be set on chains attached to a hook
    #[error("chain '{chain}' is not a base chain")]
    NotBaseChain { chain: String },

    #[error("rule exists in chain '{chain}' group {group}: {rule}")]
    RuleExists {
        chain: String,
        group: RuleGroup,
        rule: String,
    },

    #[error("rule group {group} does not exist in chain '{chain}'")]
    RuleGroupNotFound { chain: String, group: RuleGroup },

    #[error("rule does not exist in chain '{chain}' group {group}: {rule}")]
    RuleNotFound {
        chain: String,
        group: RuleGroup,
        rule: String,
    },

    #[error("{kind} '{name}' already contains element '{key}'")]
    ElementExists {
        kind: ElementContainer,
        name: String,
        key: String,
    },

    #[error("{kind} '{name}' does not contain element '{key}'")]
    ElementNotFound {
        kind: ElementContainer,
        name: String,
        key: String,
    },

    /// Apply was called without a successful probe for nft
    #[error("nftables is not enabled: {0}")]
    NotEnabled(String),

    /// nft ran and failed, or could not be driven
    #[error("nftables error: {0}")]
    Apply(Box<ApplyFailure>),

    #[error("nft invocation cancelled")]
    Cancelled,

    #[error("nft invocation timed out after {0:?}")]
    TimedOut(Duration),

    /// A table description could not be turned into a table
    #[error("Invalid table description: {0}")]
    Description(String),
}

/// Which kind of keyed collection an element error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementContainer {
    VerdictMap,
    Set,
}

impl fmt::Display for ElementContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementContainer::VerdictMap => f.write_str("verdict map"),
            ElementContainer::Set => f.write_str("set"),
        }
    }
}

/// Details of a failed nft run.
///
/// `numbered_script` is the generated input with 1-based line numbers, since
/// that is what nft's own messages refer to.
#[derive(Debug, Clone)]
pub struct ApplyFailure {
    pub message: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub numbered_script: String,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

impl Error {
    pub(crate) fn apply(
        message: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
        numbered_script: String,
    ) -> Self {
        Error::Apply(Box::new(ApplyFailure {
            message: message.into(),
            stderr: stderr.into(),
            exit_code,
            numbered_script,
        }))
    }

    /// Something was added that already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ChainExists { .. } | Error::RuleExists { .. } | Error::ElementExists { .. }
        )
    }

    /// Something was deleted that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ChainNotFound { .. }
                | Error::RuleGroupNotFound { .. }
                | Error::RuleNotFound { .. }
                | Error::ElementNotFound { .. }
        )
    }

    /// Feature disabled, as opposed to an apply that ran and failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::NotEnabled(_))
    }

    /// Failure details when nft itself was involved.
    pub fn apply_failure(&self) -> Option<&ApplyFailure> {
        match self {
            Error::Apply(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of nft stderr patterns and their translations
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an nft error message against known patterns.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify nftables")
                .with_suggestion("Run as root or grant CAP_NET_ADMIN")
                .with_suggestion("Inside a container, check the network namespace is writable");
        }

        if lower.contains("cache initialization failed") {
            return ErrorTranslation::new("Failed to initialize nftables cache")
                .with_suggestion("This usually means nft lacks privileges");
        }

        if lower.contains("syntax error") || lower.contains("could not process rule") {
            return ErrorTranslation::new("nft rejected a rule or element")
                .with_suggestion("Match the line number in the error against the numbered script")
                .with_suggestion("Rule text and element keys are passed to nft verbatim");
        }

        if lower.contains("no such file or directory") {
            return ErrorTranslation::new("An object referenced by the script does not exist")
                .with_suggestion("The table may have been deleted outside this process")
                .with_suggestion("A reload recreates the whole table from the in-memory model");
        }

        if lower.contains("device or resource busy") || lower.contains("resource busy") {
            return ErrorTranslation::new("An object is still in use")
                .with_suggestion("A deleted chain may still be referenced by a rule or map");
        }

        if lower.contains("address family") && lower.contains("not supported") {
            return ErrorTranslation::new("Element does not match the set's address family")
                .with_suggestion("IPv6 prefixes belong in ip6 tables, IPv4 prefixes in ip tables");
        }

        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: modprobe nf_tables");
        }

        ErrorTranslation::new(format!("nftables error: {msg}"))
            .with_suggestion("Check the numbered script logged alongside this error")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let exists = Error::ChainExists {
            chain: "fwd".into(),
        };
        assert!(exists.is_conflict());
        assert!(!exists.is_not_found());

        let missing = Error::RuleGroupNotFound {
            chain: "fwd".into(),
            group: 3,
        };
        assert!(missing.is_not_found());

        assert!(Error::NotEnabled("no nft".into()).is_unavailable());
        assert!(!Error::Cancelled.is_unavailable());
    }

    #[test]
    fn test_element_messages() {
        let err = Error::ElementExists {
            kind: ElementContainer::VerdictMap,
            name: "ifaces".into(),
            key: "eth0".into(),
        };
        assert_eq!(
            err.to_string(),
            "verdict map 'ifaces' already contains element 'eth0'"
        );

        let err = Error::ElementNotFound {
            kind: ElementContainer::Set,
            name: "nets".into(),
            key: "192.0.2.0/24".into(),
        };
        assert_eq!(
            err.to_string(),
            "set 'nets' does not contain element '192.0.2.0/24'"
        );
    }

    #[test]
    fn test_apply_failure_display_includes_stderr() {
        let err = Error::apply(
            "nft exited with status 1",
            "Error: syntax error\n",
            Some(1),
            "1:\tbad\n".into(),
        );
        assert_eq!(
            err.to_string(),
            "nftables error: nft exited with status 1: Error: syntax error"
        );
        let failure = err.apply_failure().unwrap();
        assert_eq!(failure.exit_code, Some(1));
        assert_eq!(failure.numbered_script, "1:\tbad\n");
    }

    #[test]
    fn test_syntax_error_translation() {
        let translation =
            NftablesErrorPattern::match_error("Error: syntax error, unexpected newline");
        assert!(translation.user_message.contains("rejected"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("numbered script"))
        );
    }

    #[test]
    fn test_missing_object_translation() {
        let translation = NftablesErrorPattern::match_error(
            "Error: Could not process rule: No such file or directory",
        );
        // "could not process rule" wins over the missing-object pattern
        assert!(translation.user_message.contains("rejected"));

        let translation = NftablesErrorPattern::match_error("No such file or directory");
        assert!(translation.user_message.contains("does not exist"));
        assert!(translation.suggestions.iter().any(|s| s.contains("reload")));
    }

    #[test]
    fn test_fallback_translation() {
        let translation = NftablesErrorPattern::match_error("something odd");
        assert_eq!(translation.user_message, "nftables error: something odd");
    }
}
