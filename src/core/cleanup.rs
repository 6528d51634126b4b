//! Undo records for table mutations
//!
//! Callers that install rules and elements on behalf of something with a
//! lifetime (a network, an endpoint) need to remove exactly what they added
//! when it goes away. The `*_with_cleanup` methods on [`Table`] perform a
//! mutation and hand back a [`Cleanup`] describing its inverse.
//!
//! # Example
//!
//! ```
//! use nftsync::core::cleanup::CleanupStack;
//! use nftsync::core::table::Table;
//! use nftsync::core::types::Family;
//!
//! let mut table = Table::new(Family::IPv4, "containers");
//! let mut cleanups = CleanupStack::default();
//!
//! cleanups.push(table.append_rule_with_cleanup("fwd", 10, "iifname br0 accept").unwrap());
//! cleanups.push(table.add_vmap_element_with_cleanup("ifaces", "br0", "jump fwd").unwrap());
//!
//! cleanups.run(&mut table).unwrap();
//! assert_eq!(table.chain("fwd").unwrap().rule_count(), 0);
//! assert!(table.vmap("ifaces").unwrap().elements().is_empty());
//! ```

use crate::core::error::{ElementContainer, Error, Result};
use crate::core::table::Table;
use crate::core::types::RuleGroup;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The inverse of one table mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cleanup {
    Rule {
        chain: String,
        group: RuleGroup,
        rule: String,
    },
    VMapElement {
        vmap: String,
        key: String,
    },
    SetElement {
        set: String,
        element: String,
    },
}

impl Cleanup {
    /// Reverts the mutation this record was created for.
    ///
    /// # Errors
    ///
    /// Fails like the matching delete operation if the rule or element is
    /// already gone.
    pub fn undo(&self, table: &mut Table) -> Result<()> {
        match self {
            Cleanup::Rule { chain, group, rule } => table
                .chain_mut(chain)
                .ok_or_else(|| Error::ChainNotFound {
                    chain: chain.clone(),
                })?
                .delete_rule(*group, rule),
            Cleanup::VMapElement { vmap, key } => table
                .vmap_mut(vmap)
                .ok_or_else(|| Error::ElementNotFound {
                    kind: ElementContainer::VerdictMap,
                    name: vmap.clone(),
                    key: key.clone(),
                })?
                .delete_element(key),
            Cleanup::SetElement { set, element } => table
                .set_mut(set)
                .ok_or_else(|| Error::ElementNotFound {
                    kind: ElementContainer::Set,
                    name: set.clone(),
                    key: element.clone(),
                })?
                .delete_element(element),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Cleanup::Rule { chain, group, rule } => {
                format!("delete rule from {chain} group {group}: {rule}")
            }
            Cleanup::VMapElement { vmap, key } => format!("delete {key} from map {vmap}"),
            Cleanup::SetElement { set, element } => format!("delete {element} from set {set}"),
        }
    }
}

/// Cleanups collected while setting something up, undone newest first.
#[derive(Debug, Clone, Default)]
pub struct CleanupStack {
    stack: Vec<Cleanup>,
}

impl CleanupStack {
    pub fn push(&mut self, cleanup: Cleanup) {
        self.stack.push(cleanup);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Runs every cleanup, newest first.
    ///
    /// Stops at the first failure; the failed cleanup and everything older
    /// stay on the stack.
    pub fn run(&mut self, table: &mut Table) -> Result<()> {
        while let Some(cleanup) = self.stack.last() {
            debug!(
                table = %table.name(),
                cleanup = %cleanup.description(),
                "nftables: running cleanup"
            );
            cleanup.undo(table)?;
            self.stack.pop();
        }
        Ok(())
    }
}

impl Table {
    /// Appends `rule` to `chain`, creating the chain if needed.
    pub fn append_rule_with_cleanup(
        &mut self,
        chain: &str,
        group: RuleGroup,
        rule: &str,
    ) -> Result<Cleanup> {
        self.get_or_create_chain(chain).append_rule(group, rule)?;
        Ok(Cleanup::Rule {
            chain: chain.to_string(),
            group,
            rule: rule.to_string(),
        })
    }

    /// Adds `key : verdict` to the interface verdict map `vmap`.
    pub fn add_vmap_element_with_cleanup(
        &mut self,
        vmap: &str,
        key: &str,
        verdict: &str,
    ) -> Result<Cleanup> {
        self.interface_vmap(vmap).add_element(key, verdict)?;
        Ok(Cleanup::VMapElement {
            vmap: vmap.to_string(),
            key: key.to_string(),
        })
    }

    /// Adds `element` to the prefix set `set`.
    pub fn add_set_element_with_cleanup(&mut self, set: &str, element: &str) -> Result<Cleanup> {
        self.prefix_set(set).add_element(element)?;
        Ok(Cleanup::SetElement {
            set: set.to_string(),
            element: element.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Family;

    #[test]
    fn test_rule_cleanup() {
        let mut table = Table::new(Family::IPv4, "t");
        let cleanup = table
            .append_rule_with_cleanup("c", 1, "counter accept")
            .unwrap();
        table.updates_applied();

        cleanup.undo(&mut table).unwrap();
        let chain = table.chain("c").unwrap();
        assert_eq!(chain.rule_count(), 0);
        assert!(chain.is_dirty());

        // Already gone
        assert!(cleanup.undo(&mut table).unwrap_err().is_not_found());
    }

    #[test]
    fn test_element_cleanups() {
        let mut table = Table::new(Family::IPv6, "t");
        let vmap = table
            .add_vmap_element_with_cleanup("m", "eth0", "drop")
            .unwrap();
        let set = table
            .add_set_element_with_cleanup("s", "fd00::/8")
            .unwrap();
        table.updates_applied();

        vmap.undo(&mut table).unwrap();
        set.undo(&mut table).unwrap();
        assert!(table.vmap("m").unwrap().elements().is_empty());
        assert!(!table.set("s").unwrap().contains("fd00::/8"));
        assert!(table.has_pending_changes());
    }

    #[test]
    fn test_duplicate_returns_no_cleanup() {
        let mut table = Table::new(Family::IPv4, "t");
        table.add_set_element_with_cleanup("s", "10.0.0.0/8").unwrap();
        let err = table
            .add_set_element_with_cleanup("s", "10.0.0.0/8")
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_stack_runs_newest_first() {
        let mut table = Table::new(Family::IPv4, "t");
        let mut stack = CleanupStack::default();
        stack.push(table.append_rule_with_cleanup("c", 0, "a").unwrap());
        stack.push(table.append_rule_with_cleanup("c", 0, "b").unwrap());
        assert_eq!(stack.len(), 2);

        // Remove "a" behind the stack's back: "b" is undone, then "a" fails
        table.chain_mut("c").unwrap().delete_rule(0, "a").unwrap();
        let err = stack.run(&mut table).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(stack.len(), 1);
        assert_eq!(table.chain("c").unwrap().rule_count(), 0);
    }

    #[test]
    fn test_stack_empties_on_success() {
        let mut table = Table::new(Family::IPv4, "t");
        let mut stack = CleanupStack::default();
        stack.push(table.add_vmap_element_with_cleanup("m", "eth0", "accept").unwrap());
        stack.push(table.add_set_element_with_cleanup("s", "192.0.2.0/24").unwrap());
        stack.run(&mut table).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_description() {
        let cleanup = Cleanup::SetElement {
            set: "nets".into(),
            element: "10.0.0.0/8".into(),
        };
        assert_eq!(cleanup.description(), "delete 10.0.0.0/8 from set nets");
    }
}
