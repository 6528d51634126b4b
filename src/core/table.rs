//! In-memory mirror of an nftables table
//!
//! A [`Table`] owns its chains, verdict maps and named sets. Nothing here
//! talks to nft: mutations only update the model and mark what changed, and
//! [`Table::apply`](crate::core::nft) later turns those marks into a script.
//!
//! # Change tracking
//!
//! - The table itself is *newly declared* until its first successful apply,
//!   so a same-named table left behind by an earlier process gets flushed.
//! - A chain is *dirty* when created or when its rules or policy change. Dirty
//!   chains are flushed and rewritten in full.
//! - Maps and sets are *newly declared* until their first apply, and buffer
//!   element additions and deletions in between applies.
//!
//! # Example
//!
//! ```
//! use nftsync::core::table::Table;
//! use nftsync::core::types::{ChainType, Family, Hook, priority};
//!
//! let mut table = Table::new(Family::IPv4, "containers");
//! let fwd = table
//!     .base_chain("forward", ChainType::Filter, Hook::Forward, priority::FILTER)
//!     .unwrap();
//! fwd.append_rule(0, "ct state established,related accept").unwrap();
//!
//! table.prefix_set("trusted").add_element("192.0.2.0/24").unwrap();
//! assert!(table.has_pending_changes());
//! ```

use crate::core::error::{ElementContainer, Error, Result};
use crate::core::types::{ChainType, ElementType, Family, Hook, Policy, RuleGroup};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Identity of a table, shared read-only with everything the table owns.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TableId {
    pub(crate) family: Family,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) id: Arc<TableId>,
    pub(crate) chains: BTreeMap<String, Chain>,
    pub(crate) vmaps: BTreeMap<String, VerdictMap>,
    pub(crate) sets: BTreeMap<String, Set>,
    /// Set when the table is new, not when its contents change.
    pub(crate) newly_declared: bool,
    pub(crate) delete_chain_commands: Vec<String>,
}

impl Table {
    /// Creates a table. It is declared and flushed by the next apply.
    pub fn new(family: Family, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%family, table = %name, "nftables: created table");
        Self {
            id: Arc::new(TableId { family, name }),
            chains: BTreeMap::new(),
            vmaps: BTreeMap::new(),
            sets: BTreeMap::new(),
            newly_declared: true,
            delete_chain_commands: Vec::new(),
        }
    }

    pub fn family(&self) -> Family {
        self.id.family
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn is_newly_declared(&self) -> bool {
        self.newly_declared
    }

    /// Creates a base chain attached to `hook`, with policy accept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainExists`] if any chain of that name exists.
    pub fn base_chain(
        &mut self,
        name: &str,
        chain_type: ChainType,
        hook: Hook,
        priority: i32,
    ) -> Result<&mut Chain> {
        if self.chains.contains_key(name) {
            return Err(Error::ChainExists {
                chain: name.to_string(),
            });
        }
        debug!(
            family = %self.id.family,
            table = %self.id.name,
            chain = name,
            chain_type = %chain_type,
            %hook,
            prio = priority,
            "nftables: created base chain"
        );
        let chain = Chain::new(
            Arc::clone(&self.id),
            name,
            Some(BaseChain {
                chain_type,
                hook,
                priority,
                policy: Policy::Accept,
            }),
        );
        Ok(self.chains.entry(name.to_string()).or_insert(chain))
    }

    /// Returns the named chain, adding a regular chain if there is none.
    pub fn get_or_create_chain(&mut self, name: &str) -> &mut Chain {
        let id = &self.id;
        self.chains.entry(name.to_string()).or_insert_with(|| {
            debug!(
                family = %id.family,
                table = %id.name,
                chain = name,
                "nftables: created chain"
            );
            Chain::new(Arc::clone(id), name, None)
        })
    }

    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.get(name)
    }

    pub fn chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.get_mut(name)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    /// Removes a chain now and queues its `delete chain` for the next apply.
    ///
    /// References to the chain are not checked; nft reports those.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainNotFound`] if there is no such chain.
    pub fn delete_chain(&mut self, name: &str) -> Result<()> {
        if self.chains.remove(name).is_none() {
            return Err(Error::ChainNotFound {
                chain: name.to_string(),
            });
        }
        self.delete_chain_commands.push(format!(
            "delete chain {} {} {}",
            self.id.family, self.id.name, name
        ));
        debug!(
            family = %self.id.family,
            table = %self.id.name,
            chain = name,
            "nftables: deleted chain"
        );
        Ok(())
    }

    /// `delete chain` commands waiting for the next apply, oldest first.
    pub fn pending_chain_deletions(&self) -> &[String] {
        &self.delete_chain_commands
    }

    /// Returns the interface-name verdict map `name`, creating it if needed.
    pub fn interface_vmap(&mut self, name: &str) -> &mut VerdictMap {
        let id = &self.id;
        self.vmaps.entry(name.to_string()).or_insert_with(|| {
            debug!(
                family = %id.family,
                table = %id.name,
                vmap = name,
                "nftables: created interface vmap"
            );
            VerdictMap::new(Arc::clone(id), name, ElementType::Ifname)
        })
    }

    pub fn vmap(&self, name: &str) -> Option<&VerdictMap> {
        self.vmaps.get(name)
    }

    pub fn vmap_mut(&mut self, name: &str) -> Option<&mut VerdictMap> {
        self.vmaps.get_mut(name)
    }

    pub fn vmaps(&self) -> impl Iterator<Item = &VerdictMap> {
        self.vmaps.values()
    }

    /// Returns the address-prefix set `name`, creating it if needed.
    ///
    /// The element type follows the table family and the set has the
    /// `interval` flag so it can hold prefixes.
    pub fn prefix_set(&mut self, name: &str) -> &mut Set {
        let id = &self.id;
        self.sets.entry(name.to_string()).or_insert_with(|| {
            debug!(
                family = %id.family,
                table = %id.name,
                set = name,
                "nftables: created set"
            );
            Set::new(Arc::clone(id), name, id.family.addr_type())
        })
    }

    pub fn set(&self, name: &str) -> Option<&Set> {
        self.sets.get(name)
    }

    pub fn set_mut(&mut self, name: &str) -> Option<&mut Set> {
        self.sets.get_mut(name)
    }

    pub fn sets(&self) -> impl Iterator<Item = &Set> {
        self.sets.values()
    }

    /// True if the next update script would change anything in nft.
    pub fn has_pending_changes(&self) -> bool {
        self.newly_declared
            || !self.delete_chain_commands.is_empty()
            || self.chains.values().any(|c| c.dirty)
            || self.vmaps.values().any(VerdictMap::has_pending_changes)
            || self.sets.values().any(Set::has_pending_changes)
    }

    /// Commit point: forget every pending change after nft accepted them.
    pub(crate) fn updates_applied(&mut self) {
        self.delete_chain_commands.clear();
        for chain in self.chains.values_mut() {
            chain.dirty = false;
        }
        for vmap in self.vmaps.values_mut() {
            vmap.newly_declared = false;
            vmap.added.clear();
            vmap.deleted.clear();
        }
        for set in self.sets.values_mut() {
            set.newly_declared = false;
            set.added.clear();
            set.deleted.clear();
        }
        self.newly_declared = false;
    }
}

/// Hook attachment of a base chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseChain {
    pub chain_type: ChainType,
    pub hook: Hook,
    pub priority: i32,
    pub policy: Policy,
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub(crate) table: Arc<TableId>,
    pub(crate) name: String,
    pub(crate) base: Option<BaseChain>,
    pub(crate) rule_groups: BTreeMap<RuleGroup, Vec<String>>,
    pub(crate) dirty: bool,
}

impl Chain {
    fn new(table: Arc<TableId>, name: &str, base: Option<BaseChain>) -> Self {
        Self {
            table,
            name: name.to_string(),
            base,
            rule_groups: BTreeMap::new(),
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook attachment, `None` for a regular chain.
    pub fn base(&self) -> Option<&BaseChain> {
        self.base.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// # Errors
    ///
    /// Returns [`Error::NotBaseChain`] for a regular chain.
    pub fn set_policy(&mut self, policy: Policy) -> Result<()> {
        let Some(base) = self.base.as_mut() else {
            return Err(Error::NotBaseChain {
                chain: self.name.clone(),
            });
        };
        base.policy = policy;
        self.dirty = true;
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            chain = %self.name,
            %policy,
            "nftables: set chain policy"
        );
        Ok(())
    }

    /// Appends `rule` to the end of `group`.
    ///
    /// Rules are compared as text, so two spellings of the same rule are two
    /// different rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuleExists`] if the group already holds this text.
    pub fn append_rule(&mut self, group: RuleGroup, rule: impl Into<String>) -> Result<()> {
        let rule = rule.into();
        let rules = self.rule_groups.entry(group).or_default();
        if rules.contains(&rule) {
            return Err(Error::RuleExists {
                chain: self.name.clone(),
                group,
                rule,
            });
        }
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            chain = %self.name,
            group,
            rule = %rule,
            "nftables: appended rule"
        );
        rules.push(rule);
        self.dirty = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::RuleGroupNotFound`] if nothing was ever added to
    /// `group`, or [`Error::RuleNotFound`] if the text is not in it.
    pub fn delete_rule(&mut self, group: RuleGroup, rule: &str) -> Result<()> {
        let Some(rules) = self.rule_groups.get_mut(&group) else {
            return Err(Error::RuleGroupNotFound {
                chain: self.name.clone(),
                group,
            });
        };
        let Some(pos) = rules.iter().position(|r| r == rule) else {
            return Err(Error::RuleNotFound {
                chain: self.name.clone(),
                group,
                rule: rule.to_string(),
            });
        };
        rules.remove(pos);
        self.dirty = true;
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            chain = %self.name,
            group,
            rule,
            "nftables: deleted rule"
        );
        Ok(())
    }

    /// Appends the rule when `enable` is true, deletes it otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`Chain::append_rule`] / [`Chain::delete_rule`].
    pub fn update_rule(&mut self, group: RuleGroup, rule: &str, enable: bool) -> Result<()> {
        if enable {
            self.append_rule(group, rule)
        } else {
            self.delete_rule(group, rule)
        }
    }

    /// Rules in render order: groups ascending, insertion order within a group.
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.rule_groups.values().flatten().map(String::as_str)
    }

    pub fn rule_count(&self) -> usize {
        self.rule_groups.values().map(Vec::len).sum()
    }
}

/// A map from key to verdict, e.g. interface name to `jump some-chain`.
#[derive(Debug, Clone)]
pub struct VerdictMap {
    pub(crate) table: Arc<TableId>,
    pub(crate) name: String,
    pub(crate) element_type: ElementType,
    pub(crate) flags: Vec<String>,
    pub(crate) elements: BTreeMap<String, String>,
    /// New map, needs a flush (not set when elements change).
    pub(crate) newly_declared: bool,
    pub(crate) added: BTreeMap<String, String>,
    pub(crate) deleted: BTreeSet<String>,
}

impl VerdictMap {
    fn new(table: Arc<TableId>, name: &str, element_type: ElementType) -> Self {
        Self {
            table,
            name: name.to_string(),
            element_type,
            flags: Vec::new(),
            elements: BTreeMap::new(),
            newly_declared: true,
            added: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn is_newly_declared(&self) -> bool {
        self.newly_declared
    }

    pub fn elements(&self) -> &BTreeMap<String, String> {
        &self.elements
    }

    pub fn verdict(&self, key: &str) -> Option<&str> {
        self.elements.get(key).map(String::as_str)
    }

    /// Adds `key : verdict`. The caller is responsible for the key's type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ElementExists`] if the key is already present.
    pub fn add_element(&mut self, key: &str, verdict: &str) -> Result<()> {
        if self.elements.contains_key(key) {
            return Err(Error::ElementExists {
                kind: ElementContainer::VerdictMap,
                name: self.name.clone(),
                key: key.to_string(),
            });
        }
        self.elements.insert(key.to_string(), verdict.to_string());
        self.added.insert(key.to_string(), verdict.to_string());
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            vmap = %self.name,
            key,
            verdict,
            "nftables: added vmap element"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::ElementNotFound`] if the key is not present.
    pub fn delete_element(&mut self, key: &str) -> Result<()> {
        if self.elements.remove(key).is_none() {
            return Err(Error::ElementNotFound {
                kind: ElementContainer::VerdictMap,
                name: self.name.clone(),
                key: key.to_string(),
            });
        }
        // An element added since the last apply never reached nft
        if self.added.remove(key).is_none() || self.deleted.contains(key) {
            self.deleted.insert(key.to_string());
        }
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            vmap = %self.name,
            key,
            "nftables: deleted vmap element"
        );
        Ok(())
    }

    pub(crate) fn has_pending_changes(&self) -> bool {
        self.newly_declared || !self.added.is_empty() || !self.deleted.is_empty()
    }
}

/// A named set of addresses or prefixes.
#[derive(Debug, Clone)]
pub struct Set {
    pub(crate) table: Arc<TableId>,
    pub(crate) name: String,
    pub(crate) element_type: ElementType,
    pub(crate) flags: Vec<String>,
    pub(crate) elements: BTreeSet<String>,
    /// New set, needs a flush (not set when elements change).
    pub(crate) newly_declared: bool,
    pub(crate) added: BTreeSet<String>,
    pub(crate) deleted: BTreeSet<String>,
}

impl Set {
    fn new(table: Arc<TableId>, name: &str, element_type: ElementType) -> Self {
        Self {
            table,
            name: name.to_string(),
            element_type,
            flags: vec!["interval".to_string()],
            elements: BTreeSet::new(),
            newly_declared: true,
            added: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn is_newly_declared(&self) -> bool {
        self.newly_declared
    }

    pub fn elements(&self) -> &BTreeSet<String> {
        &self.elements
    }

    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains(element)
    }

    /// Adds an element. The caller is responsible for its type matching the
    /// table family.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ElementExists`] if the element is already present.
    pub fn add_element(&mut self, element: &str) -> Result<()> {
        if !self.elements.insert(element.to_string()) {
            return Err(Error::ElementExists {
                kind: ElementContainer::Set,
                name: self.name.clone(),
                key: element.to_string(),
            });
        }
        self.added.insert(element.to_string());
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            set = %self.name,
            element,
            "nftables: added set element"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::ElementNotFound`] if the element is not present.
    pub fn delete_element(&mut self, element: &str) -> Result<()> {
        if !self.elements.remove(element) {
            return Err(Error::ElementNotFound {
                kind: ElementContainer::Set,
                name: self.name.clone(),
                key: element.to_string(),
            });
        }
        if !self.added.remove(element) || self.deleted.contains(element) {
            self.deleted.insert(element.to_string());
        }
        debug!(
            family = %self.table.family,
            table = %self.table.name,
            set = %self.name,
            element,
            "nftables: deleted set element"
        );
        Ok(())
    }

    pub(crate) fn has_pending_changes(&self) -> bool {
        self.newly_declared || !self.added.is_empty() || !self.deleted.is_empty()
    }
}
