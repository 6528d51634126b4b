//! Declarative table descriptions
//!
//! A [`TableDescription`] is the JSON form of a whole table, used by the CLI
//! and handy in tests. Building one runs the same mutation operations a
//! caller would, so duplicate rules or elements are reported the same way.
//!
//! ```json
//! {
//!   "family": "ip",
//!   "name": "containers",
//!   "chains": [
//!     {
//!       "name": "forward",
//!       "base": { "type": "filter", "hook": "forward", "priority": 0, "policy": "drop" },
//!       "rules": [ { "group": 0, "rule": "iifname vmap @ifaces" } ]
//!     },
//!     { "name": "isolate", "rules": [ { "rule": "drop" } ] }
//!   ],
//!   "vmaps": [ { "name": "ifaces", "elements": { "br0": "jump isolate" } } ],
//!   "sets": [ { "name": "trusted", "elements": [ "192.0.2.0/24" ] } ]
//! }
//! ```

use crate::core::error::{Error, Result};
use crate::core::table::Table;
use crate::core::types::{ChainType, Family, Hook, Policy, RuleGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDescription {
    pub family: Family,
    pub name: String,
    #[serde(default)]
    pub chains: Vec<ChainDescription>,
    #[serde(default)]
    pub vmaps: Vec<VMapDescription>,
    #[serde(default)]
    pub sets: Vec<SetDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<BaseChainDescription>,
    #[serde(default)]
    pub rules: Vec<RuleDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseChainDescription {
    #[serde(rename = "type")]
    pub chain_type: ChainType,
    pub hook: Hook,
    pub priority: i32,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDescription {
    #[serde(default)]
    pub group: RuleGroup,
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VMapDescription {
    pub name: String,
    #[serde(default)]
    pub elements: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetDescription {
    pub name: String,
    #[serde(default)]
    pub elements: Vec<String>,
}

impl TableDescription {
    /// Reads and parses a description file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::Serialization`] if it is not a valid description.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let description = serde_json::from_str(&json)?;
        debug!(path = %path.display(), "Loaded table description");
        Ok(description)
    }

    /// Builds a fresh table holding everything described, all of it pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Description`] naming the offending entry if the
    /// description repeats a chain, rule or element.
    pub fn build(&self) -> Result<Table> {
        if self.name.trim().is_empty() {
            return Err(Error::Description("table name is empty".to_string()));
        }
        let mut table = Table::new(self.family, self.name.clone());

        for chain in &self.chains {
            let context = |e: Error| Error::Description(format!("chain '{}': {e}", chain.name));
            let built = match &chain.base {
                Some(base) => {
                    let built = table
                        .base_chain(&chain.name, base.chain_type, base.hook, base.priority)
                        .map_err(context)?;
                    built.set_policy(base.policy).map_err(context)?;
                    built
                }
                None => {
                    if table.chain(&chain.name).is_some() {
                        return Err(context(Error::ChainExists {
                            chain: chain.name.clone(),
                        }));
                    }
                    table.get_or_create_chain(&chain.name)
                }
            };
            for rule in &chain.rules {
                built
                    .append_rule(rule.group, rule.rule.as_str())
                    .map_err(context)?;
            }
        }

        for vmap in &self.vmaps {
            let built = table.interface_vmap(&vmap.name);
            for (key, verdict) in &vmap.elements {
                built
                    .add_element(key, verdict)
                    .map_err(|e| Error::Description(format!("map '{}': {e}", vmap.name)))?;
            }
        }

        for set in &self.sets {
            let built = table.prefix_set(&set.name);
            for element in &set.elements {
                built
                    .add_element(element)
                    .map_err(|e| Error::Description(format!("set '{}': {e}", set.name)))?;
            }
        }

        Ok(table)
    }
}
