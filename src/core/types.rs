//! Ruleset primitives
//!
//! Value types naming the nftables objects this crate manages. Each enum
//! renders to the exact keyword `nft` expects, via `strum::Display`.
//!
//! Only the types container networking needs are modelled. See
//! <https://wiki.nftables.org/wiki-nftables/index.php/Configuring_chains>.

use serde::{Deserialize, Serialize};

/// Address family of a table.
///
/// Fixed when the table is created. There is deliberately no `inet`: set
/// element types are derived from the family, and there is no `inet` address
/// type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum Family {
    #[strum(serialize = "ip")]
    #[serde(rename = "ip")]
    IPv4,
    #[strum(serialize = "ip6")]
    #[serde(rename = "ip6")]
    IPv6,
}

impl Family {
    /// Element type of an address set in a table of this family.
    pub const fn addr_type(self) -> ElementType {
        match self {
            Family::IPv4 => ElementType::Ipv4Addr,
            Family::IPv6 => ElementType::Ipv6Addr,
        }
    }
}

/// Base chain types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChainType {
    Filter,
    Route,
    Nat,
}

/// Base chain hooks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Hook {
    Ingress,
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
}

/// Default policy of a base chain.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Policy {
    #[default]
    Accept,
    Drop,
}

/// nft data types usable as map keys or set elements.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ElementType {
    Ipv4Addr,
    Ipv6Addr,
    EtherAddr,
    InetProto,
    InetService,
    Mark,
    Ifname,
}

/// Standard base chain priorities (not valid for the bridge family).
pub mod priority {
    pub const RAW: i32 = -300;
    pub const MANGLE: i32 = -150;
    pub const DST_NAT: i32 = -100;
    pub const FILTER: i32 = 0;
    pub const SECURITY: i32 = 50;
    pub const SRC_NAT: i32 = 100;
}

/// Orders rules within a chain. Purely internal, nft never sees it.
///
/// Groups render lowest first; inside a group rules keep insertion order.
pub type RuleGroup = i32;
