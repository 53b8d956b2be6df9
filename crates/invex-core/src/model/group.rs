use crate::query::Filter;
use serde::{Deserialize, Serialize};

/// How a computer belongs to a group
///
/// Dynamic rows are owned by the cache rebuild; Static and Excluded rows
/// are manual overrides that survive predicate re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    Dynamic,
    Static,
    Excluded,
}

impl MembershipKind {
    pub const ALL: [MembershipKind; 3] = [
        MembershipKind::Dynamic,
        MembershipKind::Static,
        MembershipKind::Excluded,
    ];

    /// Stored representation
    pub fn as_i64(&self) -> i64 {
        match self {
            MembershipKind::Dynamic => 0,
            MembershipKind::Static => 1,
            MembershipKind::Excluded => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MembershipKind::Dynamic),
            1 => Some(MembershipKind::Static),
            2 => Some(MembershipKind::Excluded),
            _ => None,
        }
    }

    pub fn is_manual(&self) -> bool {
        !matches!(self, MembershipKind::Dynamic)
    }

    /// Dynamic and Static rows make a computer a member; Excluded does not
    pub fn is_member(&self) -> bool {
        !matches!(self, MembershipKind::Excluded)
    }
}

impl std::str::FromStr for MembershipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" => Ok(MembershipKind::Dynamic),
            "static" => Ok(MembershipKind::Static),
            "excluded" => Ok(MembershipKind::Excluded),
            other => Err(format!("unknown membership kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for MembershipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MembershipKind::Dynamic => "dynamic",
            MembershipKind::Static => "static",
            MembershipKind::Excluded => "excluded",
        };
        f.write_str(s)
    }
}

/// Dynamic-membership predicate of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GroupPredicate {
    /// Administrator-authored SQL selecting computer ids; trusted text
    Sql(String),
    /// Structured filters evaluated through the query composer
    Filters(Vec<Filter>),
}

/// A computer group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Id of the group's placeholder row in `computers`
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub predicate: Option<GroupPredicate>,
    /// Unix seconds of the last rebuild
    pub cache_created_at: Option<i64>,
    /// Unix seconds after which the cache is stale
    pub cache_expires_at: Option<i64>,
}

impl Group {
    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// An expiry exists and lies after `now`
    pub fn is_cache_fresh(&self, now: i64) -> bool {
        self.cache_expires_at.is_some_and(|expires| expires > now)
    }
}

/// One membership row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: i64,
    pub computer_id: i64,
    pub kind: MembershipKind,
}

/// Owner of configuration overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Computer(i64),
    Group(i64),
}

impl EntityRef {
    pub fn id(&self) -> i64 {
        match self {
            EntityRef::Computer(id) | EntityRef::Group(id) => *id,
        }
    }
}
