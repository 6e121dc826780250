use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// Role
///
/// The fixed seniority ladder of the portal, declared from most to least senior.
/// The declaration order IS the ordering: `rank()` and the derived `Ord` both follow it,
/// so role comparisons never go through string comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    Admin,
    BackOffice,
    Rm,
    Asm,
    MarketLead,
    FrontlineSales,
}

impl Role {
    /// Every role, most senior first.
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::BackOffice,
        Role::Rm,
        Role::Asm,
        Role::MarketLead,
        Role::FrontlineSales,
    ];

    /// Position on the seniority ladder. `0` is `admin`.
    pub fn rank(self) -> usize {
        self as usize
    }

    /// True when `self` sits at or above `other` on the ladder.
    pub fn is_senior_or_equal(self, other: Role) -> bool {
        self.rank() <= other.rank()
    }

    /// The set of roles at or above `self` (e.g. `rm` -> `{admin, back_office, rm}`).
    pub fn senior_or_equal(self) -> RoleSet {
        Role::ALL.iter().copied().take(self.rank() + 1).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::BackOffice => "back_office",
            Role::Rm => "rm",
            Role::Asm => "asm",
            Role::MarketLead => "market_lead",
            Role::FrontlineSales => "frontline_sales",
        }
    }

    /// Human readable label shown in the portal.
    pub fn display_name(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::BackOffice => "Back Office",
            Role::Rm => "Regional Head",
            Role::Asm => "Area Head",
            Role::MarketLead => "Market Head",
            Role::FrontlineSales => "Sales Executive",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a role string coming from storage or a request does not name a known role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// RoleSet
///
/// The minimal-role list attached to a content node (`view_roles`, `edit_roles`).
/// Backed by a `BTreeSet`, so duplicates collapse and the order in which roles were
/// submitted carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(transparent)]
#[ts(export)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding exactly one role.
    pub fn only(role: Role) -> Self {
        std::iter::once(role).collect()
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Storage representation (`text[]` column).
    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|role| role.as_str().to_string()).collect()
    }

    /// Parses a storage representation, rejecting any unknown role.
    pub fn parse_all<I, S>(values: I) -> Result<Self, UnknownRole>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .map(|value| value.as_ref().parse::<Role>())
            .collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// can_access
///
/// Seniority implies access: a subject passes when at least one required role is
/// junior-or-equal to it. Membership is the equal case, so `admin` passes every
/// non-empty requirement and `frontline_sales` passes only what lists it explicitly.
/// An empty requirement grants nothing.
pub fn can_access(subject: Role, required: &RoleSet) -> bool {
    required.iter().any(|role| subject.is_senior_or_equal(role))
}

/// Capability
///
/// Portal-wide permissions that are not attached to a content node. Each one is a
/// single-role requirement evaluated through `can_access`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Create folders and modules, upload images, open the management screens.
    ManageContent,
    /// Move folders and modules up and down.
    ReorderContent,
    /// List users and change their roles.
    ManageUsers,
}

impl Capability {
    pub fn minimum_role(self) -> Role {
        match self {
            Capability::ManageContent => Role::BackOffice,
            Capability::ReorderContent => Role::Admin,
            Capability::ManageUsers => Role::Admin,
        }
    }
}

pub fn has_capability(subject: Role, capability: Capability) -> bool {
    can_access(subject, &RoleSet::only(capability.minimum_role()))
}

/// NavigationLinks
///
/// Which management entries the portal shows to a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct NavigationLinks {
    pub module_management: bool,
    pub user_management: bool,
}

impl NavigationLinks {
    pub fn for_role(role: Role) -> Self {
        Self {
            module_management: has_capability(role, Capability::ManageContent),
            user_management: has_capability(role, Capability::ManageUsers),
        }
    }
}
