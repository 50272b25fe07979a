use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::Display;
use utoipa::ToSchema;

/// Staff role stored on the user row
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "user_role")]
pub enum Role {
    #[sea_orm(string_value = "operator")]
    Operator,
    #[sea_orm(string_value = "manager")]
    Manager,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl FromStr for Role {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Role::Operator),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            _ => Err(strum::ParseError::VariantNotFound),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    ManageUsers,
    ManageHospitals,
    ManageTriageRules,
    ViewMetrics,
    OperateOccurrences,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Capability::ManageUsers => 1,
            Capability::ManageHospitals => 1 << 1,
            Capability::ManageTriageRules => 1 << 2,
            Capability::ViewMetrics => 1 << 3,
            Capability::OperateOccurrences => 1 << 4,
        }
    }
}

/// Fixed set of capabilities, computed once per principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self::empty()
            .with(Capability::ManageUsers)
            .with(Capability::ManageHospitals)
            .with(Capability::ManageTriageRules)
            .with(Capability::ViewMetrics)
            .with(Capability::OperateOccurrences)
    }

    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub const fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Super admins hold everything regardless of role.
    pub const fn for_role(role: Role, is_super_admin: bool) -> Self {
        if is_super_admin {
            return Self::all();
        }
        match role {
            Role::Admin => Self::all(),
            Role::Manager => Self::empty()
                .with(Capability::ManageTriageRules)
                .with(Capability::ViewMetrics)
                .with(Capability::OperateOccurrences),
            Role::Operator => Self::empty().with(Capability::OperateOccurrences),
        }
    }
}
