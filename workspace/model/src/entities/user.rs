use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{invoice, meter_reading};

/// Role of a user inside a building.
///
/// The set is closed: every authorization rule is expressed against these
/// three variants and nothing else.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[sea_orm(string_value = "resident")]
    Resident,
    #[sea_orm(string_value = "manager")]
    Manager,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Resident => "resident",
            UserRole::Manager => "manager",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resident" => Ok(UserRole::Resident),
            "manager" => Ok(UserRole::Manager),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Unknown user role: {}", other)),
        }
    }
}

/// A person with access to the system: a resident submitting readings,
/// or a manager/admin verifying and billing them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub email: String,
    /// Argon2 PHC string, never the raw password.
    pub hashed_password: String,
    pub full_name: String,
    pub role: UserRole,
    /// Only required for residents, and only when the account is created.
    pub apartment_number: Option<String>,
    #[sea_orm(default_value = "true")]
    pub is_active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Readings this user submitted.
    #[sea_orm(has_many = "super::meter_reading::Entity")]
    MeterReading,
    #[sea_orm(has_many = "super::invoice::Entity")]
    Invoice,
}

impl Related<meter_reading::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeterReading.def()
    }
}

impl Related<invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

/// Navigates from a user to the readings they verified.
///
/// Kept apart from [`Relation::MeterReading`] because both relations target
/// the same table through different foreign keys.
#[derive(Debug)]
pub struct VerifiedReadingsLink;

impl Linked for VerifiedReadingsLink {
    type FromEntity = Entity;
    type ToEntity = meter_reading::Entity;

    fn link(&self) -> Vec<RelationDef> {
        vec![meter_reading::Relation::Verifier.def().rev()]
    }
}

impl ActiveModelBehavior for ActiveModel {}
