use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{invoice, user};

/// The utility a meter measures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum MeterType {
    #[sea_orm(string_value = "water")]
    Water,
    #[sea_orm(string_value = "electricity")]
    Electricity,
}

impl MeterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterType::Water => "water",
            MeterType::Electricity => "electricity",
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "water" => Ok(MeterType::Water),
            "electricity" => Ok(MeterType::Electricity),
            other => Err(format!("Unknown meter type: {}", other)),
        }
    }
}

/// A meter value submitted by a user together with a photo of the meter.
///
/// Verification is one-way: once `verified` is set, `verified_by` and
/// `verified_at` never change again.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "meter_readings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// The submitter.
    pub user_id: i32,
    pub meter_type: MeterType,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub reading_value: Decimal,
    /// Reference returned by the file store, e.g. `/uploads/<uuid>.jpg`.
    pub image_url: String,
    pub reading_date: DateTimeUtc,
    #[sea_orm(default_value = "false")]
    pub verified: bool,
    /// The verifier, a different relation than `user_id`.
    pub verified_by: Option<i32>,
    pub verified_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Submitter,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::VerifiedBy",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    Verifier,
    #[sea_orm(has_many = "super::invoice::Entity")]
    Invoice,
}

impl Related<user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submitter.def()
    }
}

impl Related<invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

/// Navigates from a reading to the user who verified it.
#[derive(Debug)]
pub struct VerifierLink;

impl Linked for VerifierLink {
    type FromEntity = Entity;
    type ToEntity = user::Entity;

    fn link(&self) -> Vec<RelationDef> {
        vec![Relation::Verifier.def()]
    }
}

impl ActiveModelBehavior for ActiveModel {}
