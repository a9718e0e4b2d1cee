use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle of an audit job. The `reports` table doubles as the work
/// queue: transitions are single-row conditional updates guarded by the
/// previous status, so at most one worker ever holds a job in `Running`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "done")]
    Done,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    #[sea_orm(string_value = "product")]
    Product,
    #[sea_orm(string_value = "home")]
    Home,
    #[sea_orm(string_value = "cart")]
    Cart,
    #[sea_orm(string_value = "other")]
    Other,
}

impl PageType {
    /// Parse a client-supplied page type; unknown values are a validation
    /// error at the API boundary, not a serde failure.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(Self::Product),
            "home" => Some(Self::Home),
            "cart" => Some(Self::Cart),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[sea_orm(string_value = "shopify")]
    Shopify,
    #[sea_orm(string_value = "woocommerce")]
    Woocommerce,
    #[sea_orm(string_value = "unknown")]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Normalized audit URL: https-prefixed, host lowercased, tracking
    /// parameters stripped. Also the cache-dedup key.
    pub url: String,
    pub page_type: PageType,
    pub status: AuditStatus,
    /// User-facing error category text; never raw internal errors.
    pub error: Option<String>,
    pub detected_platform: Option<Platform>,
    #[sea_orm(column_type = "Json", nullable)]
    pub scraped_json: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub result_json: Option<Json>,
    pub lead_captured: bool,
    pub used_mock: bool,
    pub ip_hash: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
