use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// One fixed-window counter per limiting key (`ip:<hash>` or
/// `email:<address>`). Rows are reset in place when the window elapses,
/// never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_limits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub count: i32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
