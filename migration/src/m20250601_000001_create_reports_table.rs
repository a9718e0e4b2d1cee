use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reports::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Reports::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Reports::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Reports::Url).string().not_null())
                    .col(ColumnDef::new(Reports::PageType).string().not_null())
                    .col(ColumnDef::new(Reports::Status).string().not_null())
                    .col(ColumnDef::new(Reports::Error).string().null())
                    .col(ColumnDef::new(Reports::DetectedPlatform).string().null())
                    .col(ColumnDef::new(Reports::ScrapedJson).json().null())
                    .col(ColumnDef::new(Reports::ResultJson).json().null())
                    .col(
                        ColumnDef::new(Reports::LeadCaptured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Reports::UsedMock)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Reports::IpHash).string().null())
                    .to_owned(),
            )
            .await?;

        // The queue scan is always "oldest row in status X", so index both.
        manager
            .create_index(
                Index::create()
                    .name("idx_reports_status_created_at")
                    .table(Reports::Table)
                    .col(Reports::Status)
                    .col(Reports::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Cache-hit lookups match on normalized url + page type.
        manager
            .create_index(
                Index::create()
                    .name("idx_reports_url_page_type")
                    .table(Reports::Table)
                    .col(Reports::Url)
                    .col(Reports::PageType)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reports::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Reports {
    Table,
    Id,
    CreatedAt,
    Url,
    PageType,
    Status,
    Error,
    DetectedPlatform,
    ScrapedJson,
    ResultJson,
    LeadCaptured,
    UsedMock,
    IpHash,
}
