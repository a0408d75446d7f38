use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::ConnectionTrait;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deployments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deployments::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deployments::DeviceId).uuid().not_null())
                    .col(ColumnDef::new(Deployments::OrderId).uuid().not_null())
                    .col(ColumnDef::new(Deployments::StartDate).date().not_null())
                    .col(ColumnDef::new(Deployments::PlannedEndDate).date().null())
                    .col(ColumnDef::new(Deployments::ActualEndDate).date().null())
                    .col(ColumnDef::new(Deployments::Street).string_len(255).null())
                    .col(ColumnDef::new(Deployments::PostalCode).string_len(10).null())
                    .col(ColumnDef::new(Deployments::City).string_len(100).null())
                    .col(ColumnDef::new(Deployments::Lat).double().null())
                    .col(ColumnDef::new(Deployments::Lng).double().null())
                    .col(ColumnDef::new(Deployments::Notes).text().null())
                    .col(
                        ColumnDef::new(Deployments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deployments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_device")
                            .from(Deployments::Table, Deployments::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_order")
                            .from(Deployments::Table, Deployments::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deployments_order_id")
                    .table(Deployments::Table)
                    .col(Deployments::OrderId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // At most one active deployment per device. sea-query has no partial
        // index builder, so this one is plain SQL.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_deployments_device_active \
                 ON deployments (device_id) WHERE actual_end_date IS NULL",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Deployments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Deployments {
    Table,
    Id,
    DeviceId,
    OrderId,
    StartDate,
    PlannedEndDate,
    ActualEndDate,
    Street,
    PostalCode,
    City,
    Lat,
    Lng,
    Notes,
    CreatedAt,
    UpdatedAt,
}
