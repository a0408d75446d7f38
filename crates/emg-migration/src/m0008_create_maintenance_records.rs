use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MaintenanceRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MaintenanceRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MaintenanceRecords::DeviceId).uuid().not_null())
                    .col(ColumnDef::new(MaintenanceRecords::KindId).uuid().null())
                    .col(ColumnDef::new(MaintenanceRecords::Date).date().not_null())
                    .col(
                        ColumnDef::new(MaintenanceRecords::PerformedBy)
                            .string_len(100)
                            .null(),
                    )
                    .col(ColumnDef::new(MaintenanceRecords::Notes).text().null())
                    .col(
                        ColumnDef::new(MaintenanceRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_maintenance_records_device")
                            .from(MaintenanceRecords::Table, MaintenanceRecords::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_maintenance_records_kind")
                            .from(MaintenanceRecords::Table, MaintenanceRecords::KindId)
                            .to(MaintenanceKinds::Table, MaintenanceKinds::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_maintenance_records_device_id")
                    .table(MaintenanceRecords::Table)
                    .col(MaintenanceRecords::DeviceId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MaintenanceRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum MaintenanceKinds {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum MaintenanceRecords {
    Table,
    Id,
    DeviceId,
    KindId,
    Date,
    PerformedBy,
    Notes,
    CreatedAt,
}
