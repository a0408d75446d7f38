use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Devices::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Devices::Name).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Devices::Ownership)
                            .string_len(8)
                            .not_null()
                            .default("eigen"),
                    )
                    .col(ColumnDef::new(Devices::SerialNumber).string_len(8).not_null())
                    .col(ColumnDef::new(Devices::Client).string_len(5).null())
                    .col(ColumnDef::new(Devices::IpAddress).string_len(15).null())
                    .col(ColumnDef::new(Devices::Pin).string_len(4).null())
                    .col(ColumnDef::new(Devices::KindId).uuid().null())
                    .col(ColumnDef::new(Devices::StatusId).uuid().null())
                    .col(ColumnDef::new(Devices::PurchaseDate).date().null())
                    .col(ColumnDef::new(Devices::NextServiceDate).date().null())
                    .col(ColumnDef::new(Devices::Notes).text().null())
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Devices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_devices_name_unique")
                            .table(Devices::Table)
                            .col(Devices::Name)
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_devices_kind")
                            .from(Devices::Table, Devices::KindId)
                            .to(DeviceKinds::Table, DeviceKinds::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_devices_status")
                            .from(Devices::Table, Devices::StatusId)
                            .to(DeviceStatuses::Table, DeviceStatuses::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_devices_status_id")
                    .table(Devices::Table)
                    .col(Devices::StatusId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_devices_kind_id")
                    .table(Devices::Table)
                    .col(Devices::KindId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeviceKinds {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum DeviceStatuses {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
    Name,
    Ownership,
    SerialNumber,
    Client,
    IpAddress,
    Pin,
    KindId,
    StatusId,
    PurchaseDate,
    NextServiceDate,
    Notes,
    CreatedAt,
    UpdatedAt,
}
