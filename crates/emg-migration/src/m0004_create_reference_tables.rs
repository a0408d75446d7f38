use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// Device kinds, device statuses and maintenance kinds share one shape:
// a unique label plus a sort order.
fn reference_table<T>(table: T, id: T, label: T, sort_order: T, created_at: T) -> TableCreateStatement
where
    T: IntoIden + Copy + 'static,
{
    Table::create()
        .table(table)
        .if_not_exists()
        .col(ColumnDef::new(id).uuid().not_null().primary_key())
        .col(ColumnDef::new(label).string_len(100).not_null())
        .col(ColumnDef::new(sort_order).integer().not_null().default(0))
        .col(
            ColumnDef::new(created_at)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                reference_table(
                    DeviceKinds::Table,
                    DeviceKinds::Id,
                    DeviceKinds::Label,
                    DeviceKinds::SortOrder,
                    DeviceKinds::CreatedAt,
                )
                .index(
                    Index::create()
                        .name("idx_device_kinds_label_unique")
                        .table(DeviceKinds::Table)
                        .col(DeviceKinds::Label)
                        .unique(),
                )
                .to_owned(),
            )
            .await?;

        manager
            .create_table(
                reference_table(
                    DeviceStatuses::Table,
                    DeviceStatuses::Id,
                    DeviceStatuses::Label,
                    DeviceStatuses::SortOrder,
                    DeviceStatuses::CreatedAt,
                )
                .col(
                    ColumnDef::new(DeviceStatuses::Color)
                        .string_len(7)
                        .not_null()
                        .default("#6b7280"),
                )
                .index(
                    Index::create()
                        .name("idx_device_statuses_label_unique")
                        .table(DeviceStatuses::Table)
                        .col(DeviceStatuses::Label)
                        .unique(),
                )
                .to_owned(),
            )
            .await?;

        manager
            .create_table(
                reference_table(
                    MaintenanceKinds::Table,
                    MaintenanceKinds::Id,
                    MaintenanceKinds::Label,
                    MaintenanceKinds::SortOrder,
                    MaintenanceKinds::CreatedAt,
                )
                .col(ColumnDef::new(MaintenanceKinds::IntervalMonths).integer().null())
                .index(
                    Index::create()
                        .name("idx_maintenance_kinds_label_unique")
                        .table(MaintenanceKinds::Table)
                        .col(MaintenanceKinds::Label)
                        .unique(),
                )
                .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MaintenanceKinds::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceStatuses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceKinds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden, Clone, Copy)]
enum DeviceKinds {
    Table,
    Id,
    Label,
    SortOrder,
    CreatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum DeviceStatuses {
    Table,
    Id,
    Label,
    Color,
    SortOrder,
    CreatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum MaintenanceKinds {
    Table,
    Id,
    Label,
    IntervalMonths,
    SortOrder,
    CreatedAt,
}
