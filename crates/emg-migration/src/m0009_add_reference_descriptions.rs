use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(DeviceKinds::Table)
                    .add_column(ColumnDef::new(DeviceKinds::Description).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(MaintenanceKinds::Table)
                    .add_column(ColumnDef::new(MaintenanceKinds::Description).text().null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(MaintenanceKinds::Table)
                    .drop_column(MaintenanceKinds::Description)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(DeviceKinds::Table)
                    .drop_column(DeviceKinds::Description)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum DeviceKinds {
    Table,
    Description,
}

#[derive(DeriveIden)]
enum MaintenanceKinds {
    Table,
    Description,
}
