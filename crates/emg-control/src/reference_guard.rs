//! Deletes that refuse while other rows still point at the target.
//!
//! The count and the delete are separate statements. A row inserted in
//! between is caught by the `RESTRICT` foreign key and surfaces as `Db`.

use emg_db::entities::{
    deployments, device_kinds, device_statuses, devices, maintenance_kinds, maintenance_records,
    orders,
};
use sea_orm::prelude::Uuid;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded {
    DeviceKind,
    DeviceStatus,
    MaintenanceKind,
    Device,
    Order,
}

impl Guarded {
    fn subject(self) -> &'static str {
        match self {
            Guarded::DeviceKind => "Diese Geräteart",
            Guarded::DeviceStatus => "Dieser Status",
            Guarded::MaintenanceKind => "Diese Wartungsart",
            Guarded::Device => "Dieses Gerät",
            Guarded::Order => "Dieser Auftrag",
        }
    }

    fn dependents(self) -> &'static str {
        match self {
            Guarded::DeviceKind | Guarded::DeviceStatus => "Gerät(en)",
            Guarded::MaintenanceKind => "Wartung(en)",
            Guarded::Device => "Einsätzen oder Wartungen",
            Guarded::Order => "Einsätzen",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteGuardError {
    #[error("{} wird noch von {count} {} verwendet und kann nicht gelöscht werden", .target.subject(), .target.dependents())]
    InUse { target: Guarded, count: u64 },
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Number of rows that reference `id`.
pub async fn usage_count<C: ConnectionTrait>(
    db: &C,
    target: Guarded,
    id: Uuid,
) -> Result<u64, DbErr> {
    match target {
        Guarded::DeviceKind => {
            devices::Entity::find()
                .filter(devices::Column::KindId.eq(id))
                .count(db)
                .await
        }
        Guarded::DeviceStatus => {
            devices::Entity::find()
                .filter(devices::Column::StatusId.eq(id))
                .count(db)
                .await
        }
        Guarded::MaintenanceKind => {
            maintenance_records::Entity::find()
                .filter(maintenance_records::Column::KindId.eq(id))
                .count(db)
                .await
        }
        Guarded::Device => {
            let deployments = deployments::Entity::find()
                .filter(deployments::Column::DeviceId.eq(id))
                .count(db)
                .await?;
            let records = maintenance_records::Entity::find()
                .filter(maintenance_records::Column::DeviceId.eq(id))
                .count(db)
                .await?;
            Ok(deployments + records)
        }
        Guarded::Order => {
            deployments::Entity::find()
                .filter(deployments::Column::OrderId.eq(id))
                .count(db)
                .await
        }
    }
}

pub async fn delete_unreferenced<C: ConnectionTrait>(
    db: &C,
    target: Guarded,
    id: Uuid,
) -> Result<(), DeleteGuardError> {
    let count = usage_count(db, target, id).await?;
    if count > 0 {
        return Err(DeleteGuardError::InUse { target, count });
    }

    let res = match target {
        Guarded::DeviceKind => device_kinds::Entity::delete_by_id(id).exec(db).await?,
        Guarded::DeviceStatus => device_statuses::Entity::delete_by_id(id).exec(db).await?,
        Guarded::MaintenanceKind => maintenance_kinds::Entity::delete_by_id(id).exec(db).await?,
        Guarded::Device => devices::Entity::delete_by_id(id).exec(db).await?,
        Guarded::Order => orders::Entity::delete_by_id(id).exec(db).await?,
    };
    if res.rows_affected == 0 {
        return Err(DeleteGuardError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    #[tokio::test]
    async fn refuses_while_referenced_and_reports_count() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(3)]])
            .into_connection();

        let err = delete_unreferenced(&db, Guarded::DeviceKind, Uuid::new_v4())
            .await
            .unwrap_err();
        match &err {
            DeleteGuardError::InUse { count, .. } => assert_eq!(*count, 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Diese Geräteart wird noch von 3 Gerät(en) verwendet und kann nicht gelöscht werden"
        );

        // Only the count ran.
        assert_eq!(db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn deletes_when_unreferenced() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(0)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        delete_unreferenced(&db, Guarded::MaintenanceKind, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(db.into_transaction_log().len(), 2);
    }

    #[tokio::test]
    async fn device_usage_sums_deployments_and_maintenance() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(2)]])
            .append_query_results([[count_row(1)]])
            .into_connection();

        let err = delete_unreferenced(&db, Guarded::Device, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteGuardError::InUse { count: 3, .. }));
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(0)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let err = delete_unreferenced(&db, Guarded::Order, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteGuardError::NotFound));
    }
}
