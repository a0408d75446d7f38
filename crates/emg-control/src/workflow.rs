//! Device-to-order assignment.
//!
//! A device is dropped onto an order (`assign`) and later released (`end`).
//! Each step writes the deployment row and the device status in one
//! transaction.

use std::collections::HashSet;

use chrono::NaiveDate;
use emg_db::entities::{deployments, device_statuses, devices, orders};
use emg_domain::deployment::EndDated;
use emg_domain::status;
use emg_domain::validation::{DeploymentValues, EndDeploymentValues};
use emg_domain::OrderStatus;
use sea_orm::prelude::{Expr, Uuid};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

/// Pointer travel before a drag starts on the board, in CSS pixels.
pub const DRAG_ACTIVATION_DISTANCE_PX: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Gerätestatus \"{0}\" nicht gefunden")]
    StatusMissing(&'static str),
    #[error("Gerät nicht gefunden")]
    DeviceNotFound,
    #[error("Auftrag nicht gefunden")]
    OrderNotFound,
    #[error("Einsatz nicht gefunden")]
    DeploymentNotFound,
    #[error("Status nicht gefunden")]
    StatusNotFound,
    #[error("Gerät {0} ist bereits im Einsatz")]
    DeviceBusy(String),
    #[error("Auftrag {0} ist nicht aktiv")]
    OrderInactive(String),
    #[error("Einsatz ist bereits beendet")]
    AlreadyEnded,
    #[error("Enddatum liegt vor dem Startdatum")]
    EndBeforeStart,
    #[error("Status \"{0}\" kann beim Beenden eines Einsatzes nicht gewählt werden")]
    StatusNotAllowed(String),
    #[error("Auftrag {order} hat noch {count} aktive(n) Einsatz/Einsätze und kann nicht deaktiviert werden")]
    OrderHasActiveDeployments { order: String, count: u64 },
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl WorkflowError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WorkflowError::DeviceNotFound
                | WorkflowError::OrderNotFound
                | WorkflowError::DeploymentNotFound
                | WorkflowError::StatusNotFound
        )
    }
}

async fn status_by_label<C: ConnectionTrait>(
    db: &C,
    label: &'static str,
) -> Result<device_statuses::Model, WorkflowError> {
    let all = device_statuses::Entity::find()
        .order_by_asc(device_statuses::Column::SortOrder)
        .all(db)
        .await?;
    status::find_by_label(&all, label, |s| s.label.as_str())
        .cloned()
        .ok_or(WorkflowError::StatusMissing(label))
}

async fn set_device_status<C: ConnectionTrait>(
    db: &C,
    device_id: Uuid,
    status_id: Uuid,
) -> Result<(), WorkflowError> {
    let res = devices::Entity::update_many()
        .col_expr(devices::Column::StatusId, Expr::value(Some(status_id)))
        .col_expr(
            devices::Column::UpdatedAt,
            Expr::value(chrono::Utc::now().fixed_offset()),
        )
        .filter(devices::Column::Id.eq(device_id))
        .exec(db)
        .await?;
    if res.rows_affected == 0 {
        return Err(WorkflowError::DeviceNotFound);
    }
    Ok(())
}

/// Inserts the four workflow statuses into an empty status table.
///
/// Returns the number of rows written; an already populated table is left alone.
pub async fn seed_default_statuses<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    if device_statuses::Entity::find().count(db).await? > 0 {
        return Ok(0);
    }
    let now = chrono::Utc::now().fixed_offset();
    let rows = status::DEFAULT_STATUSES
        .iter()
        .map(|(label, color, sort_order)| device_statuses::ActiveModel {
            id: Set(Uuid::new_v4()),
            label: Set((*label).to_string()),
            color: Set((*color).to_string()),
            sort_order: Set(*sort_order),
            created_at: Set(now),
        });
    let res = device_statuses::Entity::insert_many(rows)
        .exec_without_returning(db)
        .await?;
    tracing::info!(rows = res, "seeded default device statuses");
    Ok(res)
}

/// Loads the order an active deployment is placed on. Only active orders
/// show up on the board, so inactive ones are refused.
pub async fn active_order<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
) -> Result<orders::Model, WorkflowError> {
    let order = orders::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(WorkflowError::OrderNotFound)?;
    if OrderStatus::parse(&order.status) != Some(OrderStatus::Aktiv) {
        return Err(WorkflowError::OrderInactive(order.order_number));
    }
    Ok(order)
}

/// Refuses to set `order` to inactive while devices are still deployed on it.
pub async fn ensure_status_change<C: ConnectionTrait>(
    db: &C,
    order: &orders::Model,
    next: OrderStatus,
) -> Result<(), WorkflowError> {
    if next != OrderStatus::Inaktiv || OrderStatus::parse(&order.status) == Some(OrderStatus::Inaktiv) {
        return Ok(());
    }
    let count = deployments::Entity::find()
        .filter(deployments::Column::OrderId.eq(order.id))
        .filter(deployments::Column::ActualEndDate.is_null())
        .count(db)
        .await?;
    if count > 0 {
        return Err(WorkflowError::OrderHasActiveDeployments {
            order: order.order_number.clone(),
            count,
        });
    }
    Ok(())
}

/// Creates an active deployment and marks the device as in use.
pub async fn assign(
    db: &DatabaseConnection,
    input: DeploymentValues,
) -> Result<deployments::Model, WorkflowError> {
    let in_use = status_by_label(db, status::IN_USE).await?;

    let device = devices::Entity::find_by_id(input.device_id)
        .one(db)
        .await?
        .ok_or(WorkflowError::DeviceNotFound)?;
    let order = active_order(db, input.order_id).await?;

    let busy = deployments::Entity::find()
        .filter(deployments::Column::DeviceId.eq(device.id))
        .filter(deployments::Column::ActualEndDate.is_null())
        .count(db)
        .await?;
    if busy > 0 {
        return Err(WorkflowError::DeviceBusy(device.name));
    }

    let now = chrono::Utc::now().fixed_offset();
    let txn = db.begin().await?;
    let deployment = deployments::ActiveModel {
        id: Set(Uuid::new_v4()),
        device_id: Set(device.id),
        order_id: Set(order.id),
        start_date: Set(input.start_date),
        planned_end_date: Set(input.planned_end_date),
        actual_end_date: Set(None),
        street: Set(input.street),
        postal_code: Set(input.postal_code),
        city: Set(input.city),
        lat: Set(input.lat),
        lng: Set(input.lng),
        notes: Set(input.notes),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    set_device_status(&txn, device.id, in_use.id).await?;
    txn.commit().await?;

    tracing::info!(
        deployment_id = %deployment.id,
        device = %device.name,
        order = %order.order_number,
        "device assigned"
    );
    Ok(deployment)
}

/// Ends an active deployment and moves the device to `status_id`, or to
/// "Im Büro" when none is given. `end_date` defaults to `today`.
pub async fn end(
    db: &DatabaseConnection,
    deployment_id: Uuid,
    input: EndDeploymentValues,
    today: NaiveDate,
) -> Result<deployments::Model, WorkflowError> {
    let deployment = deployments::Entity::find_by_id(deployment_id)
        .one(db)
        .await?
        .ok_or(WorkflowError::DeploymentNotFound)?;
    if !deployment.is_active() {
        return Err(WorkflowError::AlreadyEnded);
    }

    let status_id = match input.status_id {
        Some(id) => {
            let chosen = device_statuses::Entity::find_by_id(id)
                .one(db)
                .await?
                .ok_or(WorkflowError::StatusNotFound)?;
            // An ended deployment must not leave the device marked as in use.
            if status::label_matches(&chosen.label, status::IN_USE) {
                return Err(WorkflowError::StatusNotAllowed(chosen.label));
            }
            chosen.id
        }
        None => status_by_label(db, status::IN_OFFICE).await?.id,
    };

    let end_date = input.end_date.unwrap_or(today);
    if end_date < deployment.start_date {
        return Err(WorkflowError::EndBeforeStart);
    }

    let device_id = deployment.device_id;
    let txn = db.begin().await?;
    let mut active: deployments::ActiveModel = deployment.into();
    active.actual_end_date = Set(Some(end_date));
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
    let ended = active.update(&txn).await?;
    set_device_status(&txn, device_id, status_id).await?;
    txn.commit().await?;

    tracing::info!(deployment_id = %ended.id, %end_date, "deployment ended");
    Ok(ended)
}

/// Devices that can be dragged onto an order: no active deployment and
/// status "Im Büro" or no status at all.
pub fn available_devices<'a>(
    all: &'a [devices::Model],
    statuses: &[device_statuses::Model],
    active: &[deployments::Model],
) -> Vec<&'a devices::Model> {
    let deployed: HashSet<Uuid> = active
        .iter()
        .filter(|d| d.is_active())
        .map(|d| d.device_id)
        .collect();
    let in_office = status::find_by_label(statuses, status::IN_OFFICE, |s| s.label.as_str())
        .map(|s| s.id);

    all.iter()
        .filter(|d| !deployed.contains(&d.id))
        .filter(|d| match d.status_id {
            None => true,
            Some(id) => Some(id) == in_office,
        })
        .collect()
}

pub struct OrderLane {
    pub order: orders::Model,
    pub deployments: Vec<deployments::Model>,
}

pub struct Board {
    pub devices: Vec<devices::Model>,
    pub statuses: Vec<device_statuses::Model>,
    pub pool: Vec<Uuid>,
    pub lanes: Vec<OrderLane>,
    pub in_use_status_id: Option<Uuid>,
}

pub async fn load_board(db: &DatabaseConnection) -> Result<Board, DbErr> {
    let devices = devices::Entity::find()
        .order_by_asc(devices::Column::Name)
        .all(db)
        .await?;
    let statuses = device_statuses::Entity::find()
        .order_by_asc(device_statuses::Column::SortOrder)
        .all(db)
        .await?;
    let orders = orders::Entity::find()
        .filter(orders::Column::Status.eq(OrderStatus::Aktiv.as_str()))
        .order_by_asc(orders::Column::OrderNumber)
        .all(db)
        .await?;
    let active = deployments::Entity::find()
        .filter(deployments::Column::ActualEndDate.is_null())
        .order_by_asc(deployments::Column::StartDate)
        .all(db)
        .await?;

    let pool = available_devices(&devices, &statuses, &active)
        .into_iter()
        .map(|d| d.id)
        .collect();
    let in_use_status_id =
        status::find_by_label(&statuses, status::IN_USE, |s| s.label.as_str()).map(|s| s.id);

    let lanes = orders
        .into_iter()
        .map(|order| OrderLane {
            deployments: active
                .iter()
                .filter(|d| d.order_id == order.id)
                .cloned()
                .collect(),
            order,
        })
        .collect();

    Ok(Board {
        devices,
        statuses,
        pool,
        lanes,
        in_use_status_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn ts() -> sea_orm::prelude::DateTimeWithTimeZone {
        chrono::Utc::now().fixed_offset()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn status_row(label: &str, sort_order: i32) -> device_statuses::Model {
        device_statuses::Model {
            id: Uuid::new_v4(),
            label: label.to_string(),
            color: "#000000".to_string(),
            sort_order,
            created_at: ts(),
        }
    }

    fn device(name: &str, status_id: Option<Uuid>) -> devices::Model {
        devices::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            ownership: "eigen".to_string(),
            serial_number: "12345678".to_string(),
            client: None,
            ip_address: None,
            pin: None,
            kind_id: None,
            status_id,
            purchase_date: None,
            next_service_date: None,
            notes: None,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn order(number: &str, status: &str) -> orders::Model {
        orders::Model {
            id: Uuid::new_v4(),
            order_number: number.to_string(),
            site: Some("Bern".to_string()),
            description: None,
            status: status.to_string(),
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn deployment(device_id: Uuid, order_id: Uuid, end: Option<NaiveDate>) -> deployments::Model {
        deployments::Model {
            id: Uuid::new_v4(),
            device_id,
            order_id,
            start_date: day(2024, 3, 1),
            planned_end_date: None,
            actual_end_date: end,
            street: None,
            postal_code: None,
            city: None,
            lat: None,
            lng: None,
            notes: None,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    /// Bound values of the `UPDATE "devices"` statement the mock saw.
    fn device_update(db: sea_orm::DatabaseConnection) -> String {
        db.into_transaction_log()
            .iter()
            .flat_map(|t| t.statements())
            .find(|st| st.sql.starts_with(r#"UPDATE "devices""#))
            .map(|st| format!("{:?}", st.values))
            .unwrap_or_default()
    }

    fn one_row_affected() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    fn values(device_id: Uuid, order_id: Uuid) -> DeploymentValues {
        DeploymentValues {
            device_id,
            order_id,
            start_date: day(2024, 3, 1),
            planned_end_date: None,
            street: Some("Bundesplatz 3".to_string()),
            postal_code: Some("3005".to_string()),
            city: Some("Bern".to_string()),
            lat: Some(46.94),
            lng: Some(7.44),
            notes: None,
        }
    }

    #[test]
    fn pool_holds_idle_office_and_unlabelled_devices() {
        let office = status_row("Im Büro", 1);
        let defect = status_row("Defekt", 4);
        let statuses = vec![office.clone(), defect.clone()];

        let idle = device("HMQ-0001", Some(office.id));
        let no_status = device("HMQ-0002", None);
        let broken = device("HMQ-0003", Some(defect.id));
        let busy = device("HMQ-0004", Some(office.id));
        let returned = device("HMQ-0005", Some(office.id));
        let all = vec![idle, no_status, broken, busy, returned];

        let order_id = Uuid::new_v4();
        let active = vec![
            deployment(all[3].id, order_id, None),
            deployment(all[4].id, order_id, Some(day(2024, 3, 5))),
        ];

        let names: Vec<&str> = available_devices(&all, &statuses, &active)
            .into_iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["HMQ-0001", "HMQ-0002", "HMQ-0005"]);
    }

    #[tokio::test]
    async fn assign_inserts_deployment_and_sets_in_use() {
        let office = status_row("Im Büro", 1);
        let in_use = status_row("im einsatz ", 2);
        let dev = device("HMQ-0001", None);
        let ord = order("510001.0001", "aktiv");
        let created = deployment(dev.id, ord.id, None);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![office.clone(), in_use.clone()]])
            .append_query_results([vec![dev.clone()]])
            .append_query_results([vec![ord.clone()]])
            .append_query_results([[count_row(0)]])
            .append_query_results([vec![created.clone()]])
            .append_exec_results([one_row_affected()])
            .into_connection();

        let got = assign(&db, values(dev.id, ord.id)).await.unwrap();
        assert_eq!(got.id, created.id);
        assert!(got.is_active());

        let written = device_update(db);
        assert!(written.contains(&in_use.id.to_string()));
        assert!(!written.contains(&office.id.to_string()));
    }

    #[tokio::test]
    async fn assign_refuses_busy_device() {
        let dev = device("HMQ-0001", None);
        let ord = order("510001.0001", "aktiv");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![status_row("Im Einsatz", 2)]])
            .append_query_results([vec![dev.clone()]])
            .append_query_results([vec![ord.clone()]])
            .append_query_results([[count_row(1)]])
            .into_connection();

        let err = assign(&db, values(dev.id, ord.id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::DeviceBusy(ref n) if n == "HMQ-0001"));
    }

    #[tokio::test]
    async fn assign_fails_without_in_use_status() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![status_row("Im Büro", 1)]])
            .into_connection();

        let err = assign(&db, values(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StatusMissing(status::IN_USE)));
        assert_eq!(err.to_string(), "Gerätestatus \"Im Einsatz\" nicht gefunden");
    }

    #[tokio::test]
    async fn assign_refuses_inactive_order() {
        let dev = device("HMQ-0001", None);
        let ord = order("510001.0001", "inaktiv");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![status_row("Im Einsatz", 2)]])
            .append_query_results([vec![dev.clone()]])
            .append_query_results([vec![ord.clone()]])
            .into_connection();

        let err = assign(&db, values(dev.id, ord.id)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::OrderInactive(_)));
    }

    #[tokio::test]
    async fn end_defaults_to_today_and_office() {
        let office = status_row("Im Büro", 1);
        let active = deployment(Uuid::new_v4(), Uuid::new_v4(), None);
        let today = day(2024, 4, 2);
        let mut ended = active.clone();
        ended.actual_end_date = Some(today);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![active.clone()]])
            .append_query_results([vec![office.clone()]])
            .append_query_results([vec![ended]])
            .append_exec_results([one_row_affected()])
            .into_connection();

        let got = end(
            &db,
            active.id,
            EndDeploymentValues {
                end_date: None,
                status_id: None,
            },
            today,
        )
        .await
        .unwrap();
        assert_eq!(got.actual_end_date, Some(today));
        assert!(!got.is_active());
        assert!(device_update(db).contains(&office.id.to_string()));
    }

    #[tokio::test]
    async fn end_moves_device_to_the_chosen_status() {
        let maintenance = status_row("In Wartung", 3);
        let active = deployment(Uuid::new_v4(), Uuid::new_v4(), None);
        let mut ended = active.clone();
        ended.actual_end_date = Some(day(2024, 3, 20));

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![active.clone()]])
            .append_query_results([vec![maintenance.clone()]])
            .append_query_results([vec![ended]])
            .append_exec_results([one_row_affected()])
            .into_connection();

        let got = end(
            &db,
            active.id,
            EndDeploymentValues {
                end_date: Some(day(2024, 3, 20)),
                status_id: Some(maintenance.id),
            },
            day(2024, 4, 2),
        )
        .await
        .unwrap();
        assert_eq!(got.actual_end_date, Some(day(2024, 3, 20)));
        assert!(device_update(db).contains(&maintenance.id.to_string()));
    }

    #[tokio::test]
    async fn end_refuses_in_use_as_target_status() {
        let in_use = status_row(" Im Einsatz", 2);
        let active = deployment(Uuid::new_v4(), Uuid::new_v4(), None);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![active.clone()]])
            .append_query_results([vec![in_use.clone()]])
            .into_connection();

        let err = end(
            &db,
            active.id,
            EndDeploymentValues {
                end_date: None,
                status_id: Some(in_use.id),
            },
            day(2024, 4, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkflowError::StatusNotAllowed(_)));
        // Nothing written: only the two lookups reached the database.
        assert_eq!(db.into_transaction_log().len(), 2);
    }

    #[tokio::test]
    async fn ending_twice_is_refused() {
        let done = deployment(Uuid::new_v4(), Uuid::new_v4(), Some(day(2024, 3, 9)));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![done.clone()]])
            .into_connection();

        let err = end(
            &db,
            done.id,
            EndDeploymentValues {
                end_date: None,
                status_id: None,
            },
            day(2024, 4, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyEnded));
    }

    #[tokio::test]
    async fn end_before_start_is_refused() {
        let active = deployment(Uuid::new_v4(), Uuid::new_v4(), None);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![active.clone()]])
            .append_query_results([vec![status_row("Im Büro", 1)]])
            .into_connection();

        let err = end(
            &db,
            active.id,
            EndDeploymentValues {
                end_date: Some(day(2024, 2, 1)),
                status_id: None,
            },
            day(2024, 4, 2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkflowError::EndBeforeStart));
    }

    #[tokio::test]
    async fn seeding_fills_only_an_empty_table() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![count_row(0)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 4,
            }])
            .into_connection();
        assert_eq!(seed_default_statuses(&db).await.unwrap(), 4);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![count_row(4)]])
            .into_connection();
        assert_eq!(seed_default_statuses(&db).await.unwrap(), 0);
        assert_eq!(db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn deactivating_an_order_with_deployed_devices_is_refused() {
        let ord = order("510001.0001", "aktiv");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(2)]])
            .into_connection();

        let err = ensure_status_change(&db, &ord, OrderStatus::Inaktiv)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::OrderHasActiveDeployments { count: 2, .. }));
        assert!(err.to_string().contains("510001.0001"));
    }

    #[tokio::test]
    async fn deactivating_an_idle_order_is_allowed() {
        let ord = order("510001.0001", "aktiv");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(0)]])
            .into_connection();
        ensure_status_change(&db, &ord, OrderStatus::Inaktiv).await.unwrap();

        // Keeping the order active needs no lookup at all.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        ensure_status_change(&db, &ord, OrderStatus::Aktiv).await.unwrap();
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn moving_to_an_inactive_order_is_refused() {
        let ord = order("510001.0003", "inaktiv");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![ord.clone()]])
            .into_connection();

        let err = active_order(&db, ord.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::OrderInactive(ref n) if n == "510001.0003"));
    }
}
