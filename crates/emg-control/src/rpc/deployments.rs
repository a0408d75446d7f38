use std::collections::{HashMap, HashSet};

use emg_db::entities::{deployments, devices, orders};
use emg_domain::deployment::{EndDated, partition_active};
use emg_domain::format;
use emg_domain::validation::{DeploymentForm, EndDeploymentForm};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Select, Set,
};
use specta::Type;

use super::{
    ApiError, Ctx, DeleteOutput, IdInput, api_error, invalid, iso_date, not_found, parse_id,
    require_user, store_error, timestamp, today, workflow_error,
};
use crate::audit;
use crate::workflow;

const LOAD_MSG: &str = "Fehler beim Laden der Einsätze";

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DeploymentDto {
    pub id: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub order_id: String,
    pub order_number: Option<String>,
    pub site: Option<String>,
    pub start_date: String,
    pub planned_end_date: Option<String>,
    pub actual_end_date: Option<String>,
    /// Human readable span, e.g. "01.03.2024 - 15.03.2024".
    pub period: String,
    pub active: bool,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateDeploymentInput {
    pub id: String,
    pub values: DeploymentForm,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct EndDeploymentInput {
    pub id: String,
    #[serde(default)]
    pub values: EndDeploymentForm,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct DeviceIdInput {
    pub device_id: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct OrderIdInput {
    pub order_id: String,
}

/// Joins device names and order numbers onto deployment rows.
pub(super) async fn to_dtos<C: ConnectionTrait>(
    db: &C,
    rows: Vec<deployments::Model>,
) -> Result<Vec<DeploymentDto>, DbErr> {
    let device_ids: HashSet<Uuid> = rows.iter().map(|d| d.device_id).collect();
    let order_ids: HashSet<Uuid> = rows.iter().map(|d| d.order_id).collect();

    let device_names: HashMap<Uuid, String> = if device_ids.is_empty() {
        HashMap::new()
    } else {
        devices::Entity::find()
            .filter(devices::Column::Id.is_in(device_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect()
    };
    let order_rows: HashMap<Uuid, orders::Model> = if order_ids.is_empty() {
        HashMap::new()
    } else {
        orders::Entity::find()
            .filter(orders::Column::Id.is_in(order_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|d| {
            let order = order_rows.get(&d.order_id);
            let device_name = device_names.get(&d.device_id).cloned();
            dto(d, device_name, order)
        })
        .collect())
}

fn dto(
    d: deployments::Model,
    device_name: Option<String>,
    order: Option<&orders::Model>,
) -> DeploymentDto {
    let end = d.actual_end_date.or(d.planned_end_date);
    DeploymentDto {
        id: d.id.to_string(),
        device_id: d.device_id.to_string(),
        device_name,
        order_id: d.order_id.to_string(),
        order_number: order.map(|o| o.order_number.clone()),
        site: order.and_then(|o| o.site.clone()),
        start_date: iso_date(d.start_date),
        planned_end_date: d.planned_end_date.map(iso_date),
        actual_end_date: d.actual_end_date.map(iso_date),
        period: format::date_range(Some(d.start_date), end),
        active: d.is_active(),
        street: d.street,
        postal_code: d.postal_code,
        city: d.city,
        lat: d.lat,
        lng: d.lng,
        notes: d.notes,
        created_at: timestamp(d.created_at),
        updated_at: timestamp(d.updated_at),
    }
}

async fn list(
    ctx: &Ctx,
    query: Select<deployments::Entity>,
    message: &str,
) -> Result<Vec<DeploymentDto>, ApiError> {
    let rows = query
        .order_by_desc(deployments::Column::StartDate)
        .all(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, message))?;
    to_dtos(&*ctx.db, rows)
        .await
        .map_err(|e| store_error(ctx, e, message))
}

async fn single(ctx: &Ctx, model: deployments::Model, message: &str) -> Result<DeploymentDto, ApiError> {
    to_dtos(&*ctx.db, vec![model])
        .await
        .map_err(|e| store_error(ctx, e, message))?
        .pop()
        .ok_or_else(|| not_found(ctx, "Einsatz nicht gefunden"))
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                list(&ctx, deployments::Entity::find(), LOAD_MSG).await
            }),
        )
        .procedure(
            "listActive",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                let q = deployments::Entity::find()
                    .filter(deployments::Column::ActualEndDate.is_null());
                list(&ctx, q, "Fehler beim Laden der aktiven Einsätze").await
            }),
        )
        .procedure(
            "listByDevice",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: DeviceIdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.device_id, "device_id")?;
                let rows = deployments::Entity::find()
                    .filter(deployments::Column::DeviceId.eq(id))
                    .order_by_desc(deployments::Column::StartDate)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, LOAD_MSG))?;
                // Current deployment first, then the history.
                let (active, ended) = partition_active(rows);
                to_dtos(&*ctx.db, active.into_iter().chain(ended).collect())
                    .await
                    .map_err(|e| store_error(&ctx, e, LOAD_MSG))
            }),
        )
        .procedure(
            "listByOrder",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: OrderIdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.order_id, "order_id")?;
                let q = deployments::Entity::find().filter(deployments::Column::OrderId.eq(id));
                list(&ctx, q, LOAD_MSG).await
            }),
        )
        .procedure(
            "get",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;
                let model = deployments::Entity::find_by_id(id)
                    .one(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, LOAD_MSG))?
                    .ok_or_else(|| not_found(&ctx, "Einsatz nicht gefunden"))?;
                single(&ctx, model, LOAD_MSG).await
            }),
        )
        .procedure(
            "assign",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: DeploymentForm| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Erstellen des Einsatzes";
                let values = input.validate().map_err(|e| invalid(&ctx, e))?;

                let created = workflow::assign(&ctx.db, values)
                    .await
                    .map_err(|e| workflow_error(&ctx, e, MSG))?;

                audit::record(
                    &ctx,
                    "deployment.assign",
                    created.id,
                    Some(serde_json::json!({
                        "device_id": created.device_id.to_string(),
                        "order_id": created.order_id.to_string(),
                    })),
                )
                .await;
                single(&ctx, created, MSG).await
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateDeploymentInput| async move {
                    require_user(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren des Einsatzes";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let v = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let model = deployments::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, "Einsatz nicht gefunden"))?;
                    // Device status is only maintained by assign/end.
                    if model.device_id != v.device_id {
                        return Err(api_error(
                            &ctx,
                            "failed_precondition",
                            "Das Gerät eines Einsatzes kann nicht geändert werden",
                        ));
                    }
                    // An active deployment has to stay on a board lane.
                    if model.is_active() && model.order_id != v.order_id {
                        workflow::active_order(&*ctx.db, v.order_id)
                            .await
                            .map_err(|e| workflow_error(&ctx, e, MSG))?;
                    }
                    if model.actual_end_date.is_some_and(|end| end < v.start_date) {
                        return Err(api_error(
                            &ctx,
                            "failed_precondition",
                            "Enddatum liegt vor dem Startdatum",
                        ));
                    }

                    let mut active: deployments::ActiveModel = model.into();
                    active.order_id = Set(v.order_id);
                    active.start_date = Set(v.start_date);
                    active.planned_end_date = Set(v.planned_end_date);
                    active.street = Set(v.street);
                    active.postal_code = Set(v.postal_code);
                    active.city = Set(v.city);
                    active.lat = Set(v.lat);
                    active.lng = Set(v.lng);
                    active.notes = Set(v.notes);
                    active.updated_at = Set(chrono::Utc::now().fixed_offset());
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?;

                    audit::record(&ctx, "deployment.update", updated.id, None).await;
                    single(&ctx, updated, MSG).await
                },
            ),
        )
        .procedure(
            "end",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: EndDeploymentInput| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Aktualisieren des Einsatzes";
                let id = parse_id(&ctx, &input.id, "id")?;
                let values = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                let ended = workflow::end(&ctx.db, id, values, today())
                    .await
                    .map_err(|e| workflow_error(&ctx, e, MSG))?;

                audit::record(
                    &ctx,
                    "deployment.end",
                    ended.id,
                    Some(serde_json::json!({
                        "actual_end_date": ended.actual_end_date.map(iso_date),
                    })),
                )
                .await;
                single(&ctx, ended, MSG).await
            }),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Löschen des Einsatzes";
                let id = parse_id(&ctx, &input.id, "id")?;

                let model = deployments::Entity::find_by_id(id)
                    .one(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?
                    .ok_or_else(|| not_found(&ctx, "Einsatz nicht gefunden"))?;
                if model.is_active() {
                    return Err(api_error(
                        &ctx,
                        "failed_precondition",
                        "Aktive Einsätze müssen zuerst beendet werden",
                    ));
                }

                deployments::Entity::delete_by_id(id)
                    .exec(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;

                audit::record(&ctx, "deployment.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(end: Option<NaiveDate>) -> deployments::Model {
        deployments::Model {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            planned_end_date: NaiveDate::from_ymd_opt(2024, 3, 31),
            actual_end_date: end,
            street: None,
            postal_code: None,
            city: None,
            lat: Some(46.9),
            lng: Some(7.4),
            notes: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn period_prefers_actual_end() {
        let active = dto(row(None), None, None);
        assert!(active.active);
        assert_eq!(active.period, "01.03.2024 - 31.03.2024");

        let ended = dto(row(NaiveDate::from_ymd_opt(2024, 3, 10)), None, None);
        assert!(!ended.active);
        assert_eq!(ended.period, "01.03.2024 - 10.03.2024");
        assert_eq!(ended.actual_end_date.as_deref(), Some("2024-03-10"));
    }

    #[tokio::test]
    async fn empty_list_skips_lookups() {
        let db = sea_orm::MockDatabase::new(sea_orm::DatabaseBackend::Postgres).into_connection();
        assert!(to_dtos(&db, Vec::new()).await.unwrap().is_empty());
        assert!(db.into_transaction_log().is_empty());
    }
}
