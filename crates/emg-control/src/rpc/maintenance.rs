use std::collections::HashMap;

use emg_db::entities::{devices, maintenance_kinds, maintenance_records};
use emg_domain::validation::{MaintenanceForm, MaintenanceValues};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Select, Set,
};
use specta::Type;

use super::deployments::DeviceIdInput;
use super::{
    ApiError, Ctx, DeleteOutput, IdInput, invalid, iso_date, not_found, parse_id, require_user,
    store_error, timestamp,
};
use crate::audit;

const LOAD_MSG: &str = "Fehler beim Laden der Wartungen";

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct MaintenanceDto {
    pub id: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub kind_id: Option<String>,
    pub kind_label: Option<String>,
    pub date: String,
    pub performed_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateMaintenanceInput {
    pub id: String,
    pub values: MaintenanceForm,
}

async fn to_dtos<C: ConnectionTrait>(
    db: &C,
    rows: Vec<maintenance_records::Model>,
) -> Result<Vec<MaintenanceDto>, DbErr> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let device_names: HashMap<Uuid, String> = devices::Entity::find()
        .filter(devices::Column::Id.is_in(rows.iter().map(|r| r.device_id)))
        .all(db)
        .await?
        .into_iter()
        .map(|d| (d.id, d.name))
        .collect();
    let kind_labels: HashMap<Uuid, String> = maintenance_kinds::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|k| (k.id, k.label))
        .collect();

    Ok(rows
        .into_iter()
        .map(|r| MaintenanceDto {
            id: r.id.to_string(),
            device_id: r.device_id.to_string(),
            device_name: device_names.get(&r.device_id).cloned(),
            kind_id: r.kind_id.map(|id| id.to_string()),
            kind_label: r.kind_id.and_then(|id| kind_labels.get(&id).cloned()),
            date: iso_date(r.date),
            performed_by: r.performed_by,
            notes: r.notes,
            created_at: timestamp(r.created_at),
        })
        .collect())
}

async fn list(
    ctx: &Ctx,
    query: Select<maintenance_records::Entity>,
) -> Result<Vec<MaintenanceDto>, ApiError> {
    let rows = query
        .order_by_desc(maintenance_records::Column::Date)
        .all(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, LOAD_MSG))?;
    to_dtos(&*ctx.db, rows)
        .await
        .map_err(|e| store_error(ctx, e, LOAD_MSG))
}

async fn single(
    ctx: &Ctx,
    model: maintenance_records::Model,
    message: &str,
) -> Result<MaintenanceDto, ApiError> {
    to_dtos(&*ctx.db, vec![model])
        .await
        .map_err(|e| store_error(ctx, e, message))?
        .pop()
        .ok_or_else(|| not_found(ctx, "Wartung nicht gefunden"))
}

fn apply(active: &mut maintenance_records::ActiveModel, v: MaintenanceValues) {
    active.device_id = Set(v.device_id);
    active.kind_id = Set(v.kind_id);
    active.date = Set(v.date);
    active.performed_by = Set(v.performed_by);
    active.notes = Set(v.notes);
}

async fn find(ctx: &Ctx, id: Uuid, message: &str) -> Result<maintenance_records::Model, ApiError> {
    maintenance_records::Entity::find_by_id(id)
        .one(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, message))?
        .ok_or_else(|| not_found(ctx, "Wartung nicht gefunden"))
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                list(&ctx, maintenance_records::Entity::find()).await
            }),
        )
        .procedure(
            "listByDevice",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: DeviceIdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.device_id, "device_id")?;
                let q = maintenance_records::Entity::find()
                    .filter(maintenance_records::Column::DeviceId.eq(id));
                list(&ctx, q).await
            }),
        )
        .procedure(
            "get",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;
                let model = find(&ctx, id, LOAD_MSG).await?;
                single(&ctx, model, LOAD_MSG).await
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: MaintenanceForm| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Erstellen der Wartung";
                let values = input.validate().map_err(|e| invalid(&ctx, e))?;

                let mut active = maintenance_records::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    created_at: Set(chrono::Utc::now().fixed_offset()),
                    ..Default::default()
                };
                apply(&mut active, values);
                let created = active
                    .insert(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;

                audit::record(
                    &ctx,
                    "maintenance.create",
                    created.id,
                    Some(serde_json::json!({ "device_id": created.device_id.to_string() })),
                )
                .await;
                single(&ctx, created, MSG).await
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateMaintenanceInput| async move {
                    require_user(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren der Wartung";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let values = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let mut active: maintenance_records::ActiveModel =
                        find(&ctx, id, MSG).await?.into();
                    apply(&mut active, values);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?;

                    audit::record(&ctx, "maintenance.update", updated.id, None).await;
                    single(&ctx, updated, MSG).await
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Löschen der Wartung";
                let id = parse_id(&ctx, &input.id, "id")?;

                let res = maintenance_records::Entity::delete_by_id(id)
                    .exec(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;
                if res.rows_affected == 0 {
                    return Err(not_found(&ctx, "Wartung nicht gefunden"));
                }

                audit::record(&ctx, "maintenance.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}
