//! Admin-managed reference data: device kinds, device statuses and
//! maintenance kinds. Anyone signed in may read; only admins write.

use emg_db::entities::{device_kinds, device_statuses, maintenance_kinds};
use emg_domain::format;
use emg_domain::validation::ReferenceForm;
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use specta::Type;

use super::{
    ApiError, Ctx, DeleteOutput, IdInput, guard_error, invalid, not_found, parse_id,
    require_admin, require_user, store_error, store_error_unique, timestamp,
};
use crate::audit;
use crate::reference_guard::{self, Guarded};

const DEFAULT_STATUS_COLOR: &str = "#6b7280";

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct ReferenceDto {
    pub id: String,
    pub label: String,
    /// Device and maintenance kinds only.
    pub description: Option<String>,
    pub sort_order: i32,
    /// Statuses only.
    pub color: Option<String>,
    /// Maintenance kinds only.
    pub interval_months: Option<i32>,
    pub interval_label: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateReferenceInput {
    pub id: String,
    pub values: ReferenceForm,
}

fn kind_dto(m: device_kinds::Model) -> ReferenceDto {
    ReferenceDto {
        id: m.id.to_string(),
        label: m.label,
        description: m.description,
        sort_order: m.sort_order,
        color: None,
        interval_months: None,
        interval_label: None,
        created_at: timestamp(m.created_at),
    }
}

fn status_dto(m: device_statuses::Model) -> ReferenceDto {
    ReferenceDto {
        id: m.id.to_string(),
        label: m.label,
        description: None,
        sort_order: m.sort_order,
        color: Some(m.color),
        interval_months: None,
        interval_label: None,
        created_at: timestamp(m.created_at),
    }
}

fn maintenance_kind_dto(m: maintenance_kinds::Model) -> ReferenceDto {
    ReferenceDto {
        id: m.id.to_string(),
        label: m.label,
        description: m.description,
        sort_order: m.sort_order,
        color: None,
        interval_months: m.interval_months,
        interval_label: Some(format::interval(m.interval_months)),
        created_at: timestamp(m.created_at),
    }
}

pub(super) fn device_kinds() -> Router<Ctx> {
    const DUPLICATE: &str = "Eine Geräteart mit dieser Bezeichnung existiert bereits";
    const MISSING: &str = "Geräteart nicht gefunden";

    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                let rows = device_kinds::Entity::find()
                    .order_by_asc(device_kinds::Column::SortOrder)
                    .order_by_asc(device_kinds::Column::Label)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Gerätearten"))?;
                Ok(rows.into_iter().map(kind_dto).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: ReferenceForm| async move {
                require_admin(&ctx)?;
                let v = input.validate().map_err(|e| invalid(&ctx, e))?;

                let created = device_kinds::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    label: Set(v.label),
                    description: Set(v.description),
                    sort_order: Set(v.sort_order),
                    created_at: Set(chrono::Utc::now().fixed_offset()),
                }
                .insert(&*ctx.db)
                .await
                .map_err(|e| {
                    store_error_unique(&ctx, e, "Fehler beim Erstellen der Geräteart", DUPLICATE)
                })?;

                audit::record(
                    &ctx,
                    "deviceKind.create",
                    created.id,
                    Some(serde_json::json!({ "label": created.label })),
                )
                .await;
                Ok(kind_dto(created))
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateReferenceInput| async move {
                    require_admin(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren der Geräteart";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let v = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let model = device_kinds::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, MISSING))?;
                    let mut active: device_kinds::ActiveModel = model.into();
                    active.label = Set(v.label);
                    active.description = Set(v.description);
                    active.sort_order = Set(v.sort_order);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE))?;

                    audit::record(&ctx, "deviceKind.update", updated.id, None).await;
                    Ok(kind_dto(updated))
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_admin(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;
                reference_guard::delete_unreferenced(&*ctx.db, Guarded::DeviceKind, id)
                    .await
                    .map_err(|e| guard_error(&ctx, e, "Fehler beim Löschen der Geräteart", MISSING))?;

                audit::record(&ctx, "deviceKind.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

pub(super) fn device_statuses() -> Router<Ctx> {
    const DUPLICATE: &str = "Ein Status mit dieser Bezeichnung existiert bereits";
    const MISSING: &str = "Status nicht gefunden";

    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                let rows = device_statuses::Entity::find()
                    .order_by_asc(device_statuses::Column::SortOrder)
                    .order_by_asc(device_statuses::Column::Label)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Status"))?;
                Ok(rows.into_iter().map(status_dto).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: ReferenceForm| async move {
                require_admin(&ctx)?;
                let v = input.validate().map_err(|e| invalid(&ctx, e))?;

                let created = device_statuses::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    label: Set(v.label),
                    color: Set(v.color.unwrap_or_else(|| DEFAULT_STATUS_COLOR.to_string())),
                    sort_order: Set(v.sort_order),
                    created_at: Set(chrono::Utc::now().fixed_offset()),
                }
                .insert(&*ctx.db)
                .await
                .map_err(|e| store_error_unique(&ctx, e, "Fehler beim Erstellen des Status", DUPLICATE))?;

                audit::record(
                    &ctx,
                    "deviceStatus.create",
                    created.id,
                    Some(serde_json::json!({ "label": created.label })),
                )
                .await;
                Ok(status_dto(created))
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateReferenceInput| async move {
                    require_admin(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren des Status";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let v = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let model = device_statuses::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, MISSING))?;
                    let previous = model.label.clone();
                    let mut active: device_statuses::ActiveModel = model.into();
                    active.label = Set(v.label);
                    if let Some(color) = v.color {
                        active.color = Set(color);
                    }
                    active.sort_order = Set(v.sort_order);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE))?;

                    if previous != updated.label {
                        // The board finds "Im Büro" / "Im Einsatz" by label.
                        tracing::warn!(from = %previous, to = %updated.label, "device status renamed");
                    }
                    audit::record(
                        &ctx,
                        "deviceStatus.update",
                        updated.id,
                        Some(serde_json::json!({ "label": updated.label })),
                    )
                    .await;
                    Ok(status_dto(updated))
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_admin(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;
                reference_guard::delete_unreferenced(&*ctx.db, Guarded::DeviceStatus, id)
                    .await
                    .map_err(|e| guard_error(&ctx, e, "Fehler beim Löschen des Status", MISSING))?;

                audit::record(&ctx, "deviceStatus.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

pub(super) fn maintenance_kinds() -> Router<Ctx> {
    const DUPLICATE: &str = "Eine Wartungsart mit dieser Bezeichnung existiert bereits";
    const MISSING: &str = "Wartungsart nicht gefunden";

    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                let rows = maintenance_kinds::Entity::find()
                    .order_by_asc(maintenance_kinds::Column::SortOrder)
                    .order_by_asc(maintenance_kinds::Column::Label)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Wartungsarten"))?;
                Ok(rows.into_iter().map(maintenance_kind_dto).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: ReferenceForm| async move {
                require_admin(&ctx)?;
                let v = input.validate().map_err(|e| invalid(&ctx, e))?;

                let created = maintenance_kinds::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    label: Set(v.label),
                    description: Set(v.description),
                    interval_months: Set(v.interval_months),
                    sort_order: Set(v.sort_order),
                    created_at: Set(chrono::Utc::now().fixed_offset()),
                }
                .insert(&*ctx.db)
                .await
                .map_err(|e| {
                    store_error_unique(&ctx, e, "Fehler beim Erstellen der Wartungsart", DUPLICATE)
                })?;

                audit::record(
                    &ctx,
                    "maintenanceKind.create",
                    created.id,
                    Some(serde_json::json!({ "label": created.label })),
                )
                .await;
                Ok(maintenance_kind_dto(created))
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateReferenceInput| async move {
                    require_admin(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren der Wartungsart";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let v = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let model = maintenance_kinds::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, MISSING))?;
                    let mut active: maintenance_kinds::ActiveModel = model.into();
                    active.label = Set(v.label);
                    active.description = Set(v.description);
                    active.interval_months = Set(v.interval_months);
                    active.sort_order = Set(v.sort_order);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE))?;

                    audit::record(&ctx, "maintenanceKind.update", updated.id, None).await;
                    Ok(maintenance_kind_dto(updated))
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_admin(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;
                reference_guard::delete_unreferenced(&*ctx.db, Guarded::MaintenanceKind, id)
                    .await
                    .map_err(|e| {
                        guard_error(&ctx, e, "Fehler beim Löschen der Wartungsart", MISSING)
                    })?;

                audit::record(&ctx, "maintenanceKind.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_kind_carries_interval_label() {
        let dto = maintenance_kind_dto(maintenance_kinds::Model {
            id: Uuid::new_v4(),
            label: "Kalibrierung".to_string(),
            description: Some("Jährliche Prüfung beim Hersteller".to_string()),
            interval_months: Some(24),
            sort_order: 1,
            created_at: chrono::Utc::now().fixed_offset(),
        });
        assert_eq!(dto.interval_label.as_deref(), Some("2 Jahre"));
        assert_eq!(dto.color, None);
        assert_eq!(dto.description.as_deref(), Some("Jährliche Prüfung beim Hersteller"));
    }
}
