use std::collections::HashMap;

use emg_db::entities::{device_kinds, device_statuses, devices};
use emg_domain::Ownership;
use emg_domain::validation::{DeviceForm, DeviceValues};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, QueryOrder, Set};
use specta::Type;

use super::{
    ApiError, Ctx, DeleteOutput, IdInput, guard_error, invalid, iso_date, not_found, parse_id,
    require_user, store_error, store_error_unique, timestamp,
};
use crate::audit;
use crate::reference_guard::{self, Guarded};

const DUPLICATE_NAME: &str = "Ein Gerät mit diesem Namen existiert bereits";

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub ownership: Ownership,
    pub serial_number: String,
    pub client: Option<String>,
    pub ip_address: Option<String>,
    pub pin: Option<String>,
    pub kind_id: Option<String>,
    pub kind_label: Option<String>,
    pub status_id: Option<String>,
    pub status_label: Option<String>,
    pub status_color: Option<String>,
    pub purchase_date: Option<String>,
    pub next_service_date: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateDeviceInput {
    pub id: String,
    pub values: DeviceForm,
}

/// Kind and status rows keyed by id, for labelling device rows.
#[derive(Default)]
pub(super) struct DeviceLookups {
    kinds: HashMap<Uuid, device_kinds::Model>,
    statuses: HashMap<Uuid, device_statuses::Model>,
}

impl DeviceLookups {
    pub(super) async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, DbErr> {
        let kinds = device_kinds::Entity::find().all(db).await?;
        let statuses = device_statuses::Entity::find().all(db).await?;
        Ok(Self {
            kinds: kinds.into_iter().map(|k| (k.id, k)).collect(),
            statuses: statuses.into_iter().map(|s| (s.id, s)).collect(),
        })
    }

    pub(super) fn dto(&self, d: devices::Model) -> DeviceDto {
        let kind = d.kind_id.and_then(|id| self.kinds.get(&id));
        let status = d.status_id.and_then(|id| self.statuses.get(&id));
        DeviceDto {
            id: d.id.to_string(),
            name: d.name,
            // Rows are written through the validated form; fall back for legacy data.
            ownership: Ownership::parse(&d.ownership).unwrap_or(Ownership::Eigen),
            serial_number: d.serial_number,
            client: d.client,
            ip_address: d.ip_address,
            pin: d.pin,
            kind_id: d.kind_id.map(|id| id.to_string()),
            kind_label: kind.map(|k| k.label.clone()),
            status_id: d.status_id.map(|id| id.to_string()),
            status_label: status.map(|s| s.label.clone()),
            status_color: status.map(|s| s.color.clone()),
            purchase_date: d.purchase_date.map(iso_date),
            next_service_date: d.next_service_date.map(iso_date),
            notes: d.notes,
            created_at: timestamp(d.created_at),
            updated_at: timestamp(d.updated_at),
        }
    }
}

fn apply(active: &mut devices::ActiveModel, v: DeviceValues) {
    active.name = Set(v.name);
    active.ownership = Set(v.ownership.as_str().to_string());
    active.serial_number = Set(v.serial_number);
    active.client = Set(v.client);
    active.ip_address = Set(v.ip_address);
    active.pin = Set(v.pin);
    active.kind_id = Set(v.kind_id);
    active.status_id = Set(v.status_id);
    active.purchase_date = Set(v.purchase_date);
    active.next_service_date = Set(v.next_service_date);
    active.notes = Set(v.notes);
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
}

async fn labelled(ctx: &Ctx, model: devices::Model, message: &str) -> Result<DeviceDto, ApiError> {
    let lookups = DeviceLookups::load(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, message))?;
    Ok(lookups.dto(model))
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Laden der Geräte";

                let rows = devices::Entity::find()
                    .order_by_asc(devices::Column::Name)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;
                let lookups = DeviceLookups::load(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;

                Ok(rows.into_iter().map(|d| lookups.dto(d)).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "get",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Laden der Geräte";
                let id = parse_id(&ctx, &input.id, "id")?;

                let model = devices::Entity::find_by_id(id)
                    .one(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?
                    .ok_or_else(|| not_found(&ctx, "Gerät nicht gefunden"))?;
                labelled(&ctx, model, MSG).await
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: DeviceForm| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Erstellen des Geräts";
                let values = input.validate().map_err(|e| invalid(&ctx, e))?;

                let now = chrono::Utc::now().fixed_offset();
                let mut active = devices::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    created_at: Set(now),
                    ..Default::default()
                };
                apply(&mut active, values);
                let created = active
                    .insert(&*ctx.db)
                    .await
                    .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE_NAME))?;

                audit::record(
                    &ctx,
                    "device.create",
                    created.id,
                    Some(serde_json::json!({ "name": created.name })),
                )
                .await;
                labelled(&ctx, created, MSG).await
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateDeviceInput| async move {
                    require_user(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren des Geräts";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let values = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let model = devices::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, "Gerät nicht gefunden"))?;

                    let mut active: devices::ActiveModel = model.into();
                    apply(&mut active, values);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE_NAME))?;

                    audit::record(&ctx, "device.update", updated.id, None).await;
                    labelled(&ctx, updated, MSG).await
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;

                reference_guard::delete_unreferenced(&*ctx.db, Guarded::Device, id)
                    .await
                    .map_err(|e| {
                        guard_error(&ctx, e, "Fehler beim Löschen des Geräts", "Gerät nicht gefunden")
                    })?;

                audit::record(&ctx, "device.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kind_id: Option<Uuid>, status_id: Option<Uuid>) -> devices::Model {
        devices::Model {
            id: Uuid::new_v4(),
            name: "ZC-101".to_string(),
            ownership: "miete".to_string(),
            serial_number: "87654321".to_string(),
            client: Some("12-34".to_string()),
            ip_address: None,
            pin: None,
            kind_id,
            status_id,
            purchase_date: chrono::NaiveDate::from_ymd_opt(2023, 1, 15),
            next_service_date: None,
            notes: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn dto_carries_kind_and_status_labels() {
        let status = device_statuses::Model {
            id: Uuid::new_v4(),
            label: "Defekt".to_string(),
            color: "#dc2626".to_string(),
            sort_order: 4,
            created_at: chrono::Utc::now().fixed_offset(),
        };
        let mut lookups = DeviceLookups::default();
        lookups.statuses.insert(status.id, status.clone());

        let dto = lookups.dto(device(Some(Uuid::new_v4()), Some(status.id)));
        assert_eq!(dto.ownership, Ownership::Miete);
        assert_eq!(dto.status_label.as_deref(), Some("Defekt"));
        assert_eq!(dto.status_color.as_deref(), Some("#dc2626"));
        assert!(dto.kind_id.is_some());
        assert_eq!(dto.kind_label, None);
        assert_eq!(dto.purchase_date.as_deref(), Some("2023-01-15"));
    }
}
