use std::collections::HashMap;

use emg_db::entities::{deployments, orders};
use emg_domain::OrderStatus;
use emg_domain::validation::{OrderForm, OrderValues};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use specta::Type;

use super::{
    ApiError, Ctx, DeleteOutput, api_error, IdInput, clamp_u64_to_u32, guard_error, invalid, not_found,
    parse_id, require_user, store_error, store_error_unique, timestamp, workflow_error,
};
use crate::audit;
use crate::reference_guard::{self, Guarded};
use crate::sequencing;
use crate::workflow;

const DUPLICATE_NUMBER: &str = "Diese Auftragsnummer existiert bereits";

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct OrderDto {
    pub id: String,
    pub order_number: String,
    pub site: Option<String>,
    pub description: Option<String>,
    pub status: OrderStatus,
    pub active_deployments: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct NextNumberOutput {
    pub order_number: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateOrderInput {
    pub id: String,
    pub values: OrderForm,
}

pub(super) fn dto(o: orders::Model, active_deployments: u32) -> OrderDto {
    OrderDto {
        id: o.id.to_string(),
        order_number: o.order_number,
        site: o.site,
        description: o.description,
        status: OrderStatus::parse(&o.status).unwrap_or_default(),
        active_deployments,
        created_at: timestamp(o.created_at),
        updated_at: timestamp(o.updated_at),
    }
}

async fn active_counts<C: ConnectionTrait>(db: &C) -> Result<HashMap<Uuid, u64>, DbErr> {
    let active = deployments::Entity::find()
        .filter(deployments::Column::ActualEndDate.is_null())
        .all(db)
        .await?;
    let mut counts = HashMap::new();
    for d in active {
        *counts.entry(d.order_id).or_insert(0u64) += 1;
    }
    Ok(counts)
}

async fn list(ctx: &Ctx, only_active: bool) -> Result<Vec<OrderDto>, ApiError> {
    const MSG: &str = "Fehler beim Laden der Aufträge";
    let mut query = orders::Entity::find();
    if only_active {
        query = query.filter(orders::Column::Status.eq(OrderStatus::Aktiv.as_str()));
    }
    let rows = query
        .order_by_desc(orders::Column::OrderNumber)
        .all(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, MSG))?;
    let counts = active_counts(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, MSG))?;

    Ok(rows
        .into_iter()
        .map(|o| {
            let n = counts.get(&o.id).copied().unwrap_or(0);
            dto(o, clamp_u64_to_u32(n))
        })
        .collect())
}

fn apply(active: &mut orders::ActiveModel, v: OrderValues) {
    active.order_number = Set(v.order_number);
    active.site = Set(v.site);
    active.description = Set(v.description);
    active.status = Set(v.status.as_str().to_string());
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                list(&ctx, false).await
            }),
        )
        .procedure(
            "listActive",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                list(&ctx, true).await
            }),
        )
        .procedure(
            "get",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                const MSG: &str = "Fehler beim Laden der Aufträge";
                let id = parse_id(&ctx, &input.id, "id")?;

                let order = orders::Entity::find_by_id(id)
                    .one(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?
                    .ok_or_else(|| not_found(&ctx, "Auftrag nicht gefunden"))?;
                let counts = active_counts(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;
                let n = counts.get(&order.id).copied().unwrap_or(0);
                Ok(dto(order, clamp_u64_to_u32(n)))
            }),
        )
        .procedure(
            "nextNumber",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_user(&ctx)?;
                let order_number = sequencing::next_order_number(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Aufträge"))?
                    .ok_or_else(|| {
                        api_error(&ctx, "failed_precondition", "Keine freie Auftragsnummer mehr verfügbar")
                    })?;
                Ok(NextNumberOutput { order_number })
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: OrderForm| async move {
                require_user(&ctx)?;
                let values = input.validate().map_err(|e| invalid(&ctx, e))?;

                let now = chrono::Utc::now().fixed_offset();
                let mut active = orders::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    created_at: Set(now),
                    ..Default::default()
                };
                apply(&mut active, values);
                let created = active.insert(&*ctx.db).await.map_err(|e| {
                    store_error_unique(&ctx, e, "Fehler beim Erstellen des Auftrags", DUPLICATE_NUMBER)
                })?;

                audit::record(
                    &ctx,
                    "order.create",
                    created.id,
                    Some(serde_json::json!({ "order_number": created.order_number })),
                )
                .await;
                Ok(dto(created, 0))
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateOrderInput| async move {
                    require_user(&ctx)?;
                    const MSG: &str = "Fehler beim Aktualisieren des Auftrags";
                    let id = parse_id(&ctx, &input.id, "id")?;
                    let values = input.values.validate().map_err(|e| invalid(&ctx, e))?;

                    let order = orders::Entity::find_by_id(id)
                        .one(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?
                        .ok_or_else(|| not_found(&ctx, "Auftrag nicht gefunden"))?;
                    workflow::ensure_status_change(&*ctx.db, &order, values.status)
                        .await
                        .map_err(|e| workflow_error(&ctx, e, MSG))?;

                    let mut active: orders::ActiveModel = order.into();
                    apply(&mut active, values);
                    let updated = active
                        .update(&*ctx.db)
                        .await
                        .map_err(|e| store_error_unique(&ctx, e, MSG, DUPLICATE_NUMBER))?;

                    audit::record(
                        &ctx,
                        "order.update",
                        updated.id,
                        Some(serde_json::json!({ "status": updated.status })),
                    )
                    .await;
                    let counts = active_counts(&*ctx.db)
                        .await
                        .map_err(|e| store_error(&ctx, e, MSG))?;
                    let n = counts.get(&updated.id).copied().unwrap_or(0);
                    Ok(dto(updated, clamp_u64_to_u32(n)))
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                require_user(&ctx)?;
                let id = parse_id(&ctx, &input.id, "id")?;

                reference_guard::delete_unreferenced(&*ctx.db, Guarded::Order, id)
                    .await
                    .map_err(|e| {
                        guard_error(&ctx, e, "Fehler beim Löschen des Auftrags", "Auftrag nicht gefunden")
                    })?;

                audit::record(&ctx, "order.delete", id, None).await;
                Ok(DeleteOutput { ok: true })
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_support::ctx_with;
    use emg_domain::Role;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn order(number: &str, status: &str) -> orders::Model {
        orders::Model {
            id: Uuid::new_v4(),
            order_number: number.to_string(),
            site: None,
            description: None,
            status: status.to_string(),
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn list_counts_active_deployments_per_order() {
        let a = order("510001.0002", "aktiv");
        let b = order("510001.0001", "inaktiv");
        let dep = deployments::Model {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            order_id: a.id,
            start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            planned_end_date: None,
            actual_end_date: None,
            street: None,
            postal_code: None,
            city: None,
            lat: None,
            lng: None,
            notes: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![a.clone(), b.clone()]])
            .append_query_results([vec![dep]])
            .into_connection();
        let ctx = ctx_with(db, Some(Role::User));

        let got = list(&ctx, false).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].active_deployments, 1);
        assert_eq!(got[1].active_deployments, 0);
        assert_eq!(got[1].status, OrderStatus::Inaktiv);
    }
}
