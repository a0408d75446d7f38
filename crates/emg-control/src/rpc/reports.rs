//! Read-only views: dashboard figures, map pins and formatting helpers.

use std::collections::HashMap;

use emg_db::entities::{deployments, device_statuses, devices, orders};
use emg_domain::{OrderStatus, format};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use specta::Type;

use super::{ApiError, Ctx, clamp_u64_to_u32, iso_date, require_user, store_error, today};
use crate::dashboard;

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DueServiceDto {
    pub device_id: String,
    pub device_name: String,
    pub next_service_date: String,
    pub overdue: bool,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct ActiveOrderDto {
    pub order_id: String,
    pub order_number: String,
    pub site: Option<String>,
    pub device_names: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DashboardStatsDto {
    pub total_devices: u32,
    pub in_office: u32,
    pub in_use: u32,
    pub in_maintenance: u32,
    pub defective: u32,
    pub active_deployments: u32,
    pub due_services: Vec<DueServiceDto>,
    pub active_orders: Vec<ActiveOrderDto>,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct MapPinDto {
    pub deployment_id: String,
    pub device_name: String,
    pub order_number: String,
    pub site: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub start_date: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct IntervalInput {
    pub months: Option<i32>,
}

pub(super) fn dashboard_router() -> Router<Ctx> {
    Router::new().procedure(
        "stats",
        Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
            require_user(&ctx)?;
            const MSG: &str = "Fehler beim Laden der Geräte";
            let db = &*ctx.db;

            let all = devices::Entity::find()
                .order_by_asc(devices::Column::Name)
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?;
            let statuses = device_statuses::Entity::find()
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?;
            let active = deployments::Entity::find()
                .filter(deployments::Column::ActualEndDate.is_null())
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der aktiven Einsätze"))?;
            let active_orders = orders::Entity::find()
                .filter(orders::Column::Status.eq(OrderStatus::Aktiv.as_str()))
                .order_by_asc(orders::Column::OrderNumber)
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Aufträge"))?;

            let counts = dashboard::count_by_status(&all, &statuses);
            let today = today();
            let due_services = dashboard::due_for_service(&all, today)
                .into_iter()
                .filter_map(|d| {
                    let next = d.next_service_date?;
                    Some(DueServiceDto {
                        device_id: d.id.to_string(),
                        device_name: d.name.clone(),
                        next_service_date: iso_date(next),
                        overdue: next < today,
                    })
                })
                .collect();

            let names: HashMap<Uuid, &str> = all.iter().map(|d| (d.id, d.name.as_str())).collect();
            let active_orders = active_orders
                .into_iter()
                .map(|o| ActiveOrderDto {
                    device_names: active
                        .iter()
                        .filter(|d| d.order_id == o.id)
                        .filter_map(|d| names.get(&d.device_id).map(|n| n.to_string()))
                        .collect(),
                    order_id: o.id.to_string(),
                    order_number: o.order_number,
                    site: o.site,
                })
                .collect();

            Ok(DashboardStatsDto {
                total_devices: counts.total,
                in_office: counts.in_office,
                in_use: counts.in_use,
                in_maintenance: counts.in_maintenance,
                defective: counts.defective,
                active_deployments: clamp_u64_to_u32(active.len() as u64),
                due_services,
                active_orders,
            })
        }),
    )
}

pub(super) fn map_router() -> Router<Ctx> {
    Router::new().procedure(
        "deployments",
        Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
            require_user(&ctx)?;
            const MSG: &str = "Fehler beim Laden der aktiven Einsätze";
            let db = &*ctx.db;

            let rows = deployments::Entity::find()
                .filter(deployments::Column::ActualEndDate.is_null())
                .filter(deployments::Column::Lat.is_not_null())
                .filter(deployments::Column::Lng.is_not_null())
                .order_by_desc(deployments::Column::StartDate)
                .find_also_related(devices::Entity)
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?;
            let order_rows: HashMap<Uuid, orders::Model> = orders::Entity::find()
                .all(db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?
                .into_iter()
                .map(|o| (o.id, o))
                .collect();

            Ok(rows
                .into_iter()
                .filter_map(|(d, device)| {
                    let (lat, lng) = (d.lat?, d.lng?);
                    let order = order_rows.get(&d.order_id);
                    Some(MapPinDto {
                        deployment_id: d.id.to_string(),
                        device_name: device.map(|x| x.name).unwrap_or_default(),
                        order_number: order.map(|o| o.order_number.clone()).unwrap_or_default(),
                        site: order.and_then(|o| o.site.clone()),
                        street: d.street,
                        postal_code: d.postal_code,
                        city: d.city,
                        lat,
                        lng,
                        start_date: iso_date(d.start_date),
                    })
                })
                .collect::<Vec<_>>())
        }),
    )
}

pub(super) fn format_router() -> Router<Ctx> {
    Router::new().procedure(
        "interval",
        Procedure::builder::<ApiError>()
            .query(|_, input: IntervalInput| async move { Ok(format::interval(input.months)) }),
    )
}
