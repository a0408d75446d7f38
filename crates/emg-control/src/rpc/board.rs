use std::collections::HashMap;

use emg_domain::{format, status};
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use specta::Type;

use super::devices::{DeviceDto, DeviceLookups};
use super::orders::{self, OrderDto};
use super::{ApiError, Ctx, clamp_u64_to_u32, iso_date, require_user, store_error};
use crate::workflow::{self, Board, DRAG_ACTIVATION_DISTANCE_PX};

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DeploymentCardDto {
    pub deployment_id: String,
    pub device_id: String,
    pub device_name: String,
    pub start_date: String,
    pub period: String,
    pub city: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct OrderLaneDto {
    pub order: OrderDto,
    pub deployments: Vec<DeploymentCardDto>,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct StatusOptionDto {
    pub id: String,
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct BoardDto {
    /// Devices that can be dragged onto an order.
    pub pool: Vec<DeviceDto>,
    pub lanes: Vec<OrderLaneDto>,
    /// Offered when ending a deployment.
    pub statuses: Vec<StatusOptionDto>,
    pub in_use_status_id: Option<String>,
    pub drag_activation_distance_px: u32,
}

fn to_dto(board: Board, lookups: &DeviceLookups) -> BoardDto {
    let names: HashMap<Uuid, String> = board
        .devices
        .iter()
        .map(|d| (d.id, d.name.clone()))
        .collect();

    let lanes = board
        .lanes
        .into_iter()
        .map(|lane| {
            let deployments: Vec<DeploymentCardDto> = lane
                .deployments
                .into_iter()
                .map(|d| DeploymentCardDto {
                    deployment_id: d.id.to_string(),
                    device_id: d.device_id.to_string(),
                    device_name: names.get(&d.device_id).cloned().unwrap_or_default(),
                    start_date: iso_date(d.start_date),
                    period: format::date_range(Some(d.start_date), d.planned_end_date),
                    city: d.city,
                })
                .collect();
            let count = clamp_u64_to_u32(deployments.len() as u64);
            OrderLaneDto {
                order: orders::dto(lane.order, count),
                deployments,
            }
        })
        .collect();

    let mut devices: HashMap<Uuid, _> = board.devices.into_iter().map(|d| (d.id, d)).collect();
    let pool = board
        .pool
        .iter()
        .filter_map(|id| devices.remove(id))
        .map(|d| lookups.dto(d))
        .collect();

    BoardDto {
        pool,
        lanes,
        statuses: board
            .statuses
            .into_iter()
            .filter(|s| !status::label_matches(&s.label, status::IN_USE))
            .map(|s| StatusOptionDto {
                id: s.id.to_string(),
                label: s.label,
                color: s.color,
            })
            .collect(),
        in_use_status_id: board.in_use_status_id.map(|id| id.to_string()),
        drag_activation_distance_px: DRAG_ACTIVATION_DISTANCE_PX,
    }
}

pub(super) fn router() -> Router<Ctx> {
    Router::new().procedure(
        "get",
        Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
            require_user(&ctx)?;
            const MSG: &str = "Fehler beim Laden der Einsätze";

            let board = workflow::load_board(&ctx.db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?;
            let lookups = DeviceLookups::load(&*ctx.db)
                .await
                .map_err(|e| store_error(&ctx, e, MSG))?;
            Ok(to_dto(board, &lookups))
        }),
    )
}
