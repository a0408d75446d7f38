use emg_db::entities::audit_events;
use sea_orm::prelude::Uuid;
use sea_orm::{ActiveModelTrait, Set};

use crate::rpc::Ctx;

/// Records a successful mutation. Audit failures never fail the request.
pub async fn record(ctx: &Ctx, action: &str, target: impl ToString, meta: Option<serde_json::Value>) {
    let target = target.to_string();
    let user_id = ctx
        .user
        .as_ref()
        .and_then(|u| Uuid::parse_str(&u.user_id).ok());

    let model = audit_events::ActiveModel {
        id: Set(Uuid::new_v4()),
        request_id: Set(ctx.request_id.clone()),
        user_id: Set(user_id),
        action: Set(action.to_string()),
        target: Set(target.clone()),
        meta: Set(meta),
        created_at: Set(chrono::Utc::now().fixed_offset()),
    };

    if let Err(err) = model.insert(&*ctx.db).await {
        tracing::warn!(%err, action, %target, "failed to write audit event");
    }
}
