use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use emg_domain::Role;
use emg_domain::validation::ValidationErrors;
use rspc::{Procedure, ProcedureError, ResolverError, Router};
use sea_orm::prelude::{DateTimeWithTimeZone, Uuid};
use sea_orm::{DbErr, SqlErr};
use specta::Type;

use crate::config::ControlConfig;
use crate::geocoding::{GeocodingService, NominatimTransport};
use crate::reference_guard::DeleteGuardError;
use crate::workflow::WorkflowError;

mod board;
mod deployments;
mod devices;
mod geocoding;
mod maintenance;
mod orders;
mod reference;
mod reports;
mod users;

#[derive(Clone, Debug, serde::Serialize, Type)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

// Request context for rspc procedures.
#[derive(Clone)]
pub struct Ctx {
    pub db: Arc<emg_db::sea_orm::DatabaseConnection>,
    pub config: Arc<ControlConfig>,
    pub geocoding: Arc<GeocodingService<NominatimTransport>>,
    pub user: Option<AuthUser>,
    pub request_id: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub field_errors: BTreeMap<String, String>,
    pub hint: Option<String>,
}

impl rspc::Error for ApiError {
    fn into_procedure_error(self) -> ProcedureError {
        // Keep error payload intentionally minimal/safe for frontend.
        ResolverError::new(self, Option::<std::io::Error>::None).into()
    }
}

pub(crate) fn api_error(ctx: &Ctx, code: &str, message: impl Into<String>) -> ApiError {
    ApiError {
        code: code.to_string(),
        message: message.into(),
        request_id: ctx.request_id.clone(),
        field_errors: BTreeMap::new(),
        hint: None,
    }
}

pub(crate) fn api_error_with_fields(
    ctx: &Ctx,
    code: &str,
    message: impl Into<String>,
    field_errors: BTreeMap<String, String>,
) -> ApiError {
    ApiError {
        code: code.to_string(),
        message: message.into(),
        request_id: ctx.request_id.clone(),
        field_errors,
        hint: None,
    }
}

pub(crate) fn invalid(ctx: &Ctx, errors: ValidationErrors) -> ApiError {
    api_error_with_fields(ctx, "invalid_param", "Ungültige Eingabe", errors.fields)
}

pub(crate) fn require_user(ctx: &Ctx) -> Result<&AuthUser, ApiError> {
    ctx.user
        .as_ref()
        .ok_or_else(|| api_error(ctx, "unauthorized", "Nicht angemeldet"))
}

pub(crate) fn require_admin(ctx: &Ctx) -> Result<&AuthUser, ApiError> {
    let user = require_user(ctx)?;
    if !user.is_admin() {
        return Err(api_error(ctx, "forbidden", "Nur für Administratoren"));
    }
    Ok(user)
}

pub(crate) fn parse_id(ctx: &Ctx, raw: &str, field: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        api_error_with_fields(
            ctx,
            "invalid_param",
            "Ungültige ID",
            BTreeMap::from([(field.to_string(), "Ungültige ID".to_string())]),
        )
    })
}

/// Store failure with the operation's fixed message. The cause is only logged.
pub(crate) fn store_error(ctx: &Ctx, err: DbErr, message: &str) -> ApiError {
    let code = match err.sql_err() {
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => "failed_precondition",
        _ => "db_error",
    };
    tracing::warn!(request_id = %ctx.request_id, error = %err, code, "{message}");
    api_error(ctx, code, message)
}

/// Like [`store_error`], with a dedicated message for unique-index violations.
pub(crate) fn store_error_unique(
    ctx: &Ctx,
    err: DbErr,
    message: &str,
    duplicate: &str,
) -> ApiError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        tracing::info!(request_id = %ctx.request_id, %detail, "{duplicate}");
        return api_error(ctx, "already_exists", duplicate);
    }
    store_error(ctx, err, message)
}

pub(crate) fn not_found(ctx: &Ctx, message: &str) -> ApiError {
    api_error(ctx, "not_found", message)
}

pub(crate) fn workflow_error(ctx: &Ctx, err: WorkflowError, message: &str) -> ApiError {
    match err {
        WorkflowError::Db(e) => store_error(ctx, e, message),
        e if e.is_not_found() => not_found(ctx, &e.to_string()),
        e => api_error(ctx, "failed_precondition", e.to_string()),
    }
}

pub(crate) fn guard_error(ctx: &Ctx, err: DeleteGuardError, message: &str, missing: &str) -> ApiError {
    match err {
        DeleteGuardError::InUse { .. } => api_error(ctx, "in_use", err.to_string()),
        DeleteGuardError::NotFound => not_found(ctx, missing),
        DeleteGuardError::Db(e) => store_error(ctx, e, message),
    }
}

pub(crate) fn timestamp(t: DateTimeWithTimeZone) -> String {
    t.to_rfc3339()
}

pub(crate) fn iso_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn clamp_u64_to_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct IdInput {
    pub id: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DeleteOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct PingResponse {
    pub status: String,
    pub version: String,
}

pub fn router() -> Router<Ctx> {
    // NOTE: Procedure keys are nested segments. This keeps generated bindings
    // valid TypeScript, while the runtime request path still flattens to
    // "segment.segment".
    let control = Router::new().procedure(
        "ping",
        Procedure::builder::<ApiError>().query(|_, _: ()| async move {
            Ok(PingResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }),
    );

    Router::new()
        .nest("control", control)
        .nest("board", board::router())
        .nest("device", devices::router())
        .nest("order", orders::router())
        .nest("deployment", deployments::router())
        .nest("maintenance", maintenance::router())
        .nest("deviceKind", reference::device_kinds())
        .nest("deviceStatus", reference::device_statuses())
        .nest("maintenanceKind", reference::maintenance_kinds())
        .nest("user", users::router())
        .nest("dashboard", reports::dashboard_router())
        .nest("map", reports::map_router())
        .nest("format", reports::format_router())
        .nest("geocoding", geocoding::router())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};

    pub fn ctx_with(db: DatabaseConnection, role: Option<Role>) -> Ctx {
        let config = ControlConfig {
            database_url: String::new(),
            bind_addr: ([127, 0, 0, 1], 0).into(),
            jwt_secret: "test".to_string(),
            admin_email: String::new(),
            admin_password: String::new(),
            allowed_origins: Vec::new(),
            geocoding_url: "http://127.0.0.1:9".to_string(),
            geocoding_cache_ttl: std::time::Duration::from_secs(60),
            setup_token_ttl: std::time::Duration::from_secs(60),
        };
        let transport = NominatimTransport::new(config.geocoding_url.clone())
            .expect("test transport");
        Ctx {
            db: Arc::new(db),
            geocoding: Arc::new(GeocodingService::new(transport, config.geocoding_cache_ttl)),
            config: Arc::new(config),
            user: role.map(|role| AuthUser {
                user_id: Uuid::new_v4().to_string(),
                email: "test@hmq.ch".to_string(),
                role,
            }),
            request_id: "req-test".to_string(),
        }
    }

    pub fn ctx(role: Option<Role>) -> Ctx {
        ctx_with(MockDatabase::new(DatabaseBackend::Postgres).into_connection(), role)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ctx;
    use super::*;

    #[test]
    fn admin_gate() {
        assert_eq!(require_admin(&ctx(None)).unwrap_err().code, "unauthorized");
        assert_eq!(require_admin(&ctx(Some(Role::User))).unwrap_err().code, "forbidden");
        assert!(require_admin(&ctx(Some(Role::Admin))).is_ok());
    }

    #[test]
    fn bad_ids_report_the_field() {
        let err = parse_id(&ctx(None), "nope", "device_id").unwrap_err();
        assert_eq!(err.code, "invalid_param");
        assert!(err.field_errors.contains_key("device_id"));
    }

    #[test]
    fn workflow_errors_map_to_codes() {
        let c = ctx(None);
        assert_eq!(
            workflow_error(&c, WorkflowError::AlreadyEnded, "x").code,
            "failed_precondition"
        );
        assert_eq!(
            workflow_error(&c, WorkflowError::DeviceNotFound, "x").code,
            "not_found"
        );
        assert_eq!(
            workflow_error(&c, WorkflowError::Db(DbErr::Custom("boom".into())), "Fehler").message,
            "Fehler"
        );
    }

    #[test]
    fn router_builds() {
        assert!(router().build().is_ok());
    }
}
