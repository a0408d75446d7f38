use axum::{Json, extract::State, http::StatusCode, response::IntoResponse, response::Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use base64::Engine;

use emg_db::entities::{profiles, refresh_tokens};
use emg_db::sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use emg_domain::Role;
use emg_domain::validation::normalize_email;
use sea_orm::prelude::Expr;
use sea_orm::prelude::Uuid;

use crate::config::ControlConfig;
use crate::state::AppState;

pub const CSRF_COOKIE_NAME: &str = "csrf";
pub const ACCESS_COOKIE_NAME: &str = "access";
const REFRESH_COOKIE_NAME: &str = "refresh";

const JWT_ISSUER: &str = "hmq-emg";
const JWT_AUDIENCE: &str = "hmq-emg-web";
const ACCESS_TTL_MINUTES: i64 = 15;
const REFRESH_TTL_DAYS: i64 = 30;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

pub fn json_error(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(ErrorBody { message: message.into() })).into_response()
}

fn internal(context: &str, err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, context, "auth request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Interner Fehler")
}

fn cookie_base(name: &'static str, value: String, path: &'static str) -> Cookie<'static> {
    let mut c = Cookie::new(name, value);
    c.set_http_only(true);
    c.set_same_site(SameSite::Lax);
    c.set_path(path);
    c
}

pub fn random_token(n: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    // URL-safe base64 without padding.
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn csrf_cookie(value: String) -> Cookie<'static> {
    // Non-HttpOnly so the browser app can read and send it as a header.
    let mut c = Cookie::new(CSRF_COOKIE_NAME, value);
    c.set_http_only(false);
    c.set_same_site(SameSite::Lax);
    c.set_path("/");
    c
}

fn clear_cookie(name: &'static str, path: &'static str) -> Cookie<'static> {
    let mut c = Cookie::new(name, "");
    c.set_path(path);
    c.make_removal();
    c
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub token: String,
}

pub async fn csrf(jar: CookieJar) -> impl IntoResponse {
    let token = random_token(32);
    let jar = jar.add(csrf_cookie(token.clone()));
    (jar, Json(CsrfResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhoamiResponse {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

/// sha256 hex digest; refresh and setup tokens are only stored hashed.
pub fn hash_token(raw: &str) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let argon2 = argon2::Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2::Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Creates the bootstrap admin unless an admin profile already exists.
pub async fn ensure_admin_profile(
    db: &DatabaseConnection,
    config: &ControlConfig,
) -> anyhow::Result<()> {
    let has_admin = profiles::Entity::find()
        .filter(profiles::Column::Role.eq(Role::Admin.as_str()))
        .one(db)
        .await?
        .is_some();
    if has_admin {
        return Ok(());
    }

    let email = normalize_email(&config.admin_email);
    let ph = hash_password(&config.admin_password)
        .map_err(|e| anyhow::anyhow!("hash admin password: {e}"))?;
    let now = chrono::Utc::now().fixed_offset();

    match profiles::Entity::find()
        .filter(profiles::Column::Email.eq(email.clone()))
        .one(db)
        .await?
    {
        Some(existing) => {
            let mut active: profiles::ActiveModel = existing.into();
            active.role = Set(Role::Admin.as_str().to_string());
            active.updated_at = Set(now);
            active.update(db).await?;
        }
        None => {
            profiles::ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(email.clone()),
                name: Set(Some("Administrator".to_string())),
                role: Set(Role::Admin.as_str().to_string()),
                password_hash: Set(Some(ph)),
                setup_token_hash: Set(None),
                setup_token_expires_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(db)
            .await?;
        }
    }

    tracing::info!(%email, "bootstrap admin profile ensured");
    Ok(())
}

/// Stores a fresh setup token for `profile` and returns the raw value.
pub async fn issue_setup_token(
    db: &DatabaseConnection,
    profile: profiles::Model,
    ttl: std::time::Duration,
) -> Result<String, DbErr> {
    let raw = random_token(32);
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7));
    let expires_at = chrono::Utc::now() + ttl;

    let mut active: profiles::ActiveModel = profile.into();
    active.setup_token_hash = Set(Some(hash_token(&raw)));
    active.setup_token_expires_at = Set(Some(expires_at.fixed_offset()));
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
    active.update(db).await?;
    Ok(raw)
}

fn build_access_cookie(jwt: String) -> Cookie<'static> {
    // Read by both the rspc guard and `/auth/whoami`, so it lives on "/".
    cookie_base(ACCESS_COOKIE_NAME, jwt, "/")
}

fn build_refresh_cookie(refresh: String) -> Cookie<'static> {
    let mut c = cookie_base(REFRESH_COOKIE_NAME, refresh, "/auth/refresh");
    c.set_same_site(SameSite::Strict);
    c
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    name: Option<String>,
    role: Role,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

pub fn validate_access_jwt(token: &str, secret: &[u8]) -> anyhow::Result<WhoamiResponse> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[JWT_AUDIENCE]);
    validation.set_issuer(&[JWT_ISSUER]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )?;

    Ok(WhoamiResponse {
        user_id: data.claims.sub,
        email: data.claims.email,
        name: data.claims.name,
        role: data.claims.role,
    })
}

fn make_access_jwt(profile: &profiles::Model, secret: &[u8]) -> anyhow::Result<String> {
    let now = time::OffsetDateTime::now_utc();
    let exp = (now + time::Duration::minutes(ACCESS_TTL_MINUTES)).unix_timestamp() as usize;
    let iat = now.unix_timestamp() as usize;

    let claims = Claims {
        sub: profile.id.to_string(),
        email: profile.email.clone(),
        name: profile.name.clone(),
        role: Role::parse(&profile.role).unwrap_or_default(),
        exp,
        iat,
        iss: JWT_ISSUER.to_string(),
        aud: JWT_AUDIENCE.to_string(),
    };

    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret),
    )?)
}

fn whoami_of(profile: &profiles::Model) -> WhoamiResponse {
    WhoamiResponse {
        user_id: profile.id.to_string(),
        email: profile.email.clone(),
        name: profile.name.clone(),
        role: Role::parse(&profile.role).unwrap_or_default(),
    }
}

/// Access cookie plus a new refresh token row and cookie.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    profile: &profiles::Model,
) -> Result<CookieJar, Response> {
    let access = make_access_jwt(profile, state.config.jwt_secret.as_bytes())
        .map_err(|e| internal("jwt", e))?;

    let refresh_raw = random_token(32);
    let now = chrono::Utc::now();
    let token = refresh_tokens::ActiveModel {
        id: Set(Uuid::new_v4()),
        profile_id: Set(profile.id),
        token_hash: Set(hash_token(&refresh_raw)),
        created_at: Set(now.fixed_offset()),
        expires_at: Set((now + chrono::Duration::days(REFRESH_TTL_DAYS)).fixed_offset()),
        revoked_at: Set(None),
        rotated_at: Set(None),
    };
    refresh_tokens::Entity::insert(token)
        .exec(&*state.db)
        .await
        .map_err(|e| internal("refresh token insert", e))?;

    Ok(jar
        .add(build_access_cookie(access))
        .add(build_refresh_cookie(refresh_raw)))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<LoginRequest>,
) -> Response {
    let email = normalize_email(&input.email);
    let profile = match profiles::Entity::find()
        .filter(profiles::Column::Email.eq(email.clone()))
        .one(&*state.db)
        .await
    {
        Ok(Some(p)) => p,
        Ok(None) => return json_error(StatusCode::UNAUTHORIZED, "Ungültige Anmeldedaten"),
        Err(e) => return internal("login lookup", e),
    };

    // Invited but not yet activated profiles have no password.
    let valid = profile
        .password_hash
        .as_deref()
        .is_some_and(|h| verify_password(h, &input.password));
    if !valid {
        tracing::info!(%email, "login rejected");
        return json_error(StatusCode::UNAUTHORIZED, "Ungültige Anmeldedaten");
    }

    let jar = match start_session(&state, jar, &profile).await {
        Ok(jar) => jar,
        Err(resp) => return resp,
    };
    tracing::info!(user_id = %profile.id, "login");
    (jar, Json(whoami_of(&profile))).into_response()
}

pub async fn whoami(State(state): State<AppState>, jar: CookieJar) -> Response {
    let token = match jar.get(ACCESS_COOKIE_NAME) {
        Some(c) => c.value().to_string(),
        None => return json_error(StatusCode::UNAUTHORIZED, "missing access token"),
    };

    match validate_access_jwt(&token, state.config.jwt_secret.as_bytes()) {
        Ok(me) => (StatusCode::OK, Json(me)).into_response(),
        Err(_) => json_error(StatusCode::UNAUTHORIZED, "invalid access token"),
    }
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(refresh) = jar.get(REFRESH_COOKIE_NAME) {
        let h = hash_token(refresh.value());
        if let Err(e) = refresh_tokens::Entity::update_many()
            .col_expr(
                refresh_tokens::Column::RevokedAt,
                Expr::value(chrono::Utc::now().fixed_offset()),
            )
            .filter(refresh_tokens::Column::TokenHash.eq(h))
            .exec(&*state.db)
            .await
        {
            tracing::warn!(error = %e, "failed to revoke refresh token");
        }
    }

    let jar = jar
        .remove(clear_cookie(ACCESS_COOKIE_NAME, "/"))
        .remove(clear_cookie(REFRESH_COOKIE_NAME, "/auth/refresh"));
    (jar, StatusCode::NO_CONTENT).into_response()
}

pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let db = &*state.db;
    let refresh_cookie = match jar.get(REFRESH_COOKIE_NAME) {
        Some(c) => c.value().to_string(),
        None => return json_error(StatusCode::UNAUTHORIZED, "missing refresh token"),
    };

    // Strict single-use refresh: mark rotated and issue a new token.
    let token = match refresh_tokens::Entity::find()
        .filter(refresh_tokens::Column::TokenHash.eq(hash_token(&refresh_cookie)))
        .one(db)
        .await
    {
        Ok(Some(t)) => t,
        Ok(None) => return json_error(StatusCode::UNAUTHORIZED, "invalid refresh token"),
        Err(e) => return internal("refresh lookup", e),
    };

    if token.revoked_at.is_some() {
        return json_error(StatusCode::UNAUTHORIZED, "refresh token revoked");
    }
    if token.rotated_at.is_some() {
        tracing::warn!(profile_id = %token.profile_id, "refresh token reuse");
        return json_error(StatusCode::UNAUTHORIZED, "refresh token already used");
    }
    if token.expires_at < chrono::Utc::now().fixed_offset() {
        return json_error(StatusCode::UNAUTHORIZED, "refresh token expired");
    }

    let profile_id = token.profile_id;
    let mut active: refresh_tokens::ActiveModel = token.into();
    active.rotated_at = Set(Some(chrono::Utc::now().fixed_offset()));
    if let Err(e) = active.update(db).await {
        return internal("refresh rotate", e);
    }

    let profile = match profiles::Entity::find_by_id(profile_id).one(db).await {
        Ok(Some(p)) => p,
        Ok(None) => return json_error(StatusCode::UNAUTHORIZED, "user not found"),
        Err(e) => return internal("refresh profile lookup", e),
    };

    match start_session(&state, jar, &profile).await {
        Ok(jar) => (jar, StatusCode::NO_CONTENT).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize)]
pub struct SetupPasswordRequest {
    pub token: String,
    pub password: String,
}

/// Consumes a setup token (invite or reset) and sets the password.
pub async fn setup_password(
    State(state): State<AppState>,
    Json(input): Json<SetupPasswordRequest>,
) -> Response {
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return json_error(
            StatusCode::BAD_REQUEST,
            format!("Passwort muss mindestens {MIN_PASSWORD_LEN} Zeichen lang sein"),
        );
    }

    let db = &*state.db;
    let profile = match profiles::Entity::find()
        .filter(profiles::Column::SetupTokenHash.eq(hash_token(input.token.trim())))
        .one(db)
        .await
    {
        Ok(Some(p)) => p,
        Ok(None) => return json_error(StatusCode::BAD_REQUEST, "Ungültiger oder abgelaufener Link"),
        Err(e) => return internal("setup token lookup", e),
    };

    let expired = profile
        .setup_token_expires_at
        .is_none_or(|exp| exp < chrono::Utc::now().fixed_offset());
    if expired {
        return json_error(StatusCode::BAD_REQUEST, "Ungültiger oder abgelaufener Link");
    }

    let ph = match hash_password(&input.password) {
        Ok(ph) => ph,
        Err(e) => return internal("hash password", e),
    };

    let profile_id = profile.id;
    let mut active: profiles::ActiveModel = profile.into();
    active.password_hash = Set(Some(ph));
    active.setup_token_hash = Set(None);
    active.setup_token_expires_at = Set(None);
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
    if let Err(e) = active.update(db).await {
        return internal("setup password update", e);
    }

    // Old sessions end with the password change.
    if let Err(e) = refresh_tokens::Entity::update_many()
        .col_expr(
            refresh_tokens::Column::RevokedAt,
            Expr::value(chrono::Utc::now().fixed_offset()),
        )
        .filter(refresh_tokens::Column::ProfileId.eq(profile_id))
        .filter(refresh_tokens::Column::RevokedAt.is_null())
        .exec(db)
        .await
    {
        tracing::warn!(error = %e, %profile_id, "failed to revoke sessions");
    }

    tracing::info!(%profile_id, "password set");
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Records a reset request for an administrator to act on. Tokens are only
/// issued through `user.resetPassword`, so pending invite links stay valid.
///
/// Always answers 204 so callers cannot tell which emails exist.
pub async fn password_reset(
    State(state): State<AppState>,
    Json(input): Json<PasswordResetRequest>,
) -> Response {
    let email = normalize_email(&input.email);
    match profiles::Entity::find()
        .filter(profiles::Column::Email.eq(email))
        .one(&*state.db)
        .await
    {
        Ok(Some(profile)) => {
            tracing::info!(profile_id = %profile.id, "password reset requested");
        }
        Ok(None) => tracing::info!("password reset for unknown email"),
        Err(e) => tracing::warn!(error = %e, "password reset lookup failed"),
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: &str) -> profiles::Model {
        profiles::Model {
            id: Uuid::new_v4(),
            email: "anna@hmq.ch".to_string(),
            name: Some("Anna".to_string()),
            role: role.to_string(),
            password_hash: None,
            setup_token_hash: None,
            setup_token_expires_at: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn password_hash_verifies_only_the_same_password() {
        let h = hash_password("geheim123").unwrap();
        assert!(verify_password(&h, "geheim123"));
        assert!(!verify_password(&h, "geheim124"));
        assert!(!verify_password("not-a-phc-string", "geheim123"));
    }

    #[test]
    fn access_jwt_round_trips_role() {
        let p = profile("admin");
        let token = make_access_jwt(&p, b"secret").unwrap();
        let me = validate_access_jwt(&token, b"secret").unwrap();
        assert_eq!(me.user_id, p.id.to_string());
        assert_eq!(me.role, Role::Admin);
        assert!(validate_access_jwt(&token, b"other").is_err());
    }

    #[test]
    fn unknown_stored_role_downgrades_to_user() {
        let token = make_access_jwt(&profile("owner"), b"secret").unwrap();
        assert_eq!(validate_access_jwt(&token, b"secret").unwrap().role, Role::User);
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let a = hash_token("abc");
        assert_eq!(a, hash_token("abc"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("abd"));
    }

    #[tokio::test]
    async fn reset_request_leaves_the_pending_token_alone() {
        use sea_orm::{DatabaseBackend, MockDatabase};
        use std::sync::Arc;

        let mut invited = profile("user");
        invited.setup_token_hash = Some(hash_token("invite"));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![invited]])
            .into_connection();
        let ctx = crate::rpc::test_support::ctx_with(db, None);
        let db = ctx.db.clone();
        let state = AppState {
            db: ctx.db,
            config: ctx.config,
            geocoding: ctx.geocoding,
        };

        let resp = password_reset(
            State(state),
            Json(PasswordResetRequest {
                email: " Anna@HMQ.ch ".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        // Only the lookup ran; no token was written.
        let log = Arc::try_unwrap(db).unwrap().into_transaction_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].statements()[0].sql.starts_with("SELECT"));
    }
}
