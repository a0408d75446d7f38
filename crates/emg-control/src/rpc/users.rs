use emg_db::entities::profiles;
use emg_domain::Role;
use emg_domain::validation::InviteForm;
use rspc::{Procedure, Router};
use sea_orm::prelude::Uuid;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use specta::Type;

use super::{
    ApiError, Ctx, IdInput, api_error, invalid, not_found, parse_id, require_admin, store_error,
    store_error_unique, timestamp,
};
use crate::audit;
use crate::auth::{self, hash_token, random_token};

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct ProfileDto {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    /// False until the invite link has been used.
    pub activated: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct SetupLinkOutput {
    pub profile: ProfileDto,
    /// One-time token; shown to the requesting admin only.
    pub setup_token: String,
    pub setup_path: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct SetRoleInput {
    pub id: String,
    pub role: Role,
}

fn dto(p: profiles::Model) -> ProfileDto {
    ProfileDto {
        id: p.id.to_string(),
        role: Role::parse(&p.role).unwrap_or_default(),
        activated: p.password_hash.is_some(),
        email: p.email,
        name: p.name,
        created_at: timestamp(p.created_at),
    }
}

/// Issues a fresh setup link for an existing profile. Replaces any pending
/// invite or reset token of that profile.
async fn reset_password(ctx: &Ctx, raw_id: &str) -> Result<SetupLinkOutput, ApiError> {
    require_admin(ctx)?;
    const MSG: &str = "Fehler beim Zurücksetzen des Passworts";
    let id = parse_id(ctx, raw_id, "id")?;

    let profile = profiles::Entity::find_by_id(id)
        .one(&*ctx.db)
        .await
        .map_err(|e| store_error(ctx, e, MSG))?
        .ok_or_else(|| not_found(ctx, "Benutzer nicht gefunden"))?;
    let token = auth::issue_setup_token(&ctx.db, profile.clone(), ctx.config.setup_token_ttl)
        .await
        .map_err(|e| store_error(ctx, e, MSG))?;

    tracing::info!(profile_id = %profile.id, "password reset issued");
    audit::record(ctx, "user.resetPassword", profile.id, None).await;
    Ok(SetupLinkOutput {
        profile: dto(profile),
        setup_path: format!("/setup-password?token={token}"),
        setup_token: token,
    })
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                require_admin(&ctx)?;
                let rows = profiles::Entity::find()
                    .order_by_asc(profiles::Column::Email)
                    .all(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, "Fehler beim Laden der Benutzer"))?;
                Ok(rows.into_iter().map(dto).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "invite",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: InviteForm| async move {
                require_admin(&ctx)?;
                let v = input.validate().map_err(|e| invalid(&ctx, e))?;

                let token = random_token(32);
                let ttl = chrono::Duration::from_std(ctx.config.setup_token_ttl)
                    .unwrap_or_else(|_| chrono::Duration::days(7));
                let now = chrono::Utc::now();
                let created = profiles::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    email: Set(v.email),
                    name: Set(v.name),
                    role: Set(v.role.as_str().to_string()),
                    password_hash: Set(None),
                    setup_token_hash: Set(Some(hash_token(&token))),
                    setup_token_expires_at: Set(Some((now + ttl).fixed_offset())),
                    created_at: Set(now.fixed_offset()),
                    updated_at: Set(now.fixed_offset()),
                }
                .insert(&*ctx.db)
                .await
                .map_err(|e| {
                    store_error_unique(
                        &ctx,
                        e,
                        "Fehler beim Einladen des Benutzers",
                        "Diese E-Mail-Adresse ist bereits registriert",
                    )
                })?;

                tracing::info!(profile_id = %created.id, email = %created.email, "user invited");
                audit::record(
                    &ctx,
                    "user.invite",
                    created.id,
                    Some(serde_json::json!({ "email": created.email, "role": created.role })),
                )
                .await;

                Ok(SetupLinkOutput {
                    profile: dto(created),
                    setup_path: format!("/setup-password?token={token}"),
                    setup_token: token,
                })
            }),
        )
        .procedure(
            "resetPassword",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: IdInput| async move {
                reset_password(&ctx, &input.id).await
            }),
        )
        .procedure(
            "setRole",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: SetRoleInput| async move {
                let me = require_admin(&ctx)?.user_id.clone();
                const MSG: &str = "Fehler beim Aktualisieren der Benutzerrolle";
                let id = parse_id(&ctx, &input.id, "id")?;
                if id.to_string() == me {
                    return Err(api_error(
                        &ctx,
                        "failed_precondition",
                        "Die eigene Rolle kann nicht geändert werden",
                    ));
                }

                let profile = profiles::Entity::find_by_id(id)
                    .one(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?
                    .ok_or_else(|| not_found(&ctx, "Benutzer nicht gefunden"))?;
                let mut active: profiles::ActiveModel = profile.into();
                active.role = Set(input.role.as_str().to_string());
                active.updated_at = Set(chrono::Utc::now().fixed_offset());
                let updated = active
                    .update(&*ctx.db)
                    .await
                    .map_err(|e| store_error(&ctx, e, MSG))?;

                audit::record(
                    &ctx,
                    "user.setRole",
                    updated.id,
                    Some(serde_json::json!({ "role": updated.role })),
                )
                .await;
                Ok(dto(updated))
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invited_profiles_are_not_activated() {
        let p = profiles::Model {
            id: Uuid::new_v4(),
            email: "neu@hmq.ch".to_string(),
            name: None,
            role: "admin".to_string(),
            password_hash: None,
            setup_token_hash: Some(hash_token("t")),
            setup_token_expires_at: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        };
        let d = dto(p);
        assert!(!d.activated);
        assert_eq!(d.role, Role::Admin);
    }

    #[tokio::test]
    async fn reset_password_is_admin_only() {
        let ctx = crate::rpc::test_support::ctx(Some(Role::User));
        let err = reset_password(&ctx, &Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.code, "forbidden");
    }

    #[tokio::test]
    async fn reset_password_stores_the_hash_of_the_returned_token() {
        use sea_orm::{DatabaseBackend, MockDatabase};
        use std::sync::Arc;

        let p = profiles::Model {
            id: Uuid::new_v4(),
            email: "anna@hmq.ch".to_string(),
            name: None,
            role: "user".to_string(),
            password_hash: Some("$argon2id$x".to_string()),
            setup_token_hash: None,
            setup_token_expires_at: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![p.clone()]])
            .append_query_results([vec![p.clone()]])
            .into_connection();
        let ctx = crate::rpc::test_support::ctx_with(db, Some(Role::Admin));

        let out = reset_password(&ctx, &p.id.to_string()).await.unwrap();
        assert!(out.setup_path.ends_with(&out.setup_token));
        assert_eq!(out.profile.id, p.id.to_string());

        let db = Arc::try_unwrap(ctx.db).unwrap();
        let written = format!("{:?}", db.into_transaction_log());
        assert!(written.contains(&hash_token(&out.setup_token)));
        assert!(!written.contains(&out.setup_token));
    }
}
