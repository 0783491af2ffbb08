use actix_web::{web, HttpResponse};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::account::{self, NewAccount};
use crate::auth::{issue_token, AuthUser};
use crate::context::AppContext;
use crate::entity::account as account_entity;
use crate::error::AppError;
use crate::response::ok;
use crate::role::Role;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/register/{role}").route(web::post().to(register)))
        .service(
            web::resource(["/verify-email/{uid}/{token}", "/verify-email/{uid}/{token}/"])
                .route(web::get().to(verify_email)),
        )
        .service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/logout").route(web::post().to(logout)))
        .service(web::resource("/current").route(web::post().to(current)))
        .service(web::resource("/delete").route(web::post().to(delete)))
        .service(web::resource("/admin/{id}/role").route(web::post().to(change_role)));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    password_confirm: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    account: AccountDto,
    profile_kind: Option<&'static str>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    username: String,
    role: String,
    account_id: String,
}

#[derive(Deserialize)]
struct ChangeRoleRequest {
    role: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountDto {
    id: String,
    username: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    role: String,
    email_verified: bool,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
    last_login: Option<String>,
    created: Option<String>,
}

/// Self-service sign up is open to the USER and MENTOR roles only.
fn registrable_role(segment: &str) -> Option<Role> {
    match segment.parse::<Role>() {
        Ok(role @ (Role::User | Role::Mentor)) => Some(role),
        _ => None,
    }
}

async fn register(
    ctx: web::Data<AppContext>,
    path: web::Path<String>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let role = registrable_role(&path.into_inner()).ok_or_else(|| AppError::param_error("unknown role"))?;
    let payload = payload.into_inner();
    let password = payload.password.unwrap_or_default();
    if password.is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }
    if payload.password_confirm.as_deref() != Some(password.as_str()) {
        return Err(AppError::validation("The two password fields didn't match."));
    }
    if role == Role::Mentor {
        let named = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !named(&payload.first_name) || !named(&payload.last_name) {
            return Err(AppError::param_error("mentors must give a first and last name"));
        }
    }

    let registration = account::register(
        ctx.get_ref(),
        NewAccount {
            username: payload.username.unwrap_or_default(),
            email: payload.email.unwrap_or_default(),
            password,
            role,
            first_name: payload.first_name,
            last_name: payload.last_name,
        },
    )
    .await?;

    let response = RegisterResponse {
        profile_kind: registration.profile.as_ref().map(|p| p.kind().as_str()),
        account: to_account_dto(registration.account),
    };
    Ok(ok(Some(response)))
}

async fn verify_email(
    ctx: web::Data<AppContext>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (uid, token) = path.into_inner();
    match account::verify_email(ctx.get_ref(), &uid, &token).await? {
        Some(verified) => Ok(ok(Some(to_account_dto(verified)))),
        None => Err(AppError::fail("The verification link is invalid or has expired.")),
    }
}

async fn login(
    ctx: web::Data<AppContext>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let username = payload.username.clone().unwrap_or_default();
    let password = payload.password.clone().unwrap_or_default();
    if username.trim().is_empty() {
        return Err(AppError::param_error("username cannot be null"));
    }
    if password.is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }

    let found = account::authenticate(&ctx.db, &username, &password).await?;
    let token = issue_token(&ctx.config, &found.id)?;
    Ok(ok(Some(LoginResponse {
        token,
        username: found.username,
        role: found.role,
        account_id: found.id,
    })))
}

async fn logout(_auth: AuthUser) -> Result<HttpResponse, AppError> {
    Ok(ok::<()>(None))
}

async fn current(auth: AuthUser) -> Result<HttpResponse, AppError> {
    Ok(ok(Some(to_account_dto(auth.account))))
}

async fn delete(ctx: web::Data<AppContext>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    account::delete_account(ctx.get_ref(), &auth.account).await?;
    Ok(ok::<()>(None))
}

async fn change_role(
    ctx: web::Data<AppContext>,
    auth: AuthUser,
    path: web::Path<String>,
    payload: web::Json<ChangeRoleRequest>,
) -> Result<HttpResponse, AppError> {
    auth.require_superuser()?;
    let role = payload
        .role
        .parse::<Role>()
        .map_err(|e| AppError::param_error(e.to_string()))?;
    let (changed, _profile) = account::change_role(ctx.get_ref(), &path.into_inner(), role).await?;
    Ok(ok(Some(to_account_dto(changed))))
}

pub(crate) fn to_account_dto(model: account_entity::Model) -> AccountDto {
    AccountDto {
        id: model.id,
        username: model.username,
        email: model.email,
        first_name: model.first_name,
        last_name: model.last_name,
        role: model.role,
        email_verified: model.email_verified,
        is_active: model.is_active,
        is_staff: model.is_staff,
        is_superuser: model.is_superuser,
        last_login: model.last_login.map(to_rfc3339),
        created: model.created.map(to_rfc3339),
    }
}

pub(crate) fn to_rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{test as actix_test, App};
    use serde_json::{json, Value};
    use tempdir::TempDir;

    use super::*;
    use crate::config::AppConfig;
    use crate::db::memory_db;
    use crate::logger::testing::capture;
    use crate::mailer::testing::{link_parts, Outbox};
    use crate::response::json_error_handler;

    #[test]
    fn only_user_and_mentor_can_self_register() {
        assert_eq!(registrable_role("user"), Some(Role::User));
        assert_eq!(registrable_role("mentor"), Some(Role::Mentor));
        assert_eq!(registrable_role("manager"), None);
        assert_eq!(registrable_role("admin"), None);
    }

    #[actix_rt::test]
    async fn register_verify_login_over_http() {
        let dir = TempDir::new("mentorhub_routes").unwrap();
        let (logger, _sink) = capture();
        let outbox = Arc::new(Outbox::default());
        let ctx = AppContext::new(
            memory_db().await,
            AppConfig::for_tests(&dir.path().to_string_lossy()),
            logger,
        )
        .with_mailer(outbox.clone());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(ctx))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(web::scope("/api/account").configure(config)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/api/account/register/mentor")
            .set_json(json!({
                "username": "Bob",
                "email": "bob@example.com",
                "password": "correct-horse",
                "passwordConfirm": "correct-horse",
                "firstName": "Bob",
                "lastName": "Builder"
            }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["account"]["username"], "bob");
        assert_eq!(body["data"]["account"]["isActive"], false);
        assert_eq!(body["data"]["profileKind"], "mentor");

        let (uid, token) = link_parts(&outbox.last().unwrap());
        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/account/verify-email/{}/{}/", uid, token))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["emailVerified"], true);

        let req = actix_test::TestRequest::post()
            .uri("/api/account/login")
            .set_json(json!({"username": "BOB", "password": "correct-horse"}))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        let jwt = body["data"]["token"].as_str().unwrap().to_string();

        let req = actix_test::TestRequest::post()
            .uri("/api/account/current")
            .insert_header(("token", jwt))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["role"], "MENTOR");

        let req = actix_test::TestRequest::post().uri("/api/account/current").to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 3);
    }

    #[actix_rt::test]
    async fn mismatched_passwords_are_rejected() {
        let dir = TempDir::new("mentorhub_routes").unwrap();
        let (logger, _sink) = capture();
        let ctx = AppContext::new(
            memory_db().await,
            AppConfig::for_tests(&dir.path().to_string_lossy()),
            logger,
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(ctx))
                .service(web::scope("/api/account").configure(config)),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/api/account/register/user")
            .set_json(json!({
                "username": "ann",
                "email": "ann@example.com",
                "password": "correct-horse",
                "passwordConfirm": "battery-staple"
            }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 1);
    }
}
