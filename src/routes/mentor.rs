use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::account;
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::AppError;
use crate::profile::{self, Profile};
use crate::response::ok;
use crate::role::Role;
use crate::routes::profile::{to_profile_dto, ProfileDto};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::get().to(list)))
        .service(web::resource("/{username}").route(web::get().to(detail)))
        .service(web::resource("/{username}/verify").route(web::post().to(verify)));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MentorDto {
    username: String,
    first_name: Option<String>,
    last_name: Option<String>,
    profile: ProfileDto,
}

#[derive(Deserialize)]
struct VerifyRequest {
    verified: bool,
}

async fn list(ctx: web::Data<AppContext>) -> Result<HttpResponse, AppError> {
    let mut mentors = Vec::new();
    for mentor in account::by_role(&ctx.db, Role::Mentor).await? {
        if !mentor.is_active {
            continue;
        }
        if let Some(found) = account::current_profile(&ctx.db, &mentor).await? {
            mentors.push(MentorDto {
                profile: to_profile_dto(ctx.get_ref(), found).await?,
                username: mentor.username,
                first_name: mentor.first_name,
                last_name: mentor.last_name,
            });
        }
    }
    Ok(ok(Some(mentors)))
}

async fn detail(ctx: web::Data<AppContext>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let mentor = account::find_by_username(&ctx.db, &path.into_inner())
        .await?
        .filter(|a| a.is_active && a.role == Role::Mentor.as_str())
        .ok_or_else(|| AppError::fail("mentor not found"))?;
    let found = account::current_profile(&ctx.db, &mentor)
        .await?
        .ok_or_else(|| AppError::fail("mentor not found"))?;
    Ok(ok(Some(MentorDto {
        profile: to_profile_dto(ctx.get_ref(), found).await?,
        username: mentor.username,
        first_name: mentor.first_name,
        last_name: mentor.last_name,
    })))
}

async fn verify(
    ctx: web::Data<AppContext>,
    auth: AuthUser,
    path: web::Path<String>,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, AppError> {
    auth.require_staff()?;
    let mentor = account::find_by_username(&ctx.db, &path.into_inner())
        .await?
        .ok_or_else(|| AppError::fail("mentor not found"))?;
    let saved = profile::set_mentor_verified(ctx.get_ref(), &mentor, payload.verified).await?;
    ctx.logger.info(format_args!(
        "mentor {} verified={} by {}",
        mentor.username, saved.verified, auth.account.username
    ));
    Ok(ok(Some(to_profile_dto(ctx.get_ref(), Profile::Mentor(saved)).await?)))
}
