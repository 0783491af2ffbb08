use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;

use crate::account;
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::entity::mentor_skill;
use crate::error::AppError;
use crate::profile::{self, ImageUpload, Profile, ProfileEdit, ProfileKind};
use crate::response::ok;
use crate::routes::account::to_rfc3339;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/current").route(web::post().to(current)))
        .service(web::resource("/edit").route(web::post().to(edit)));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileDto {
    id: String,
    kind: ProfileKind,
    account_id: String,
    image_url: String,
    bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skills: Option<Vec<String>>,
    updated: Option<String>,
}

async fn current(ctx: web::Data<AppContext>, auth: AuthUser) -> Result<HttpResponse, AppError> {
    let found = account::current_profile(&ctx.db, &auth.account).await?;
    let dto = match found {
        Some(p) => Some(to_profile_dto(ctx.get_ref(), p).await?),
        None => None,
    };
    Ok(ok(dto))
}

async fn edit(
    ctx: web::Data<AppContext>,
    auth: AuthUser,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let kind = auth.role.profile_kind().ok_or_else(|| AppError::fail("profile not found"))?;
    let form = read_form(payload, ctx.config.max_upload_bytes).await?;
    let saved = profile::edit_profile(ctx.get_ref(), &auth.account, kind, form).await?;
    Ok(ok(Some(to_profile_dto(ctx.get_ref(), saved).await?)))
}

async fn read_form(mut payload: Multipart, max_upload_bytes: usize) -> Result<ProfileEdit, AppError> {
    let mut form = ProfileEdit::default();
    loop {
        let item = payload.next().await;
        let item = match item {
            Some(item) => item,
            None => break,
        };
        let mut field = match item {
            Ok(field) => field,
            Err(_) => return Err(AppError::fail("invalid form data")),
        };
        let name = field.content_disposition().get_name().unwrap_or_default().to_string();
        let filename = field.content_disposition().get_filename().map(|s| s.to_string());

        let mut data = Vec::new();
        loop {
            let chunk = field.next().await;
            let chunk = match chunk {
                Some(chunk) => chunk,
                None => break,
            };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(_) => return Err(AppError::fail("invalid form data")),
            };
            if data.len() + bytes.len() > max_upload_bytes {
                return Err(AppError::file_size_limit(format!(
                    "uploads are limited to {} bytes",
                    max_upload_bytes
                )));
            }
            data.extend_from_slice(&bytes);
        }

        if name == "image" {
            // Browsers send an empty part when no file was chosen.
            match filename {
                Some(file_name) if !file_name.is_empty() && !data.is_empty() => {
                    form.image = Some(ImageUpload { file_name, bytes: data });
                }
                _ => {}
            }
            continue;
        }

        let text = String::from_utf8(data).map_err(|_| AppError::param_error(format!("{} must be text", name)))?;
        match name.as_str() {
            "bio" => form.bio = Some(text),
            "displayName" => form.display_name = Some(text),
            "experience" => form.experience = Some(text),
            "availability" => form.availability = Some(text),
            "skills" => form
                .skills
                .get_or_insert_with(Vec::new)
                .extend(text.split(',').map(|s| s.to_string())),
            _ => {}
        }
    }
    Ok(form)
}

pub(crate) async fn to_profile_dto(ctx: &AppContext, found: Profile) -> Result<ProfileDto, AppError> {
    let image_url = format!("/media/{}", found.image());
    let dto = match found {
        Profile::User(m) => ProfileDto {
            id: m.id,
            kind: ProfileKind::User,
            account_id: m.account_id,
            image_url,
            bio: m.bio,
            display_name: m.display_name,
            experience: None,
            availability: None,
            verified: None,
            skills: None,
            updated: m.updated.map(to_rfc3339),
        },
        Profile::Mentor(m) => {
            let skills = profile::skills(&ctx.db, &m).await?;
            ProfileDto {
                kind: ProfileKind::Mentor,
                image_url,
                skills: Some(skills.into_iter().map(|s: mentor_skill::Model| s.name).collect()),
                verified: Some(m.verified),
                updated: m.updated.map(to_rfc3339),
                id: m.id,
                account_id: m.account_id,
                bio: m.bio,
                display_name: None,
                experience: m.experience,
                availability: m.availability,
            }
        }
        Profile::Manager(m) => ProfileDto {
            id: m.id,
            kind: ProfileKind::Manager,
            account_id: m.account_id,
            image_url,
            bio: m.bio,
            display_name: None,
            experience: None,
            availability: None,
            verified: None,
            skills: None,
            updated: m.updated.map(to_rfc3339),
        },
    };
    Ok(dto)
}

#[cfg(test)]
mod tests {
    use actix_web::http::header;
    use actix_web::{test as actix_test, App};
    use image::ImageFormat;
    use serde_json::Value;
    use tempdir::TempDir;

    use super::*;
    use crate::account::testing::insert_account;
    use crate::auth::issue_token;
    use crate::config::AppConfig;
    use crate::db::memory_db;
    use crate::image_normalizer::fixtures::rgba_png;
    use crate::logger::testing::capture;
    use crate::role::Role;

    const BOUNDARY: &str = "mentorhub-form-boundary";

    fn form_body(text: &[(&str, &str)], image: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in text {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn mentor_context(dir: &TempDir, max_upload_bytes: usize) -> (AppContext, String) {
        let mut config = AppConfig::for_tests(&dir.path().to_string_lossy());
        config.max_upload_bytes = max_upload_bytes;
        let (logger, _sink) = capture();
        let ctx = AppContext::new(memory_db().await, config, logger);
        let bob = insert_account(&ctx.db, "bob", Role::Mentor).await;
        ctx.lifecycle().on_account_created(&ctx.db, &bob).await.unwrap();
        let jwt = issue_token(&ctx.config, &bob.id).unwrap();
        (ctx, jwt)
    }

    fn edit_request(jwt: &str, body: Vec<u8>) -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri("/api/profile/edit")
            .insert_header(("token", jwt.to_string()))
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    #[actix_rt::test]
    async fn oversized_part_is_refused_with_file_size_code() {
        let dir = TempDir::new("mentorhub_profile_route").unwrap();
        let (ctx, jwt) = mentor_context(&dir, 64).await;
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(ctx))
                .service(web::scope("/api/profile").configure(config)),
        )
        .await;

        let req = edit_request(&jwt, form_body(&[("bio", "hello")], Some(&rgba_png(40, 30)))).to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 4);
        assert!(!dir.path().join("profiles/bob").exists());
    }

    #[actix_rt::test]
    async fn upload_with_bio_stores_a_jpeg() {
        let dir = TempDir::new("mentorhub_profile_route").unwrap();
        let (ctx, jwt) = mentor_context(&dir, 5 * 1024 * 1024).await;
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(ctx))
                .service(web::scope("/api/profile").configure(config)),
        )
        .await;

        let req = edit_request(
            &jwt,
            form_body(&[("bio", "Rust mentor"), ("skills", "SQL, Rust")], Some(&rgba_png(40, 30))),
        )
        .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["kind"], "mentor");
        assert_eq!(body["data"]["bio"], "Rust mentor");
        assert_eq!(body["data"]["skills"], serde_json::json!(["Rust", "SQL"]));

        let url = body["data"]["imageUrl"].as_str().unwrap();
        let relative = url.strip_prefix("/media/").unwrap();
        assert!(relative.starts_with("profiles/bob/") && relative.ends_with(".png"));
        let stored = std::fs::read(dir.path().join(relative)).unwrap();
        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);

        let req = actix_test::TestRequest::post()
            .uri("/api/profile/current")
            .insert_header(("token", jwt))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["imageUrl"], url);
    }
}
