use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::account;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::entity::account as account_entity;
use crate::error::AppError;
use crate::role::Role;

const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "loginId")]
    login_id: String,
    exp: usize,
}

/// The logged-in, active account behind the request token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub account: account_entity::Model,
    pub role: Role,
}

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.account.is_staff {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }

    pub fn require_superuser(&self) -> Result<(), AppError> {
        if self.account.is_superuser {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let ctx = match req.app_data::<web::Data<AppContext>>() {
            Some(ctx) => ctx.clone(),
            None => {
                return Box::pin(async { Err(AppError::system_exception().into()) });
            }
        };
        let token = extract_token(req, &ctx.config);

        Box::pin(async move {
            let token = token.ok_or_else(AppError::need_login)?;
            let auth = authenticate_token(&ctx, &token).await?;
            Ok(auth)
        })
    }
}

fn extract_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let header = config.token_header.as_str();
    req.headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn authenticate_token(ctx: &AppContext, token: &str) -> Result<AuthUser, AppError> {
    let claims = decode_jwt(&ctx.config, token)?;
    let account = account::find_by_id(&ctx.db, &claims.login_id)
        .await?
        .filter(|a| a.is_active)
        .ok_or_else(AppError::need_login)?;
    let role = account::role_of(&account);
    Ok(AuthUser { account, role })
}

pub fn issue_token(config: &AppConfig, account_id: &str) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize;
    let claims = Claims {
        login_id: account_id.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::system_exception())
}

fn decode_jwt(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::need_login())
}
