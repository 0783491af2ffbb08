use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_header: String,
    /// Signing key for email verification tokens.
    pub secret_key: String,
    /// Public origin used to build links in outgoing mail.
    pub domain: String,
    pub media_root: String,
    pub verify_token_timeout_secs: i64,
    pub email_from: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(38321);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/mentorhub/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "hT4pQ9sVb2LmXw7KcR1e".to_string());

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "token".to_string());

        let secret_key = env::var("SECRET_KEY").unwrap_or_else(|_| jwt_secret.clone());
        let domain = env::var("DOMAIN").unwrap_or_else(|_| format!("http://localhost:{}", server_port));
        let media_root = env::var("MEDIA_ROOT").unwrap_or_else(|_| "/opt/mentorhub/media".to_string());

        let verify_token_timeout_secs = env::var("VERIFY_TOKEN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60 * 60 * 24 * 3);

        let email_from = env::var("EMAIL_FROM").unwrap_or_else(|_| "noreply@localhost".to_string());

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(5 * 1024 * 1024);

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_header,
            secret_key,
            domain: domain.trim_end_matches('/').to_string(),
            media_root,
            verify_token_timeout_secs,
            email_from,
            max_upload_bytes,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}", path)
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests(media_root: &str) -> Self {
        Self {
            server_port: 0,
            sqlite_path: ":memory:".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            jwt_secret: "test-jwt-secret".to_string(),
            token_header: "token".to_string(),
            secret_key: "test-secret-key".to_string(),
            domain: "http://testserver".to_string(),
            media_root: media_root.to_string(),
            verify_token_timeout_secs: 3600,
            email_from: "noreply@testserver".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}
