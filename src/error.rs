use actix_web::{http::StatusCode, ResponseError};
use log::error;
use sea_orm::{DbErr, SqlErr, TransactionError};
use thiserror::Error;

use crate::image_normalizer::CompressionError;
use crate::response::response_from_error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{msg}")]
    Biz { code: i32, msg: String },
    /// Rejected user input such as a duplicate username; the message is shown as is.
    #[error("{0}")]
    Validation(String),
    #[error("image compression failed: {0}")]
    Compression(#[from] CompressionError),
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn param_error(msg: impl Into<String>) -> Self {
        Self::Biz { code: 1, msg: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self::Biz { code: 2, msg: msg.into() }
    }

    pub fn need_login() -> Self {
        Self::Biz { code: 3, msg: "please login first".to_string() }
    }

    pub fn forbidden() -> Self {
        Self::Biz { code: 3, msg: "permission denied".to_string() }
    }

    pub fn file_size_limit(msg: impl Into<String>) -> Self {
        Self::Biz { code: 4, msg: msg.into() }
    }

    pub fn system_exception() -> Self {
        Self::Biz { code: 99, msg: "system_exception".to_string() }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Biz { code, .. } => *code,
            Self::Validation(_) => 1,
            Self::Compression(_) => 5,
            Self::Db(_) | Self::Io(_) => 99,
        }
    }

    pub fn msg(&self) -> &str {
        match self {
            Self::Biz { msg, .. } => msg,
            Self::Validation(msg) => msg,
            Self::Compression(_) => "the image could not be processed",
            Self::Db(_) | Self::Io(_) => "system_exception",
        }
    }

    /// True when a database write was refused by a unique index.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Db(err) => matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))),
            _ => false,
        }
    }
}

pub fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(db) => AppError::Db(db),
        TransactionError::Transaction(app) => app,
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        if self.code() == 99 {
            error!("request failed: {}", self);
        }
        response_from_error(self)
    }
}
