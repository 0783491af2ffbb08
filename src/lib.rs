pub mod account;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod image_normalizer;
pub mod lifecycle;
pub mod logger;
pub mod mailer;
pub mod media;
pub mod profile;
pub mod response;
pub mod role;
pub mod routes;
pub mod verify_token;
