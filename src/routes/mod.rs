pub mod account;
pub mod media;
pub mod mentor;
pub mod profile;
