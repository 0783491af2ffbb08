pub mod account;
pub mod manager_profile;
pub mod mentor_profile;
pub mod mentor_skill;
pub mod user_profile;
