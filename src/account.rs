//! Account creation, verification, authentication and role management.

use std::str::FromStr;

use bcrypt::{hash, verify};
use chrono::Utc;
use regex::Regex;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entity::account;
use crate::error::{map_tx_error, AppError};
use crate::mailer::verify_email_message;
use crate::profile::{self, Profile};
use crate::role::{resolve_authorization_flags, Role};
use crate::verify_token::decode_uid;

pub const BCRYPT_COST: u32 = 10;
pub const MAX_USERNAME_LEN: usize = 150;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Registration {
    pub account: account::Model,
    pub profile: Option<Profile>,
}

/// Usernames are stored trimmed and lower-cased so lookups ignore case.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn role_of(account: &account::Model) -> Role {
    Role::from_str(&account.role).unwrap_or(Role::User)
}

fn validate(new: &NewAccount) -> Result<(), AppError> {
    let username = new.username.trim();
    if username.is_empty() {
        return Err(AppError::param_error("username cannot be null"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::validation(format!(
            "Usernames are limited to {} characters.",
            MAX_USERNAME_LEN
        )));
    }
    let username_re = Regex::new(r"^[\w.@+-]+$").map_err(|_| AppError::system_exception())?;
    // `.` and `..` match the pattern but cannot name a media directory.
    if !username_re.is_match(username) || username == "." || username == ".." {
        return Err(AppError::validation(
            "Enter a valid username. It may contain only letters, numbers, and @/./+/-/_ characters.",
        ));
    }

    let email = new.email.trim();
    if email.is_empty() {
        return Err(AppError::param_error("email cannot be null"));
    }
    let email_re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_err(|_| AppError::system_exception())?;
    if !email_re.is_match(email) {
        return Err(AppError::validation("Enter a valid email address."));
    }

    if new.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LEN
        )));
    }
    if new.password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::validation("This password is entirely numeric."));
    }
    Ok(())
}

/// Re-derives `is_staff`, `is_superuser` and the effective role.
pub fn apply_authorization_flags(model: &mut account::Model) {
    let flags = resolve_authorization_flags(role_of(model), model.is_superuser);
    model.is_staff = flags.is_staff;
    model.is_superuser = flags.is_superuser;
    model.role = flags.role.as_str().to_string();
}

fn to_active(model: &account::Model) -> account::ActiveModel {
    account::ActiveModel {
        id: Set(model.id.clone()),
        username: Set(model.username.clone()),
        email: Set(model.email.clone()),
        password_hash: Set(model.password_hash.clone()),
        first_name: Set(model.first_name.clone()),
        last_name: Set(model.last_name.clone()),
        role: Set(model.role.clone()),
        email_verified: Set(model.email_verified),
        is_active: Set(model.is_active),
        is_staff: Set(model.is_staff),
        is_superuser: Set(model.is_superuser),
        last_login: Set(model.last_login),
        created: Set(model.created),
        updated: Set(model.updated),
    }
}

/// Persists every column of an existing account. Flags are resolved again on
/// each write.
pub async fn save_account<C: ConnectionTrait>(db: &C, model: &mut account::Model) -> Result<(), DbErr> {
    apply_authorization_flags(model);
    model.updated = Some(Utc::now());
    account::Entity::update(to_active(model)).exec(db).await?;
    Ok(())
}

pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<account::Model>, DbErr> {
    account::Entity::find_by_id(id.to_string()).one(db).await
}

pub async fn find_by_username<C: ConnectionTrait>(
    db: &C,
    username: &str,
) -> Result<Option<account::Model>, DbErr> {
    account::Entity::find()
        .filter(account::Column::Username.eq(normalize_username(username)))
        .one(db)
        .await
}

/// Accounts holding `role`, newest first.
pub async fn by_role<C: ConnectionTrait>(db: &C, role: Role) -> Result<Vec<account::Model>, DbErr> {
    account::Entity::find()
        .filter(account::Column::Role.eq(role.as_str()))
        .order_by_desc(account::Column::Created)
        .all(db)
        .await
}

/// Inserts a new inactive, unverified account.
///
/// Duplicates are caught up front with a friendly message; the unique indexes
/// catch whatever slips past a concurrent request.
pub async fn create<C: ConnectionTrait>(db: &C, new: NewAccount) -> Result<account::Model, AppError> {
    insert_account(db, new, false).await
}

async fn insert_account<C: ConnectionTrait>(
    db: &C,
    new: NewAccount,
    superuser: bool,
) -> Result<account::Model, AppError> {
    validate(&new)?;
    let username = normalize_username(&new.username);
    let email = new.email.trim().to_string();

    if find_by_username(db, &username).await?.is_some() {
        return Err(AppError::validation("This username is already in use."));
    }
    let email_taken = account::Entity::find()
        .filter(account::Column::Email.eq(email.as_str()))
        .one(db)
        .await?
        .is_some();
    if email_taken {
        return Err(AppError::validation("This email address is already in use."));
    }

    let password_hash = hash(&new.password, BCRYPT_COST).map_err(|_| AppError::system_exception())?;
    let now = Some(Utc::now());
    let mut model = account::Model {
        id: Uuid::new_v4().to_string(),
        username,
        email,
        password_hash,
        first_name: new.first_name.filter(|s| !s.trim().is_empty()),
        last_name: new.last_name.filter(|s| !s.trim().is_empty()),
        role: new.role.as_str().to_string(),
        email_verified: false,
        is_active: false,
        is_staff: false,
        is_superuser: superuser,
        last_login: None,
        created: now,
        updated: now,
    };
    apply_authorization_flags(&mut model);

    match account::Entity::insert(to_active(&model)).exec(db).await {
        Ok(_) => Ok(model),
        Err(err) => {
            let err = AppError::from(err);
            if err.is_unique_violation() {
                return Err(AppError::validation(
                    "This username or email address is already in use.",
                ));
            }
            Err(err)
        }
    }
}

/// Self-service sign up: the account, its profile and the verification mail.
///
/// A mail that cannot be sent does not undo the registration.
pub async fn register(ctx: &AppContext, new: NewAccount) -> Result<Registration, AppError> {
    let account = create(&ctx.db, new).await?;
    let profile = ctx.lifecycle().on_account_created(&ctx.db, &account).await;

    match verify_email_message(&ctx.tokens, &ctx.config.domain, &ctx.config.email_from, &account) {
        Some(message) => {
            if let Err(err) = ctx.mailer.send(&message) {
                ctx.logger
                    .error(format_args!("verification mail to {} failed: {}", account.email, err));
            }
        }
        None => ctx
            .logger
            .error(format_args!("could not sign a verification token for {}", account.username)),
    }
    Ok(Registration { account, profile })
}

/// An active, verified administrator.
pub async fn create_superuser(
    ctx: &AppContext,
    username: &str,
    email: &str,
    password: &str,
) -> Result<account::Model, AppError> {
    let new = NewAccount {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
        role: Role::User,
        first_name: None,
        last_name: None,
    };
    let mut account = insert_account(&ctx.db, new, true).await?;
    account.is_active = true;
    account.email_verified = true;
    save_account(&ctx.db, &mut account).await?;
    ctx.lifecycle().on_account_created(&ctx.db, &account).await;
    Ok(account)
}

/// Checks credentials and records the login time. Unknown users, wrong
/// passwords and inactive accounts all get the same answer.
pub async fn authenticate<C: ConnectionTrait>(
    db: &C,
    username: &str,
    password: &str,
) -> Result<account::Model, AppError> {
    let rejected = || AppError::fail("Username or password is incorrect.");
    let mut account = find_by_username(db, username).await?.ok_or_else(rejected)?;
    let ok = verify(password, &account.password_hash).map_err(|_| AppError::system_exception())?;
    if !ok || !account.is_active {
        return Err(rejected());
    }
    account.last_login = Some(Utc::now());
    save_account(db, &mut account).await?;
    Ok(account)
}

/// Consumes a verification link. `Ok(None)` when the uid or token is not
/// valid, which includes a link that was already used.
pub async fn verify_email(
    ctx: &AppContext,
    uid: &str,
    token: &str,
) -> Result<Option<account::Model>, AppError> {
    let Some(id) = decode_uid(uid) else {
        return Ok(None);
    };
    let Some(mut account) = find_by_id(&ctx.db, &id).await? else {
        return Ok(None);
    };
    if !ctx.tokens.check_token(&account, token) {
        return Ok(None);
    }
    account.is_active = true;
    account.email_verified = true;
    save_account(&ctx.db, &mut account).await?;
    ctx.logger
        .info(format_args!("email verified for {}", account.username));
    Ok(Some(account))
}

/// The profile matching the account's role, if it has one.
pub async fn current_profile<C: ConnectionTrait>(
    db: &C,
    account: &account::Model,
) -> Result<Option<Profile>, DbErr> {
    match role_of(account).profile_kind() {
        Some(kind) => profile::find_for_account(db, kind, &account.id).await,
        None => Ok(None),
    }
}

/// Moves an account to `role`. The new role wins over a previous superuser
/// flag, so this is also how an administrator is demoted.
pub async fn change_role(
    ctx: &AppContext,
    account_id: &str,
    role: Role,
) -> Result<(account::Model, Option<Profile>), AppError> {
    let mut account = find_by_id(&ctx.db, account_id)
        .await?
        .ok_or_else(|| AppError::fail("account not found"))?;
    account.role = role.as_str().to_string();
    account.is_superuser = false;
    save_account(&ctx.db, &mut account).await?;
    let profile = ctx.lifecycle().on_role_changed(&ctx.db, &account).await?;
    Ok((account, profile))
}

/// Deletes the account and its profiles in one transaction, then clears the
/// account's media.
pub async fn delete_account(ctx: &AppContext, account: &account::Model) -> Result<(), AppError> {
    let account_id = account.id.clone();
    let removed = ctx
        .db
        .transaction::<_, usize, AppError>(|txn| {
            let account_id = account_id.clone();
            Box::pin(async move {
                let profiles = profile::find_all_for_account(txn, &account_id).await?;
                for existing in &profiles {
                    profile::delete(txn, existing).await?;
                }
                account::Entity::delete_by_id(account_id).exec(txn).await?;
                Ok(profiles.len())
            })
        })
        .await
        .map_err(map_tx_error)?;

    let hooks = ctx.lifecycle();
    for _ in 0..removed {
        hooks.on_profile_deleted(&account.username).await;
    }
    ctx.logger
        .info(format_args!("deleted account {}", account.username));
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sea_orm::{EntityTrait, PaginatorTrait};
    use tempdir::TempDir;

    use super::*;
    use crate::config::AppConfig;
    use crate::db::memory_db;
    use crate::entity::{mentor_profile, user_profile};
    use crate::logger::testing::capture;
    use crate::mailer::testing::{link_parts, Outbox};
    use crate::profile::ProfileKind;

    async fn context(dir: &TempDir) -> (AppContext, Arc<Outbox>) {
        let db = memory_db().await;
        let config = AppConfig::for_tests(&dir.path().to_string_lossy());
        let (logger, _sink) = capture();
        let outbox = Arc::new(Outbox::default());
        let ctx = AppContext::new(db, config, logger).with_mailer(outbox.clone());
        (ctx, outbox)
    }

    fn new_account(username: &str, email: &str, role: Role) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password: "correct-horse".to_string(),
            role,
            first_name: Some("Bob".to_string()),
            last_name: None,
        }
    }

    #[actix_rt::test]
    async fn register_creates_inactive_account_with_profile_and_mail() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, outbox) = context(&dir).await;

        let reg = register(&ctx, new_account("  Bob ", "bob@example.com", Role::Mentor))
            .await
            .unwrap();
        assert_eq!(reg.account.username, "bob");
        assert!(!reg.account.is_active);
        assert!(!reg.account.email_verified);
        assert_eq!(reg.profile.map(|p| p.kind()), Some(ProfileKind::Mentor));
        assert_eq!(mentor_profile::Entity::find().count(&ctx.db).await.unwrap(), 1);

        let mail = outbox.last().unwrap();
        assert_eq!(mail.to, "bob@example.com");
        assert!(mail.body.contains("http://testserver/api/account/verify-email/"));
    }

    #[actix_rt::test]
    async fn duplicates_are_validation_errors() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, _outbox) = context(&dir).await;
        create(&ctx.db, new_account("bob", "bob@example.com", Role::User)).await.unwrap();

        let err = create(&ctx.db, new_account("Bob", "other@example.com", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = create(&ctx.db, new_account("robert", "bob@example.com", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[actix_rt::test]
    async fn bad_input_is_rejected_before_touching_the_database() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, _outbox) = context(&dir).await;

        for (username, email, password) in [
            ("has space", "a@example.com", "correct-horse"),
            ("ok", "not-an-email", "correct-horse"),
            ("ok", "a@example.com", "short"),
            ("ok", "a@example.com", "1234567890"),
            (".", "a@example.com", "correct-horse"),
            ("..", "a@example.com", "correct-horse"),
        ] {
            let mut new = new_account(username, email, Role::User);
            new.password = password.to_string();
            assert!(create(&ctx.db, new).await.is_err(), "{} {} {}", username, email, password);
        }
        assert_eq!(account::Entity::find().count(&ctx.db).await.unwrap(), 0);
    }

    #[actix_rt::test]
    async fn verification_activates_once() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, outbox) = context(&dir).await;
        register(&ctx, new_account("cara", "cara@example.com", Role::User))
            .await
            .unwrap();

        assert!(authenticate(&ctx.db, "cara", "correct-horse").await.is_err());

        let (uid, token) = link_parts(&outbox.last().unwrap());
        let verified = verify_email(&ctx, &uid, &token).await.unwrap().unwrap();
        assert!(verified.is_active && verified.email_verified);
        assert!(verify_email(&ctx, &uid, &token).await.unwrap().is_none());
        assert!(verify_email(&ctx, "garbage", &token).await.unwrap().is_none());

        let logged_in = authenticate(&ctx.db, "CARA", "correct-horse").await.unwrap();
        assert!(logged_in.last_login.is_some());
        assert!(authenticate(&ctx.db, "cara", "wrong-password").await.is_err());
    }

    #[actix_rt::test]
    async fn superuser_is_admin_without_profile_and_can_be_demoted() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, _outbox) = context(&dir).await;

        let root = create_superuser(&ctx, "root", "root@example.com", "correct-horse")
            .await
            .unwrap();
        assert_eq!(root.role, "ADMIN");
        assert!(root.is_staff && root.is_superuser && root.is_active);
        assert!(current_profile(&ctx.db, &root).await.unwrap().is_none());

        let (demoted, profile) = change_role(&ctx, &root.id, Role::Manager).await.unwrap();
        assert_eq!(demoted.role, "MANAGER");
        assert!(demoted.is_staff && !demoted.is_superuser);
        assert_eq!(profile.map(|p| p.kind()), Some(ProfileKind::Manager));
        assert_eq!(by_role(&ctx.db, Role::Manager).await.unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn delete_account_removes_rows_and_media() {
        let dir = TempDir::new("mentorhub_account").unwrap();
        let (ctx, _outbox) = context(&dir).await;
        let reg = register(&ctx, new_account("dora", "dora@example.com", Role::User))
            .await
            .unwrap();
        ctx.media.write("profiles/dora/x.jpg", b"jpeg").await.unwrap();

        delete_account(&ctx, &reg.account).await.unwrap();
        assert!(find_by_id(&ctx.db, &reg.account.id).await.unwrap().is_none());
        assert_eq!(user_profile::Entity::find().count(&ctx.db).await.unwrap(), 0);
        assert!(!dir.path().join("profiles/dora").exists());
    }
}
