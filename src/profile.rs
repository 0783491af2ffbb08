//! Role-specific profiles and the store that persists them.
//!
//! Every account owns at most one profile, held in the table that matches its
//! role. [`Profile`] is the tagged view over the three tables.

use std::sync::Arc;

use actix_web::web;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::context::AppContext;
use crate::entity::{account, manager_profile, mentor_profile, mentor_skill, user_profile};
use crate::error::AppError;
use crate::image_normalizer::{CompressionError, ImageNormalizer};
use crate::logger::Logger;
use crate::media::{MediaStorage, DEFAULT_IMAGE_PATH};

pub const MAX_SKILL_LEN: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    User,
    Mentor,
    Manager,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 3] = [ProfileKind::User, ProfileKind::Mentor, ProfileKind::Manager];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::User => "user",
            ProfileKind::Mentor => "mentor",
            ProfileKind::Manager => "manager",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Profile {
    User(user_profile::Model),
    Mentor(mentor_profile::Model),
    Manager(manager_profile::Model),
}

// The three models share id/account_id/image/bio/created/updated.
macro_rules! on_variant {
    ($profile:expr, $m:ident => $body:expr) => {
        match $profile {
            Profile::User($m) => $body,
            Profile::Mentor($m) => $body,
            Profile::Manager($m) => $body,
        }
    };
}

impl Profile {
    /// A fresh, not yet persisted profile with the placeholder image.
    pub fn new(kind: ProfileKind, account_id: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let account_id = account_id.to_string();
        let image = DEFAULT_IMAGE_PATH.to_string();
        let now = Some(Utc::now());
        match kind {
            ProfileKind::User => Profile::User(user_profile::Model {
                id,
                account_id,
                image,
                bio: None,
                display_name: None,
                created: now,
                updated: now,
            }),
            ProfileKind::Mentor => Profile::Mentor(mentor_profile::Model {
                id,
                account_id,
                image,
                bio: None,
                experience: None,
                availability: None,
                verified: false,
                created: now,
                updated: now,
            }),
            ProfileKind::Manager => Profile::Manager(manager_profile::Model {
                id,
                account_id,
                image,
                bio: None,
                created: now,
                updated: now,
            }),
        }
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            Profile::User(_) => ProfileKind::User,
            Profile::Mentor(_) => ProfileKind::Mentor,
            Profile::Manager(_) => ProfileKind::Manager,
        }
    }

    pub fn id(&self) -> &str {
        on_variant!(self, m => &m.id)
    }

    pub fn account_id(&self) -> &str {
        on_variant!(self, m => &m.account_id)
    }

    pub fn image(&self) -> &str {
        on_variant!(self, m => &m.image)
    }

    pub fn set_image(&mut self, image: String) {
        on_variant!(self, m => m.image = image)
    }

    pub fn bio(&self) -> Option<&str> {
        on_variant!(self, m => m.bio.as_deref())
    }

    pub fn set_bio(&mut self, bio: Option<String>) {
        on_variant!(self, m => m.bio = bio)
    }

    pub fn has_custom_image(&self) -> bool {
        !self.image().is_empty() && self.image() != DEFAULT_IMAGE_PATH
    }

    fn touch(&mut self) {
        let now = Some(Utc::now());
        on_variant!(self, m => m.updated = now)
    }
}

pub async fn find_by_id<C: ConnectionTrait>(
    db: &C,
    kind: ProfileKind,
    id: &str,
) -> Result<Option<Profile>, DbErr> {
    let id = id.to_string();
    Ok(match kind {
        ProfileKind::User => user_profile::Entity::find_by_id(id).one(db).await?.map(Profile::User),
        ProfileKind::Mentor => mentor_profile::Entity::find_by_id(id).one(db).await?.map(Profile::Mentor),
        ProfileKind::Manager => manager_profile::Entity::find_by_id(id).one(db).await?.map(Profile::Manager),
    })
}

pub async fn find_for_account<C: ConnectionTrait>(
    db: &C,
    kind: ProfileKind,
    account_id: &str,
) -> Result<Option<Profile>, DbErr> {
    Ok(match kind {
        ProfileKind::User => user_profile::Entity::find()
            .filter(user_profile::Column::AccountId.eq(account_id))
            .one(db)
            .await?
            .map(Profile::User),
        ProfileKind::Mentor => mentor_profile::Entity::find()
            .filter(mentor_profile::Column::AccountId.eq(account_id))
            .one(db)
            .await?
            .map(Profile::Mentor),
        ProfileKind::Manager => manager_profile::Entity::find()
            .filter(manager_profile::Column::AccountId.eq(account_id))
            .one(db)
            .await?
            .map(Profile::Manager),
    })
}

/// Every profile row owned by the account, whatever its table.
pub async fn find_all_for_account<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
) -> Result<Vec<Profile>, DbErr> {
    let mut found = Vec::new();
    for kind in ProfileKind::ALL {
        if let Some(profile) = find_for_account(db, kind, account_id).await? {
            found.push(profile);
        }
    }
    Ok(found)
}

/// Deletes the profile row and, for mentors, its skills. Media cleanup is the
/// caller's job once the surrounding transaction has committed.
pub async fn delete<C: ConnectionTrait>(db: &C, profile: &Profile) -> Result<(), DbErr> {
    match profile {
        Profile::User(m) => {
            user_profile::Entity::delete_by_id(m.id.clone()).exec(db).await?;
        }
        Profile::Mentor(m) => {
            mentor_skill::Entity::delete_many()
                .filter(mentor_skill::Column::ProfileId.eq(m.id.as_str()))
                .exec(db)
                .await?;
            mentor_profile::Entity::delete_by_id(m.id.clone()).exec(db).await?;
        }
        Profile::Manager(m) => {
            manager_profile::Entity::delete_by_id(m.id.clone()).exec(db).await?;
        }
    }
    Ok(())
}

pub async fn skills<C: ConnectionTrait>(
    db: &C,
    profile: &mentor_profile::Model,
) -> Result<Vec<mentor_skill::Model>, DbErr> {
    profile
        .find_related(mentor_skill::Entity)
        .order_by_asc(mentor_skill::Column::Name)
        .all(db)
        .await
}

/// Trims, drops blanks and case-insensitive duplicates.
pub fn clean_skill_names(names: &[String]) -> Result<Vec<String>, AppError> {
    let mut cleaned: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if name.chars().count() > MAX_SKILL_LEN {
            return Err(AppError::validation(format!(
                "Skill names are limited to {} characters.",
                MAX_SKILL_LEN
            )));
        }
        if !cleaned.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            cleaned.push(name.to_string());
        }
    }
    Ok(cleaned)
}

pub async fn replace_skills<C: ConnectionTrait>(
    db: &C,
    profile_id: &str,
    names: &[String],
) -> Result<(), DbErr> {
    mentor_skill::Entity::delete_many()
        .filter(mentor_skill::Column::ProfileId.eq(profile_id))
        .exec(db)
        .await?;
    for name in names {
        let row = mentor_skill::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            profile_id: Set(profile_id.to_string()),
            name: Set(name.clone()),
        };
        mentor_skill::Entity::insert(row).exec(db).await?;
    }
    Ok(())
}

/// Persists profiles, normalizing a new image on the way in.
#[derive(Clone)]
pub struct ProfileStore<'a> {
    media: &'a MediaStorage,
    normalizer: Arc<dyn ImageNormalizer>,
    logger: &'a Logger,
}

impl<'a> ProfileStore<'a> {
    pub fn new(media: &'a MediaStorage, normalizer: Arc<dyn ImageNormalizer>, logger: &'a Logger) -> Self {
        Self {
            media,
            normalizer,
            logger,
        }
    }

    /// Inserts (`is_new`) or updates the profile.
    ///
    /// An image that differs from the stored reference is normalized first; its
    /// bytes come from `pending_image` or, failing that, from media storage. A
    /// normalization failure aborts the save with nothing written.
    pub async fn save<C: ConnectionTrait>(
        &self,
        db: &C,
        profile: &mut Profile,
        is_new: bool,
        pending_image: Option<Vec<u8>>,
    ) -> Result<(), AppError> {
        if !is_new && !profile.image().is_empty() {
            match find_by_id(db, profile.kind(), profile.id()).await? {
                Some(previous) if previous.image() == profile.image() => {
                    write_row(db, profile, false).await?;
                    return Ok(());
                }
                Some(_) => {}
                None => self.logger.warn(format_args!(
                    "{} profile {} not found during update",
                    profile.kind().as_str(),
                    profile.id()
                )),
            }
        }

        if profile.has_custom_image() {
            let normalized = match self.normalize(profile.image(), pending_image).await {
                Ok(normalized) => normalized,
                Err(err) => {
                    self.logger.error(format_args!(
                        "image compression failed for profile {} ({}): {}",
                        profile.id(),
                        profile.image(),
                        err
                    ));
                    return Err(err.into());
                }
            };
            self.media.write(&normalized.name, &normalized.bytes).await?;
            profile.set_image(normalized.name);
        }

        write_row(db, profile, is_new).await?;
        Ok(())
    }

    async fn normalize(
        &self,
        image: &str,
        pending: Option<Vec<u8>>,
    ) -> Result<crate::image_normalizer::NormalizedImage, CompressionError> {
        let raw = match pending {
            Some(bytes) => bytes,
            None => self.media.read(image).await?,
        };
        // Decoding and encoding are CPU bound; keep them off the request workers.
        let normalizer = Arc::clone(&self.normalizer);
        let name = image.to_string();
        web::block(move || normalizer.normalize(&name, &raw))
            .await
            .map_err(|_| CompressionError::Worker)?
    }
}

// UPDATE first; zero affected rows means the row is gone, so INSERT instead.
macro_rules! upsert {
    ($db:expr, $entity:ident, $active:expr, $id:expr, $is_new:expr) => {{
        let active = $active;
        let inserted = if $is_new {
            false
        } else {
            $entity::Entity::update_many()
                .set(active.clone())
                .filter($entity::Column::Id.eq($id))
                .exec($db)
                .await?
                .rows_affected
                > 0
        };
        if !inserted {
            $entity::Entity::insert(active).exec($db).await?;
        }
    }};
}

async fn write_row<C: ConnectionTrait>(db: &C, profile: &mut Profile, is_new: bool) -> Result<(), DbErr> {
    profile.touch();
    match profile {
        Profile::User(m) => {
            let active = user_profile::ActiveModel {
                id: Set(m.id.clone()),
                account_id: Set(m.account_id.clone()),
                image: Set(m.image.clone()),
                bio: Set(m.bio.clone()),
                display_name: Set(m.display_name.clone()),
                created: Set(m.created),
                updated: Set(m.updated),
            };
            upsert!(db, user_profile, active, m.id.as_str(), is_new);
        }
        Profile::Mentor(m) => {
            let active = mentor_profile::ActiveModel {
                id: Set(m.id.clone()),
                account_id: Set(m.account_id.clone()),
                image: Set(m.image.clone()),
                bio: Set(m.bio.clone()),
                experience: Set(m.experience.clone()),
                availability: Set(m.availability.clone()),
                verified: Set(m.verified),
                created: Set(m.created),
                updated: Set(m.updated),
            };
            upsert!(db, mentor_profile, active, m.id.as_str(), is_new);
        }
        Profile::Manager(m) => {
            let active = manager_profile::ActiveModel {
                id: Set(m.id.clone()),
                account_id: Set(m.account_id.clone()),
                image: Set(m.image.clone()),
                bio: Set(m.bio.clone()),
                created: Set(m.created),
                updated: Set(m.updated),
            };
            upsert!(db, manager_profile, active, m.id.as_str(), is_new);
        }
    }
    Ok(())
}

pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_AVAILABILITY_LEN: usize = 150;

#[derive(Debug)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Submitted profile form. `None` leaves a field alone, an empty string
/// clears it. Fields that do not exist on the edited variant are ignored.
#[derive(Debug, Default)]
pub struct ProfileEdit {
    pub bio: Option<String>,
    pub display_name: Option<String>,
    pub experience: Option<String>,
    pub availability: Option<String>,
    pub skills: Option<Vec<String>>,
    pub image: Option<ImageUpload>,
}

fn cleared(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn check_len(field: &str, value: &Option<String>, max: usize) -> Result<(), AppError> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::validation(format!(
            "{} is limited to {} characters.",
            field, max
        ))),
        _ => Ok(()),
    }
}

/// Applies `edit` to the profile of `account`, which must be of `kind`.
///
/// The row and the mentor's skills are written in one transaction; a new
/// image is normalized before anything is persisted.
pub async fn edit_profile(
    ctx: &AppContext,
    account: &account::Model,
    kind: ProfileKind,
    edit: ProfileEdit,
) -> Result<Profile, AppError> {
    let mut profile = crate::account::current_profile(&ctx.db, account)
        .await?
        .filter(|p| p.kind() == kind)
        .ok_or_else(|| AppError::fail("profile not found"))?;

    let skills = edit.skills.as_deref().map(clean_skill_names).transpose()?;
    if let Some(bio) = edit.bio {
        profile.set_bio(cleared(bio));
    }
    match &mut profile {
        Profile::User(m) => {
            if let Some(name) = edit.display_name {
                m.display_name = cleared(name);
                check_len("Display name", &m.display_name, MAX_DISPLAY_NAME_LEN)?;
            }
        }
        Profile::Mentor(m) => {
            if let Some(experience) = edit.experience {
                m.experience = cleared(experience);
            }
            if let Some(availability) = edit.availability {
                m.availability = cleared(availability);
                check_len("Availability", &m.availability, MAX_AVAILABILITY_LEN)?;
            }
        }
        Profile::Manager(_) => {}
    }

    let pending = match edit.image {
        Some(upload) => {
            let path = ctx
                .media
                .upload_path(&account.username, &upload.file_name)
                .ok_or_else(|| AppError::param_error("invalid upload"))?;
            profile.set_image(path);
            Some(upload.bytes)
        }
        None => None,
    };

    let uploaded = pending.is_some();
    let txn = ctx.db.begin().await?;
    let written = async {
        ctx.profile_store().save(&txn, &mut profile, false, pending).await?;
        if let (Profile::Mentor(m), Some(names)) = (&profile, skills) {
            replace_skills(&txn, &m.id, &names).await?;
        }
        Ok::<(), AppError>(())
    }
    .await;
    let outcome = match written {
        Ok(()) => txn.commit().await.map_err(AppError::from),
        Err(err) => {
            if let Err(db_err) = txn.rollback().await {
                ctx.logger.error(format_args!("rollback of profile {} failed: {}", profile.id(), db_err));
            }
            Err(err)
        }
    };
    if let Err(err) = outcome {
        // The row still points at the previous image; the new file is unreferenced.
        if uploaded {
            discard_upload(ctx, profile.image()).await;
        }
        return Err(err);
    }
    Ok(profile)
}

async fn discard_upload(ctx: &AppContext, path: &str) {
    match ctx.media.remove(path).await {
        Ok(true) => ctx.logger.debug(format_args!("discarded upload {}", path)),
        Ok(false) => {}
        Err(err) => ctx
            .logger
            .error(format_args!("could not discard upload {}: {}", path, err)),
    }
}

/// Marks a mentor as vetted by staff.
pub async fn set_mentor_verified(
    ctx: &AppContext,
    account: &account::Model,
    verified: bool,
) -> Result<mentor_profile::Model, AppError> {
    let mut profile = match crate::account::current_profile(&ctx.db, account).await? {
        Some(Profile::Mentor(m)) => Profile::Mentor(mentor_profile::Model { verified, ..m }),
        _ => return Err(AppError::fail("mentor not found")),
    };
    ctx.profile_store().save(&ctx.db, &mut profile, false, None).await?;
    match profile {
        Profile::Mentor(m) => Ok(m),
        _ => Err(AppError::system_exception()),
    }
}
