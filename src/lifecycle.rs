//! Reactions to account and profile changes.
//!
//! Profile creation and media cleanup failures are logged and swallowed so the
//! account operation that triggered them still succeeds.

use sea_orm::ConnectionTrait;

use crate::account::role_of;
use crate::entity::account;
use crate::error::AppError;
use crate::logger::Logger;
use crate::media::MediaStorage;
use crate::profile::{self, Profile, ProfileStore};

pub struct Lifecycle<'a> {
    store: ProfileStore<'a>,
    media: &'a MediaStorage,
    logger: Logger,
}

impl<'a> Lifecycle<'a> {
    pub fn new(store: ProfileStore<'a>, media: &'a MediaStorage, logger: &Logger) -> Self {
        Self {
            store,
            media,
            logger: logger.with_target("lifecycle"),
        }
    }

    /// Gives a freshly created account the profile its role calls for.
    ///
    /// Returns the profile owned by the account afterwards, whether created now
    /// or already there. Running it twice leaves a single profile.
    pub async fn on_account_created<C: ConnectionTrait>(
        &self,
        db: &C,
        account: &account::Model,
    ) -> Option<Profile> {
        let Some(kind) = role_of(account).profile_kind() else {
            self.logger
                .debug(format_args!("no profile for {} account {}", account.role, account.username));
            return None;
        };

        match profile::find_for_account(db, kind, &account.id).await {
            Ok(Some(existing)) => return Some(existing),
            Ok(None) => {}
            Err(err) => {
                self.logger.error(format_args!(
                    "looking up {} profile for {} failed: {}",
                    kind.as_str(),
                    account.username,
                    err
                ));
                return None;
            }
        }

        let mut created = Profile::new(kind, &account.id);
        match self.store.save(db, &mut created, true, None).await {
            Ok(()) => {
                self.logger
                    .info(format_args!("created {} profile for {}", kind.as_str(), account.username));
                Some(created)
            }
            Err(err) if err.is_unique_violation() => {
                self.logger.warn(format_args!(
                    "{} profile for {} already exists: {}",
                    kind.as_str(),
                    account.username,
                    err
                ));
                profile::find_for_account(db, kind, &account.id).await.ok().flatten()
            }
            Err(err) => {
                self.logger.error(format_args!(
                    "creating {} profile for {} failed: {}",
                    kind.as_str(),
                    account.username,
                    err
                ));
                None
            }
        }
    }

    /// Removes `profiles/<username>/` after a profile row is gone. Must run only
    /// once the deletion has committed.
    pub async fn on_profile_deleted(&self, username: &str) {
        match self.media.remove_profile_dir(username).await {
            Ok(true) => self
                .logger
                .info(format_args!("removed media directory of {}", username)),
            Ok(false) => self
                .logger
                .debug(format_args!("no media directory to remove for {}", username)),
            Err(err) => self.logger.error(format_args!(
                "removing media directory of {} failed: {}",
                username, err
            )),
        }
    }

    /// Brings the account's profiles in line with a new role: rows of the wrong
    /// variant are deleted, the matching one is created when missing.
    pub async fn on_role_changed<C: ConnectionTrait>(
        &self,
        db: &C,
        account: &account::Model,
    ) -> Result<Option<Profile>, AppError> {
        let wanted = role_of(account).profile_kind();
        let mut removed = false;
        for existing in profile::find_all_for_account(db, &account.id).await? {
            if Some(existing.kind()) != wanted {
                profile::delete(db, &existing).await?;
                self.logger.info(format_args!(
                    "dropped {} profile of {} after role change to {}",
                    existing.kind().as_str(),
                    account.username,
                    account.role
                ));
                removed = true;
            }
        }
        if removed {
            self.on_profile_deleted(&account.username).await;
        }
        Ok(self.on_account_created(db, account).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use log::Level;
    use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Statement};
    use tempdir::TempDir;

    use super::*;
    use crate::account::testing::insert_account;
    use crate::db::memory_db;
    use crate::entity::{mentor_profile, user_profile};
    use crate::image_normalizer::JpegNormalizer;
    use crate::logger::testing::capture;
    use crate::profile::ProfileKind;
    use crate::role::Role;

    async fn mentor_count(db: &DatabaseConnection) -> u64 {
        mentor_profile::Entity::find().count(db).await.unwrap()
    }

    #[actix_rt::test]
    async fn account_creation_is_idempotent() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        let bob = insert_account(&db, "bob", Role::Mentor).await;
        let first = hooks.on_account_created(&db, &bob).await.unwrap();
        let second = hooks.on_account_created(&db, &bob).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.kind(), ProfileKind::Mentor);
        assert_eq!(mentor_count(&db).await, 1);
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[actix_rt::test]
    async fn racing_insert_hits_unique_index_and_first_row_wins() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);

        let ann = insert_account(&db, "ann", Role::User).await;
        // A racing request got there first.
        let mut raced = Profile::new(ProfileKind::User, &ann.id);
        store.save(&db, &mut raced, true, None).await.unwrap();
        let mut again = Profile::new(ProfileKind::User, &ann.id);
        let err = store.save(&db, &mut again, true, None).await.unwrap_err();
        assert!(err.is_unique_violation());

        let hooks = Lifecycle::new(store, &media, &logger);
        let found = hooks.on_account_created(&db, &ann).await.unwrap();
        assert_eq!(found.id(), raced.id());
        assert_eq!(user_profile::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[actix_rt::test]
    async fn concurrent_creation_keeps_one_profile_and_warns_once() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        let gus = insert_account(&db, "gus", Role::User).await;
        let (a, b) = futures_util::join!(
            hooks.on_account_created(&db, &gus),
            hooks.on_account_created(&db, &gus)
        );

        assert_eq!(a.unwrap().id(), b.unwrap().id());
        assert_eq!(user_profile::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(sink.count(Level::Warn), 1);
        assert_eq!(sink.count(Level::Error), 0);
    }

    #[actix_rt::test]
    async fn admin_gets_no_profile() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, _sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        let root = insert_account(&db, "root", Role::Admin).await;
        assert!(hooks.on_account_created(&db, &root).await.is_none());
        assert!(profile::find_all_for_account(&db, &root.id).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn storage_failure_is_logged_not_raised() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        let carl = insert_account(&db, "carl", Role::Manager).await;
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "DROP TABLE t_manager_profile",
        ))
        .await
        .unwrap();

        assert!(hooks.on_account_created(&db, &carl).await.is_none());
        assert!(sink.count(Level::Error) >= 1);
    }

    #[actix_rt::test]
    async fn cleanup_tolerates_missing_directory_and_reports_failures() {
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        hooks.on_profile_deleted("ghost").await;
        assert_eq!(sink.count(Level::Debug), 1);
        assert_eq!(sink.count(Level::Error), 0);

        media.write("profiles/dana/a.jpg", b"x").await.unwrap();
        hooks.on_profile_deleted("dana").await;
        assert!(!dir.path().join("profiles/dana").exists());

        // A plain file where the directory should be cannot be removed as a tree.
        media.write("profiles/eve", b"not a dir").await.unwrap();
        hooks.on_profile_deleted("eve").await;
        assert_eq!(sink.count(Level::Error), 1);
    }

    #[actix_rt::test]
    async fn role_change_swaps_profile_variant() {
        let db = memory_db().await;
        let dir = TempDir::new("mentorhub_lifecycle").unwrap();
        let media = MediaStorage::new(dir.path());
        let (logger, _sink) = capture();
        let store = ProfileStore::new(&media, Arc::new(JpegNormalizer::default()), &logger);
        let hooks = Lifecycle::new(store, &media, &logger);

        let mut fay = insert_account(&db, "fay", Role::User).await;
        hooks.on_account_created(&db, &fay).await.unwrap();

        fay.role = Role::Mentor.as_str().to_string();
        let now = hooks.on_role_changed(&db, &fay).await.unwrap().unwrap();
        assert_eq!(now.kind(), ProfileKind::Mentor);

        let all = profile::find_all_for_account(&db, &fay.id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind(), ProfileKind::Mentor);
    }
}
