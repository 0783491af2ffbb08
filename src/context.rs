use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::image_normalizer::{ImageNormalizer, JpegNormalizer};
use crate::lifecycle::Lifecycle;
use crate::logger::Logger;
use crate::mailer::{LogMailer, Mailer};
use crate::media::MediaStorage;
use crate::profile::ProfileStore;
use crate::verify_token::VerifyTokenGenerator;

/// Everything a request handler needs, shared through `web::Data`.
#[derive(Clone)]
pub struct AppContext {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub media: MediaStorage,
    pub normalizer: Arc<dyn ImageNormalizer>,
    pub mailer: Arc<dyn Mailer>,
    pub tokens: VerifyTokenGenerator,
    pub logger: Logger,
}

impl AppContext {
    pub fn new(db: DatabaseConnection, config: AppConfig, logger: Logger) -> Self {
        let media = MediaStorage::new(config.media_root.clone());
        let tokens = VerifyTokenGenerator::new(&config.secret_key, config.verify_token_timeout_secs);
        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(logger.clone()));
        Self {
            db,
            config,
            media,
            normalizer: Arc::new(JpegNormalizer::default()),
            mailer,
            tokens,
            logger,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn profile_store(&self) -> ProfileStore<'_> {
        ProfileStore::new(&self.media, Arc::clone(&self.normalizer), &self.logger)
    }

    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(self.profile_store(), &self.media, &self.logger)
    }
}
