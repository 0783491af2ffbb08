use thiserror::Error;

use crate::entity::account;
use crate::logger::Logger;
use crate::verify_token::{encode_uid, VerifyTokenGenerator};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound mail transport.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer {
    logger: Logger,
}

impl LogMailer {
    pub fn new(logger: Logger) -> Self {
        Self { logger: logger.with_target("mailer") }
    }
}

impl Mailer for LogMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        self.logger.info(format_args!(
            "mail from={} to={} subject={:?}\n{}",
            message.from, message.to, message.subject, message.body
        ));
        Ok(())
    }
}

pub fn verify_url(domain: &str, uid: &str, token: &str) -> String {
    format!("{}/api/account/verify-email/{}/{}/", domain.trim_end_matches('/'), uid, token)
}

/// `None` when no token could be signed for `account`.
pub fn verify_email_message(
    tokens: &VerifyTokenGenerator,
    domain: &str,
    from: &str,
    account: &account::Model,
) -> Option<EmailMessage> {
    let url = verify_url(domain, &encode_uid(&account.id), &tokens.make_token(account)?);
    Some(EmailMessage {
        from: from.to_string(),
        to: account.email.clone(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Hi {},\n\nconfirm your email address to activate your account:\n{}\n",
            account.username, url
        ),
    })
}
