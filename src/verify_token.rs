//! Email verification links: `uid` is the account id in URL-safe base64 and the
//! token is `<issued-at base36>-<hex hmac>` over the account state.
//!
//! The signed state includes `is_active` and `email_verified`, so a token stops
//! validating as soon as it has been consumed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::entity::account;

type HmacSha256 = Hmac<Sha256>;

pub fn encode_uid(account_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(account_id.as_bytes())
}

/// `None` for anything that is not base64 of a UTF-8 string.
pub fn decode_uid(uid: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(uid.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Clone)]
pub struct VerifyTokenGenerator {
    secret: Vec<u8>,
    timeout_secs: i64,
}

impl VerifyTokenGenerator {
    pub fn new(secret: impl AsRef<[u8]>, timeout_secs: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            timeout_secs,
        }
    }

    /// `None` only when the HMAC cannot be keyed with the configured secret.
    pub fn make_token(&self, account: &account::Model) -> Option<String> {
        self.make_token_at(account, Utc::now().timestamp())
    }

    pub fn check_token(&self, account: &account::Model, token: &str) -> bool {
        self.check_token_at(account, token, Utc::now().timestamp())
    }

    fn make_token_at(&self, account: &account::Model, issued_at: i64) -> Option<String> {
        let signature = self.mac(account, issued_at)?.finalize().into_bytes();
        Some(format!("{}-{}", to_base36(issued_at), hex::encode(signature)))
    }

    fn check_token_at(&self, account: &account::Model, token: &str, now: i64) -> bool {
        let Some((ts, signature)) = token.split_once('-') else {
            return false;
        };
        let Some(issued_at) = from_base36(ts) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        let Some(mac) = self.mac(account, issued_at) else {
            return false;
        };
        if mac.verify_slice(&signature).is_err() {
            return false;
        }
        issued_at <= now && now - issued_at <= self.timeout_secs
    }

    fn mac(&self, account: &account::Model, issued_at: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(account.id.as_bytes());
        mac.update(account.password_hash.as_bytes());
        mac.update(&[account.is_active as u8, account.email_verified as u8]);
        mac.update(&issued_at.to_be_bytes());
        Some(mac)
    }
}

fn to_base36(mut value: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &str) -> Option<i64> {
    if s.is_empty() || s.len() > 13 {
        return None;
    }
    i64::from_str_radix(s, 36).ok().filter(|v| *v >= 0)
}
