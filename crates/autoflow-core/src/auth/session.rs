use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AuthError;

use super::claims::{self, Claims};
use super::credentials::StoredCredentials;

/// The authenticated identity of the current user.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub subject_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: DateTime<Utc>,
}

/// What collaborators see of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub subject_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

impl Session {
    /// Build a session from a freshly issued token pair, decoding the access token.
    pub fn from_tokens(access_token: String, refresh_token: String) -> Result<Self, AuthError> {
        let claims = claims::decode(&access_token)?;
        Ok(Self {
            subject_id: claims.subject_id,
            email: claims.email,
            access_token,
            refresh_token,
            access_expiry: claims.expiry,
        })
    }

    pub fn claims(&self) -> Claims {
        Claims {
            subject_id: self.subject_id.clone(),
            email: self.email.clone(),
            expiry: self.access_expiry,
        }
    }

    pub fn user(&self) -> UserInfo {
        UserInfo {
            subject_id: self.subject_id.clone(),
            email: self.email.clone(),
        }
    }

    pub fn credentials(&self) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_expiry <= now
    }

    /// Check if the access token will expire soon and should be refreshed
    pub fn expires_within(&self, lead: Duration, now: DateTime<Utc>) -> bool {
        self.claims().expires_within(lead, now)
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.access_expiry - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("access_expiry", &self.access_expiry)
            .finish_non_exhaustive()
    }
}
