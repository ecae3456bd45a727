//! # Access-Control Gate
//!
//! Resolves the API key presented with a request into a [`Principal`].
//!
//! ## Decision Order
//!
//! ```text
//! no key header / several values / blank key  -> NoResult
//! key unknown                                 -> Fail(InvalidKey)
//! key past its expiry                         -> Fail(Expired)
//! key's owner unknown                         -> Fail(InvalidUser)
//! otherwise                                   -> Success(principal)
//! ```
//!
//! A principal's capabilities are the intersection of the key's and the
//! user's flags: both must allow publishing for the principal to publish, and
//! both must allow deleting for it to delete.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::constants::API_KEY_HEADER;

/// An API key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    /// Display name of the key.
    #[serde(default)]
    pub name: String,
    /// User id of the key's owner.
    pub owner: String,
    /// Whether the key may publish.
    #[serde(default)]
    pub can_publish: bool,
    /// Whether the key may delete, unlist and relist.
    #[serde(default)]
    pub can_delete: bool,
    /// When the key was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// When the key stops being accepted.
    pub expiry: DateTime<Utc>,
}

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the user may publish.
    #[serde(default)]
    pub can_publish: bool,
    /// Whether the user may delete, unlist and relist.
    #[serde(default)]
    pub can_delete: bool,
    /// When the user was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Lookup of API keys by their secret value.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Finds the record of `key`.
    async fn find_key(&self, key: &str) -> Option<ApiKey>;
}

/// Lookup of users by id.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds the record of `user_id`.
    async fn find_user(&self, user_id: &str) -> Option<User>;
}

/// Read-only key table loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApiKeyStore {
    keys: HashMap<String, ApiKey>,
}

impl InMemoryApiKeyStore {
    /// Wraps a key table.
    pub fn new(keys: HashMap<String, ApiKey>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn find_key(&self, key: &str) -> Option<ApiKey> {
        self.keys.get(key).cloned()
    }
}

/// Read-only user table loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    users: HashMap<String, User>,
}

impl InMemoryUserStore {
    /// Wraps a user table.
    pub fn new(users: HashMap<String, User>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).cloned()
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User id; owner of anything this principal publishes.
    pub user_id: String,
    /// User display name.
    pub user_name: String,
    /// Display name of the key used.
    pub key_name: String,
    /// Key and user both allow publishing.
    pub can_publish: bool,
    /// Key and user both allow deleting.
    pub can_delete: bool,
}

impl Principal {
    /// Combines a key and its owner.
    pub fn new(key: &ApiKey, user: &User) -> Self {
        Self {
            user_id: key.owner.clone(),
            user_name: user.name.clone(),
            key_name: key.name.clone(),
            can_publish: key.can_publish && user.can_publish,
            can_delete: key.can_delete && user.can_delete,
        }
    }
}

/// Why a presented key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// The key is not known.
    #[error("invalid API key")]
    InvalidKey,
    /// The key is past its expiry.
    #[error("expired API key")]
    Expired,
    /// The key's owner is not known.
    #[error("invalid user")]
    InvalidUser,
}

/// Result of authenticating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No usable key was presented.
    NoResult,
    /// A key was presented and refused.
    Fail(AuthFailure),
    /// The request is authenticated.
    Success(Principal),
}

impl AuthOutcome {
    /// Returns the principal on success.
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Success(principal) => Some(principal),
            _ => None,
        }
    }
}

/// Maps API keys to principals.
#[derive(Clone)]
pub struct AccessGate {
    keys: Arc<dyn ApiKeyStore>,
    users: Arc<dyn UserStore>,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate").finish_non_exhaustive()
    }
}

impl AccessGate {
    /// Creates a gate over the given stores.
    pub fn new(keys: Arc<dyn ApiKeyStore>, users: Arc<dyn UserStore>) -> Self {
        Self { keys, users }
    }

    /// Authenticates a request from the values of its API key header.
    ///
    /// `now` is the request time, compared against the key expiry.
    pub async fn authenticate(&self, header_values: &[&str], now: DateTime<Utc>) -> AuthOutcome {
        let key = match header_values {
            [] => {
                debug!("No {} header", API_KEY_HEADER);
                return AuthOutcome::NoResult;
            }
            [key] => key.trim(),
            _ => {
                warn!("Multiple {} header values", API_KEY_HEADER);
                return AuthOutcome::NoResult;
            }
        };
        if key.is_empty() {
            warn!("Empty API key");
            return AuthOutcome::NoResult;
        }

        let Some(api_key) = self.keys.find_key(key).await else {
            error!("Invalid API key");
            return AuthOutcome::Fail(AuthFailure::InvalidKey);
        };
        if now > api_key.expiry {
            error!("Expired API key '{}'", api_key.name);
            return AuthOutcome::Fail(AuthFailure::Expired);
        }

        let Some(user) = self.users.find_user(&api_key.owner).await else {
            error!(
                "API key '{}' belongs to unknown user '{}'",
                api_key.name, api_key.owner
            );
            return AuthOutcome::Fail(AuthFailure::InvalidUser);
        };

        let principal = Principal::new(&api_key, &user);
        debug!(
            "Authenticated {} with key '{}' (publish: {}, delete: {})",
            principal.user_id, principal.key_name, principal.can_publish, principal.can_delete
        );
        AuthOutcome::Success(principal)
    }
}
