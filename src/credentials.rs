//! Email/password sign-in against an application-provided user store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use starberry_lib::ende::{DEFAULT_PBKDF2_ITERATIONS, hash_password, verify_password};
use tracing::{instrument, warn};

use crate::error::{AuthError, Result};
use crate::oauth::profile::UserIdentity;

/// A user record with its encoded password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub user: UserIdentity,
    /// `pbkdf2-sha256$<iterations>$<salt>$<hash>`
    pub password_hash: String,
}

/// Data-access seam for user records; the schema belongs to the application.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Looks up by normalized (trimmed, lowercased) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredentials>>;
}

/// Process-local [`UserStore`].
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<String, StoredCredentials>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `password` with `iterations` rounds and stores the user.
    pub fn insert(&self, user: UserIdentity, password: &str, iterations: u32) {
        let email = normalize_email(&user.email);
        self.users.insert(email, StoredCredentials { user, password_hash: hash_password(password, iterations) });
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredentials>> {
        Ok(self.users.get(email).map(|entry| entry.value().clone()))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Verifies credentials. Unknown users and wrong passwords both yield
/// [`AuthError::CredentialsRejected`], and unknown users still pay for one
/// hash verification.
#[derive(Clone)]
pub struct CredentialsAuthorizer {
    store: Arc<dyn UserStore>,
    dummy_hash: String,
}

impl CredentialsAuthorizer {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self::with_iterations(store, DEFAULT_PBKDF2_ITERATIONS)
    }

    /// `iterations` should match what stored hashes use.
    pub fn with_iterations(store: Arc<dyn UserStore>, iterations: u32) -> Self {
        Self { store, dummy_hash: hash_password("starberry-unknown-user", iterations) }
    }

    #[instrument(skip(self, email, password), level = "debug")]
    pub async fn authorize(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::CredentialsRejected);
        }
        let record = self.store.find_by_email(&email).await?;
        let hash = record.as_ref().map_or_else(|| self.dummy_hash.clone(), |r| r.password_hash.clone());
        let matches = verify_off_executor(password.to_string(), hash).await?;
        match record {
            Some(record) if matches => Ok(record.user),
            _ => {
                warn!("credentials rejected");
                Err(AuthError::CredentialsRejected)
            }
        }
    }
}

/// PBKDF2 is deliberately slow; it runs on the blocking pool so a sign-in
/// does not stall the worker thread.
async fn verify_off_executor(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Storage(format!("password verification task failed: {}", e)))
}
