//! Users and access tokens
//!
//! WebSocket connections authenticate with a long-lived access token. The
//! token resolves to a [`User`], whose admin flag decides which commands and
//! services the connection may use.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use ulid::Ulid;

/// A user in the auth system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_owner: bool,
    pub is_admin: bool,
    pub is_active: bool,
}

impl User {
    pub fn new(name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            name: name.into(),
            is_owner: false,
            is_admin,
            is_active: true,
        }
    }

    /// The owner is always an administrator
    pub fn owner(name: impl Into<String>) -> Self {
        Self {
            is_owner: true,
            ..Self::new(name, true)
        }
    }
}

/// Users and their access tokens
#[derive(Default)]
pub struct AuthState {
    users: DashMap<String, User>,
    /// token -> user id
    tokens: DashMap<String, String>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        debug!("Added user {} (admin: {})", user.name, user.is_admin);
        self.users.insert(user.id.clone(), user);
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.value().clone())
    }

    /// Whether the user exists, is active and is an administrator
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .map(|u| u.is_active && u.is_admin)
            .unwrap_or(false)
    }

    /// Issue a new long-lived access token for a user
    pub fn create_long_lived_token(&self, user_id: &str) -> Option<String> {
        if !self.users.contains_key(user_id) {
            return None;
        }
        let token = generate_token();
        self.tokens.insert(token.clone(), user_id.to_string());
        info!("Issued access token for user {}", user_id);
        Some(token)
    }

    /// Register a token chosen by the operator
    pub fn add_token(&self, token: impl Into<String>, user_id: &str) {
        self.tokens.insert(token.into(), user_id.to_string());
    }

    /// Resolve a token to an active user
    pub fn validate_access_token(&self, token: &str) -> Option<User> {
        let user_id = self.tokens.get(token).map(|r| r.value().clone())?;
        self.get_user(&user_id).filter(|u| u.is_active)
    }
}

/// Generate a random token
fn generate_token() -> String {
    let mut h = RandomState::new().build_hasher();
    h.write_u128(Ulid::new().0);
    format!("{:016x}{:032x}", h.finish(), Ulid::new().0)
}

/// Shared auth state
pub type SharedAuthState = Arc<AuthState>;
