//! Username/password credential store
//!
//! Backs RFC 1929 authentication with the users listed in the configuration.

use crate::config::UserConfig;
use std::collections::HashMap;

/// Configured users, keyed by username
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    /// Build the store from configured users; later duplicates win
    pub fn from_users(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|user| (user.username.clone(), user.password.clone()))
            .collect();
        CredentialStore { users }
    }

    /// Whether any user is configured
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of configured users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check a username/password pair
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => constant_time_eq(expected.as_bytes(), password.as_bytes()),
            None => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
