//! SOCKS5 authentication module
//!
//! Method negotiation and credential checks. Methods form a closed set
//! ([`AuthMethod`]); supporting a new one means adding a variant and teaching
//! [`Authenticator::authenticate`] about it.

mod password;

pub use password::CredentialStore;

use super::consts::*;
use crate::config::SocksConfig;
use crate::error::Socks5Error;

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication (RFC 1929)
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }

    /// Parse from SOCKS5 method byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => Some(AuthMethod::None),
            SOCKS5_AUTH_METHOD_PASSWORD => Some(AuthMethod::Password),
            _ => None,
        }
    }

    /// Whether the method has a sub-negotiation after method selection
    pub fn has_subnegotiation(self) -> bool {
        matches!(self, AuthMethod::Password)
    }
}

/// Credentials presented during the sub-negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Nothing to present
    None,
    /// RFC 1929 username and password
    UsernamePassword {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

/// Result of checking credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Client may send its request
    Authorized,
    /// Client is rejected; the connection closes after the failure status
    Denied,
}

/// Negotiates methods and checks credentials against the configured users
#[derive(Debug, Clone)]
pub struct Authenticator {
    /// Supported methods, most preferred first
    methods: Vec<AuthMethod>,
    store: CredentialStore,
}

impl Authenticator {
    /// Build an authenticator from the SOCKS configuration.
    ///
    /// With users configured, username/password is preferred over no-auth
    /// unless `prefer_no_auth` is set. With `auth_required`, no-auth is not
    /// offered at all.
    pub fn from_config(config: &SocksConfig) -> Self {
        let store = CredentialStore::from_users(&config.users);

        let methods = if config.auth_required {
            vec![AuthMethod::Password]
        } else if store.is_empty() {
            vec![AuthMethod::None]
        } else if config.prefer_no_auth {
            vec![AuthMethod::None, AuthMethod::Password]
        } else {
            vec![AuthMethod::Password, AuthMethod::None]
        };

        Authenticator { methods, store }
    }

    /// Supported methods, most preferred first
    pub fn offer(&self) -> &[AuthMethod] {
        &self.methods
    }

    /// Pick the most preferred supported method among `proposed`
    pub fn negotiate(&self, proposed: &[u8]) -> Result<AuthMethod, Socks5Error> {
        self.methods
            .iter()
            .copied()
            .find(|method| proposed.contains(&method.to_byte()))
            .ok_or(Socks5Error::NoAcceptableMethod)
    }

    /// Check the credentials presented for `method`
    pub fn authenticate(&self, method: AuthMethod, credentials: &Credentials) -> AuthOutcome {
        if !self.methods.contains(&method) {
            return AuthOutcome::Denied;
        }

        match (method, credentials) {
            (AuthMethod::None, Credentials::None) => AuthOutcome::Authorized,
            (AuthMethod::Password, Credentials::UsernamePassword { username, password }) => {
                if self.store.verify(username, password) {
                    AuthOutcome::Authorized
                } else {
                    AuthOutcome::Denied
                }
            }
            _ => AuthOutcome::Denied,
        }
    }
}
