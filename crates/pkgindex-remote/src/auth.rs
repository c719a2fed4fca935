//! Bearer-token authentication for contract 1.7 sources.

use crate::information::{AuthenticationInfo, AuthenticationType, EntraIdInfo};
use crate::RemoteError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now < self.expires_at
    }
}

/// Obtains tokens for a resource. Interactive flows and caches of an
/// identity platform live behind this trait.
pub trait TokenProvider: Send + Sync {
    fn acquire_token(&self, info: &EntraIdInfo) -> Result<AccessToken, RemoteError>;
}

/// Hands out one preconfigured token that never expires.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn acquire_token(&self, _info: &EntraIdInfo) -> Result<AccessToken, RemoteError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        })
    }
}

enum TokenState {
    Empty,
    Cached(AccessToken),
    /// The provider refused once; the connection stays unauthenticated.
    Refused(String),
}

/// Produces the `Authorization` header for every request of a connection.
///
/// The token is cached and refreshed under a mutex once it expires. A refused
/// or empty token fails the call and every later call on the connection
/// without asking the provider again.
pub struct Authenticator {
    info: EntraIdInfo,
    provider: Arc<dyn TokenProvider>,
    state: Mutex<TokenState>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("resource", &self.info.resource)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(
        info: &AuthenticationInfo,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, RemoteError> {
        match &info.kind {
            AuthenticationType::MicrosoftEntraId => {
                let entra = info
                    .entra_id
                    .as_ref()
                    .filter(|e| !e.resource.is_empty())
                    .ok_or_else(|| {
                        RemoteError::Contract(
                            "Microsoft Entra ID authentication requires a resource".to_owned(),
                        )
                    })?;
                Ok(Self {
                    info: entra.clone(),
                    provider,
                    state: Mutex::new(TokenState::Empty),
                })
            }
            other => Err(RemoteError::AuthenticationTypeNotSupported(
                other.as_str().to_owned(),
            )),
        }
    }

    pub fn resource(&self) -> &str {
        &self.info.resource
    }

    /// Current token, acquiring a new one if none is cached or it expired.
    pub fn token(&self) -> Result<String, RemoteError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RemoteError::Authentication("token cache lock poisoned".to_owned()))?;
        match &*state {
            TokenState::Refused(reason) => {
                return Err(RemoteError::Authentication(reason.clone()));
            }
            TokenState::Cached(token) if token.is_valid_at(Utc::now()) => {
                return Ok(token.token.clone());
            }
            TokenState::Cached(_) | TokenState::Empty => {}
        }

        debug!("acquiring token for {}", self.info.resource);
        let refusal = match self.provider.acquire_token(&self.info) {
            Ok(fresh) if !fresh.token.is_empty() => {
                let token = fresh.token.clone();
                *state = TokenState::Cached(fresh);
                return Ok(token);
            }
            Ok(_) => format!("empty token returned for {}", self.info.resource),
            Err(RemoteError::Authentication(reason)) => reason,
            Err(e) => e.to_string(),
        };
        warn!("authentication for {} refused: {refusal}", self.info.resource);
        *state = TokenState::Refused(refusal.clone());
        Err(RemoteError::Authentication(refusal))
    }

    pub fn authorization_header(&self) -> Result<(String, String), RemoteError> {
        Ok((
            crate::AUTHORIZATION_HEADER.to_owned(),
            format!("Bearer {}", self.token()?),
        ))
    }
}
