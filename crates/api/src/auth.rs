//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; the server only resolves them to a
//! [`Caller`] through an [`IdentityProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common::UserId;
use domain::{Caller, Role};
use thiserror::Error;

use crate::AppState;
use crate::error::ApiError;

/// Resolves a bearer token to the caller it was issued for.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<Caller>;
}

/// A malformed `API_TOKENS` entry.
#[derive(Debug, Error)]
pub enum TokenTableError {
    #[error("Malformed token entry {0:?}, expected token=user_uuid:role")]
    Malformed(String),

    #[error("Invalid user id in token entry {entry:?}: {source}")]
    InvalidUser {
        entry: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Unknown role in token entry {0:?}")]
    InvalidRole(String),
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, Caller>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, caller: Caller) -> Self {
        self.tokens.insert(token.into(), caller);
        self
    }

    /// Parses comma separated `token=user_uuid:role` entries. Blank entries are skipped.
    pub fn parse(entries: &str) -> Result<Self, TokenTableError> {
        let mut provider = Self::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let malformed = || TokenTableError::Malformed(entry.to_string());
            let (token, identity) = entry.split_once('=').ok_or_else(malformed)?;
            let (user, role) = identity.split_once(':').ok_or_else(malformed)?;
            let token = token.trim();
            if token.is_empty() {
                return Err(malformed());
            }
            let user_id: UserId =
                user.trim()
                    .parse()
                    .map_err(|source| TokenTableError::InvalidUser {
                        entry: entry.to_string(),
                        source,
                    })?;
            let role: Role = role
                .trim()
                .parse()
                .map_err(|_| TokenTableError::InvalidRole(entry.to_string()))?;
            provider = provider.with_token(token, Caller::new(user_id, role));
        }
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn authenticate(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token).copied()
    }
}

/// Extractor for the authenticated caller of a request.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub Caller);

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                metrics::counter!("api_auth_failures_total", "reason" => "missing").increment(1);
                ApiError::Unauthorized("Missing bearer token".to_string())
            })?;

        match state.identity.authenticate(token).await {
            Some(caller) => Ok(Self(caller)),
            None => {
                metrics::counter!("api_auth_failures_total", "reason" => "invalid").increment(1);
                tracing::warn!("rejected unknown bearer token");
                Err(ApiError::Unauthorized("Invalid bearer token".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "6f1c2b1e-0d7a-4a53-9b0e-0c6f5f0d1a11";

    #[tokio::test]
    async fn test_parses_token_table() {
        let provider = StaticTokenProvider::parse(&format!(
            "alice-token={ALICE}:customer, ops-token={ALICE}:delivery_partner,"
        ))
        .unwrap();
        assert_eq!(provider.len(), 2);

        let caller = provider.authenticate("alice-token").await.unwrap();
        assert_eq!(caller.user_id.to_string(), ALICE);
        assert_eq!(caller.role, Role::Customer);

        let ops = provider.authenticate("ops-token").await.unwrap();
        assert_eq!(ops.role, Role::DeliveryPartner);

        assert!(provider.authenticate("nobody").await.is_none());
    }

    #[test]
    fn test_empty_table_is_allowed() {
        assert!(StaticTokenProvider::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_entries() {
        assert!(matches!(
            StaticTokenProvider::parse("just-a-token"),
            Err(TokenTableError::Malformed(_))
        ));
        assert!(matches!(
            StaticTokenProvider::parse("t=not-a-uuid:admin"),
            Err(TokenTableError::InvalidUser { .. })
        ));
        assert!(matches!(
            StaticTokenProvider::parse(&format!("t={ALICE}:superuser")),
            Err(TokenTableError::InvalidRole(_))
        ));
    }
}
