//! Bearer-token authentication
//!
//! Tokens are static and come from [`AccessConfig`]. Each resolves to an
//! [`Actor`] before any handler logic runs; handlers take
//! [`AuthenticatedActor`] as an extractor.

use crate::config::AccessConfig;
use crate::errors::ApiError;
use crate::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use lead_keeper_core::{Actor, UserId};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Lookup table from bearer token to actor
#[derive(Default)]
pub struct TokenRegistry {
    actors: HashMap<String, Actor>,
}

impl TokenRegistry {
    pub fn from_config(config: &AccessConfig) -> Self {
        let actors = config
            .tokens
            .iter()
            .map(|t| {
                (
                    t.token.clone(),
                    Actor::user(UserId::new(t.user_id), t.name.clone(), t.role),
                )
            })
            .collect();
        Self { actors }
    }

    /// Actor owning the token
    pub fn resolve(&self, token: &str) -> Option<&Actor> {
        self.actors
            .iter()
            .find(|(known, _)| known.as_bytes().ct_eq(token.as_bytes()).into())
            .map(|(_, actor)| actor)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("tokens", &self.actors.len())
            .finish()
    }
}

/// Token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The caller resolved from the request's bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedActor(pub Actor);

impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated {
                message: "missing bearer token".to_string(),
            })?;

        let token = bearer_token(header).ok_or_else(|| ApiError::Unauthenticated {
            message: "malformed authorization header".to_string(),
        })?;

        state
            .tokens
            .resolve(token)
            .cloned()
            .map(AuthenticatedActor)
            .ok_or_else(|| ApiError::Unauthenticated {
                message: "unknown token".to_string(),
            })
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
