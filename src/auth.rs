use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

pub const ACCESS_TOKEN_QUERY: &str = "access_token";
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing access token")]
    Missing,
    #[error("authorization header must use the Bearer scheme")]
    NotBearer,
    #[error("invalid access token")]
    Invalid,
}

/// Resolves an access token to a user id.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<i64, AuthError>;
}

/// Token from `Authorization: Bearer <token>`, falling back to the
/// `access_token` query parameter. A non-Bearer header is an error rather
/// than a reason to look at the query.
pub fn extract_token(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<String, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::NotBearer)?;
        return match value.strip_prefix(BEARER_PREFIX) {
            Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Some(_) => Err(AuthError::Missing),
            None => Err(AuthError::NotBearer),
        };
    }

    match query.get(ACCESS_TOKEN_QUERY) {
        Some(token) if !token.is_empty() => Ok(token.clone()),
        _ => Err(AuthError::Missing),
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Static token table keyed by SHA-256 of the token; raw tokens are not kept.
#[derive(Default)]
pub struct TokenTableAuth {
    tokens: DashMap<String, i64>,
}

impl TokenTableAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (i64, &'a str)>) -> Self {
        let table = Self::new();
        for (uid, token) in pairs {
            table.insert(uid, token);
        }
        table
    }

    pub fn insert(&self, uid: i64, token: &str) {
        self.tokens.insert(hash_token(token), uid);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl AuthService for TokenTableAuth {
    async fn authenticate(&self, token: &str) -> Result<i64, AuthError> {
        self.tokens
            .get(&hash_token(token))
            .map(|uid| *uid)
            .ok_or(AuthError::Invalid)
    }
}
