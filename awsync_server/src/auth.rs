use crate::error::ApiError;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};

/// Require `Authorization: Bearer <secret>`.
///
/// Both sides are hashed before comparing, so the comparison never short-circuits on the
/// secret's length or on a matching prefix.
pub fn require_bearer(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let Some(authz) = headers.get(AUTHORIZATION) else {
        return Err(ApiError::Unauthorized("missing bearer token".into()));
    };
    let authz = authz
        .to_str()
        .map_err(|_| ApiError::Unauthorized("invalid authorization header".into()))?;
    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| ApiError::Unauthorized("unsupported authorization scheme".into()))?
        .trim();

    if digests_match(token, secret) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid bearer token".into()))
    }
}

fn digests_match(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
