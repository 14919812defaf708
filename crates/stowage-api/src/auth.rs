//! Caller identity.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! authenticated owner id in the `X-Owner-Id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::fmt::{Display, Formatter, Result as FmtResult};
use stowage_core::AppError;

use crate::constants::{MAX_OWNER_LEN, OWNER_HEADER};
use crate::error::HttpAppError;

/// Owner id of the calling client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::MissingParameter(OWNER_HEADER.to_string()))?;

        let owner = value
            .to_str()
            .map_err(|_| AppError::InvalidInput(format!("{} must be ASCII", OWNER_HEADER)))?
            .trim();

        if owner.is_empty() {
            return Err(AppError::MissingParameter(OWNER_HEADER.to_string()).into());
        }
        if owner.len() > MAX_OWNER_LEN {
            return Err(AppError::InvalidInput(format!(
                "{} must be at most {} characters",
                OWNER_HEADER, MAX_OWNER_LEN
            ))
            .into());
        }

        Ok(Owner(owner.to_string()))
    }
}
