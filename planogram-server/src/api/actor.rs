//! Caller identity extractor
//!
//! Authentication happens upstream; the gateway forwards the display name of
//! the signed-in user in `x-actor-name`. It is recorded on change logs and
//! requests as-is.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

pub const ACTOR_HEADER: &str = "x-actor-name";

#[derive(Debug, Clone, Default)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self(name))
    }
}
