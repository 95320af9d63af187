use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use wabridge_messaging::{TenantId, TenantRecord};

use crate::{error::ApiError, state::GatewayState};

/// Header (and query parameter) carrying the tenant token.
pub const TOKEN_HEADER: &str = "token";

/// The authenticated tenant behind a request.
///
/// Extracting it resolves the token through the credential cache, falling
/// back to the store on a miss. Missing or unknown tokens are rejected with
/// 401 before the handler runs.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub record: TenantRecord,
}

impl TenantContext {
    pub fn id(&self) -> TenantId {
        self.record.id
    }

    pub fn token(&self) -> &str {
        &self.record.token
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
    Arc<GatewayState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gw = Arc::<GatewayState>::from_ref(state);

        let Some(token) = request_token(parts) else {
            return Err(ApiError::Unauthorized);
        };
        match gw.cache.resolve(&token).await? {
            Some(record) => Ok(Self { record }),
            None => Err(ApiError::Unauthorized),
        }
    }
}

/// Token from the `token` header, else from the `token` query parameter.
fn request_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }
    token_from_query(parts.uri.query()?)
}

fn token_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == TOKEN_HEADER && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
