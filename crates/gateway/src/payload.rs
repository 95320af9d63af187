use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};

use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON request body that rejects with a validation error in the response
/// envelope. The content type is not checked.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::validation("could not decode payload"))?;
        serde_json::from_slice(&bytes)
            .map(Payload)
            .map_err(|_| ApiError::validation("could not decode payload"))
    }
}
