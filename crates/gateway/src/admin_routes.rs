use {
    axum::{extract::State, response::Response},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use crate::{
    auth_middleware::TenantContext,
    error::{ApiError, ApiResult, respond},
    payload::Payload,
    server::AppState,
};

/// Tenants whose name starts with this prefix may create other tenants.
pub const ADMIN_NAME_PREFIX: &str = "super-";

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Token")]
    pub token: String,
}

pub async fn create_tenant_handler(
    State(state): State<AppState>,
    caller: TenantContext,
    Payload(req): Payload<CreateTenantRequest>,
) -> ApiResult<Response> {
    if !caller.name().starts_with(ADMIN_NAME_PREFIX) {
        return Err(ApiError::Unauthorized);
    }
    if req.name.is_empty() {
        return Err(ApiError::validation("missing name in payload"));
    }
    if req.token.is_empty() {
        return Err(ApiError::validation("missing token in payload"));
    }

    let store = state.gateway.store();
    if store.find_by_token(&req.token).await?.is_some() {
        return Err(ApiError::conflict("user already exists"));
    }
    let record = store.create(&req.name, &req.token).await?;
    info!(tenant_id = record.id, name = %record.name, created_by = caller.id(), "tenant created");

    Ok(respond(json!({
        "id": record.id,
        "name": record.name,
        "details": "User created successfully",
    })))
}
