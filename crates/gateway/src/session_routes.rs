//! Session lifecycle endpoints: connect, disconnect, logout, status, QR and
//! webhook configuration.

use {
    axum::{extract::State, response::Response},
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    qrcode::{QrCode, render::svg, types::QrResult},
    serde::{Deserialize, Serialize},
    serde_json::json,
    tracing::info,
};

use wabridge_messaging::SubscribedEvents;

use crate::{
    auth_middleware::TenantContext,
    credential_cache::RecordField,
    error::{ApiError, ApiResult, respond},
    payload::Payload,
    registry::{ConnectivityState, SessionError},
    server::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectRequest {
    #[serde(alias = "Subscribe")]
    pub subscribe: Vec<String>,
    /// Answer right away instead of waiting for the session to come up.
    #[serde(alias = "Immediate")]
    pub immediate: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(rename = "webhookURL", alias = "WebhookURL", default)]
    pub webhook_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    connected: bool,
    logged_in: bool,
    state: ConnectivityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn connect_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<ConnectRequest>,
) -> ApiResult<Response> {
    let gw = &state.gateway;
    let subscriptions = SubscribedEvents::from_request(&req.subscribe);
    let events = subscriptions.joined();
    info!(tenant_id = tenant.id(), %events, immediate = req.immediate, "connect requested");

    let handle = gw.registry.start(&tenant.record, subscriptions)?;
    if !req.immediate {
        handle.wait_ready(gw.sessions.connect_wait()).await?;
    }

    Ok(respond(json!({
        "webhook": tenant.record.webhook,
        "jid": tenant.record.network_identity,
        "events": events,
        "details": "Connected!",
    })))
}

pub async fn disconnect_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> ApiResult<Response> {
    let gw = &state.gateway;
    gw.registry
        .stop(tenant.id(), false, gw.sessions.stop_timeout())
        .await?;
    Ok(respond(json!({ "details": "Disconnected" })))
}

pub async fn logout_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> ApiResult<Response> {
    let gw = &state.gateway;
    gw.registry
        .stop(tenant.id(), true, gw.sessions.stop_timeout())
        .await
        .map_err(|e| match e {
            SessionError::Client(_) => ApiError::upstream("could not perform logout"),
            other => other.into(),
        })?;
    Ok(respond(json!({ "details": "Logged out" })))
}

pub async fn status_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    let status = handle.status();
    let (connected, logged_in) = match handle.lease().await {
        Ok(client) => (client.is_connected(), client.is_logged_in()),
        Err(_) => (false, false),
    };
    Ok(respond(StatusResponse {
        connected,
        logged_in,
        state: status.state,
        error: status.fatal,
    }))
}

pub async fn qr_handler(State(state): State<AppState>, tenant: TenantContext) -> ApiResult<Response> {
    let gw = &state.gateway;
    let handle = gw.registry.get(tenant.id())?;
    {
        let client = handle.lease().await?;
        if !client.is_connected() {
            return Err(SessionError::NotConnected.into());
        }
        if client.is_logged_in() {
            return Err(ApiError::conflict("already logged in"));
        }
    }

    let record = gw
        .cache
        .resolve(tenant.token())
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if record.pairing_code.is_empty() {
        return Err(ApiError::conflict("no pairing code available yet"));
    }
    let image = render_qr(&record.pairing_code)
        .map_err(|e| ApiError::upstream(format!("could not render pairing code: {e}")))?;

    Ok(respond(json!({
        "qrCode": image,
        "code": record.pairing_code,
    })))
}

pub async fn get_webhook_handler(tenant: TenantContext) -> Response {
    let subscribed = SubscribedEvents::parse_stored(&tenant.record.events);
    respond(json!({
        "webhook": tenant.record.webhook,
        "subscribe": subscribed.names(),
    }))
}

pub async fn set_webhook_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<WebhookRequest>,
) -> ApiResult<Response> {
    let webhook = req.webhook_url.trim().to_string();
    if !webhook.is_empty() {
        validate_webhook_url(&webhook)?;
    }
    let record = state
        .gateway
        .cache
        .invalidate(tenant.token(), RecordField::Webhook(webhook))
        .await?;
    info!(tenant_id = tenant.id(), webhook = %record.webhook, "webhook updated");
    Ok(respond(json!({ "webhook": record.webhook })))
}

fn validate_webhook_url(raw: &str) -> Result<(), ApiError> {
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ApiError::validation(format!(
            "unsupported webhook scheme: {}",
            url.scheme()
        ))),
        Err(e) => Err(ApiError::validation(format!("invalid webhook url: {e}"))),
    }
}

/// Encode a pairing code as an SVG QR image in a data URL.
fn render_qr(code: &str) -> QrResult<String> {
    let svg = QrCode::new(code.as_bytes())?
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(svg)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn qr_is_svg_data_url() {
        let image = render_qr("2@abc,def,ghi").unwrap();
        let encoded = image.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[rstest]
    #[case("https://example.com/hook", true)]
    #[case("http://10.0.0.1:9000/in", true)]
    #[case("ftp://example.com/hook", false)]
    #[case("not a url", false)]
    fn webhook_url_validation(#[case] raw: &str, #[case] ok: bool) {
        assert_eq!(validate_webhook_url(raw).is_ok(), ok);
    }

    #[test]
    fn connect_request_accepts_either_casing() {
        let lower: ConnectRequest =
            serde_json::from_str(r#"{"subscribe":["Message"],"immediate":true}"#).unwrap();
        let upper: ConnectRequest =
            serde_json::from_str(r#"{"Subscribe":["Message"],"Immediate":true}"#).unwrap();
        assert_eq!(lower.subscribe, upper.subscribe);
        assert!(lower.immediate && upper.immediate);

        let empty: ConnectRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.subscribe.is_empty());
        assert!(!empty.immediate);
    }
}
