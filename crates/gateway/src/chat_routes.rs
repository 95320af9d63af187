//! Message and contact endpoints. Each one validates its payload, resolves
//! the recipient and calls through to the tenant's client.

use {
    axum::{extract::State, response::Response},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use wabridge_messaging::{ChatPresenceMedia, ChatPresenceState, Jid, OutgoingText, QuotedMessage};

use crate::{
    auth_middleware::TenantContext,
    error::{ApiError, ApiResult, respond},
    payload::Payload,
    server::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    #[serde(alias = "StanzaId", alias = "stanzaID")]
    pub stanza_id: Option<String>,
    #[serde(alias = "Participant")]
    pub participant: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    #[serde(default, alias = "Phone")]
    pub phone: String,
    #[serde(default, alias = "Body")]
    pub body: String,
    #[serde(default, alias = "Id")]
    pub id: Option<String>,
    #[serde(default, alias = "ContextInfo")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    #[serde(default, alias = "Phone")]
    pub phone: String,
    #[serde(default, alias = "Body")]
    pub body: String,
    #[serde(default, alias = "Id")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    #[serde(default, alias = "Id")]
    pub id: Vec<String>,
    #[serde(default, alias = "Chat")]
    pub chat: String,
    #[serde(default, alias = "Sender")]
    pub sender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatPresenceRequest {
    #[serde(default, alias = "Phone")]
    pub phone: String,
    #[serde(default, alias = "State")]
    pub state: String,
    #[serde(default, alias = "Media")]
    pub media: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUsersRequest {
    #[serde(default, alias = "Phone")]
    pub phone: Vec<String>,
}

/// Resolve the recipient and optional quote of a text message.
fn validate_message_fields(
    phone: &str,
    context: Option<&ContextInfo>,
) -> Result<(Jid, Option<QuotedMessage>), ApiError> {
    let recipient = Jid::parse_recipient(phone)?;
    let quoted = match context.map(|c| (&c.stanza_id, &c.participant)) {
        None | Some((None, None)) => None,
        Some((Some(stanza_id), Some(participant))) => Some(QuotedMessage {
            stanza_id: stanza_id.clone(),
            participant: participant.clone(),
        }),
        Some((Some(_), None)) => {
            return Err(ApiError::validation("missing participant in contextinfo"));
        },
        Some((None, Some(_))) => {
            return Err(ApiError::validation("missing stanzaid in contextinfo"));
        },
    };
    Ok((recipient, quoted))
}

/// A fresh message id in the network's usual shape.
fn generate_message_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("3EB0{}", &hex[..16])
}

fn parse_presence_state(raw: &str) -> Result<ChatPresenceState, ApiError> {
    match raw {
        "composing" => Ok(ChatPresenceState::Composing),
        "paused" => Ok(ChatPresenceState::Paused),
        "" => Err(ApiError::validation("missing state in payload")),
        other => Err(ApiError::validation(format!(
            "invalid state in payload: {other}"
        ))),
    }
}

fn parse_presence_media(raw: &str) -> Result<ChatPresenceMedia, ApiError> {
    match raw {
        "" => Ok(ChatPresenceMedia::Text),
        "audio" => Ok(ChatPresenceMedia::Audio),
        other => Err(ApiError::validation(format!(
            "invalid media in payload: {other}"
        ))),
    }
}

pub async fn send_text_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<SendTextRequest>,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    if req.phone.is_empty() {
        return Err(ApiError::validation("missing phone in payload"));
    }
    if req.body.is_empty() {
        return Err(ApiError::validation("missing body in payload"));
    }
    let (to, quoted) = validate_message_fields(&req.phone, req.context_info.as_ref())?;
    let id = req
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_message_id);

    let receipt = handle
        .lease()
        .await?
        .send_text(OutgoingText {
            to,
            body: req.body,
            id: Some(id),
            quoted,
        })
        .await?;

    info!(tenant_id = tenant.id(), id = %receipt.id, timestamp = receipt.timestamp, "message sent");
    Ok(respond(json!({
        "details": "Sent",
        "timestamp": receipt.timestamp,
        "id": receipt.id,
    })))
}

pub async fn react_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<ReactRequest>,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    if req.phone.is_empty() {
        return Err(ApiError::validation("missing phone in payload"));
    }
    if req.body.is_empty() {
        return Err(ApiError::validation("missing body in payload"));
    }
    if req.id.is_empty() {
        return Err(ApiError::validation("missing id in payload"));
    }
    let chat = Jid::parse_recipient(&req.phone)?;
    // "remove" withdraws an earlier reaction.
    let emoji = if req.body == "remove" { "" } else { &req.body };

    let receipt = handle
        .lease()
        .await?
        .send_reaction(&chat, &req.id, emoji)
        .await?;

    // A `me:` prefix marks a reaction to one of our own messages.
    let id = req.id.strip_prefix("me:").unwrap_or(&req.id);
    Ok(respond(json!({
        "details": "Sent",
        "timestamp": receipt.timestamp,
        "id": id,
    })))
}

pub async fn mark_read_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<MarkReadRequest>,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    if req.chat.is_empty() {
        return Err(ApiError::validation("missing chat in payload"));
    }
    if req.id.is_empty() {
        return Err(ApiError::validation("missing id in payload"));
    }
    let chat = Jid::parse_recipient(&req.chat)?;
    let sender = req
        .sender
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(Jid::parse_recipient)
        .transpose()?;

    handle
        .lease()
        .await?
        .mark_read(&chat, sender.as_ref(), &req.id)
        .await?;
    Ok(respond(json!({ "details": "Message(s) marked as read" })))
}

pub async fn chat_presence_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<ChatPresenceRequest>,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    if req.phone.is_empty() {
        return Err(ApiError::validation("missing phone in payload"));
    }
    let presence = parse_presence_state(&req.state)?;
    let media = parse_presence_media(&req.media)?;
    let chat = Jid::parse_recipient(&req.phone)?;

    handle
        .lease()
        .await?
        .send_chat_presence(&chat, presence, media)
        .await?;
    Ok(respond(json!({ "details": "Chat presence set successfully" })))
}

pub async fn check_users_handler(
    State(state): State<AppState>,
    tenant: TenantContext,
    Payload(req): Payload<CheckUsersRequest>,
) -> ApiResult<Response> {
    let handle = state.gateway.registry.get(tenant.id())?;
    if req.phone.is_empty() {
        return Err(ApiError::validation("missing phone in payload"));
    }
    let users = handle.lease().await?.check_users(&req.phone).await?;
    Ok(respond(json!({ "users": users })))
}
