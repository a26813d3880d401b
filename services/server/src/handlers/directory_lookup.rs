use chrono::{DateTime, Utc};
use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::{self, messages::ChatType, users};

use super::{error_response, fail, now_iso8601, optional_i64, optional_str, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

pub async fn get_directory(ctx: &HandlerCtx<'_>, _envelope: &Envelope) -> HandlerResult {
    ctx.require_auth().map_err(fail)?;
    let snapshot = ctx.directory.snapshot().await;

    let entries: Vec<serde_json::Value> = snapshot
        .into_iter()
        .map(|(username, online)| serde_json::json!({ "username": username, "online": online }))
        .collect();

    let mut extra = serde_json::Map::new();
    extra.insert("users".to_owned(), serde_json::Value::Array(entries));
    Ok(HandlerOutcome::just(Envelope::new(tags::DIRECTORY_RESPONSE, now_iso8601()).with_metadata(extra)))
}

pub async fn get_public_key(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;

    let user = match users::get_user_by_username(ctx.pool, target).await {
        Ok(user) => user,
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::GET_PUBLIC_KEY, ErrorKind::RecipientNotFound))),
    };

    let mut extra = serde_json::Map::new();
    extra.insert("username".to_owned(), serde_json::json!(user.username));
    extra.insert("public_key".to_owned(), serde_json::json!(user.public_key));
    Ok(HandlerOutcome::just(Envelope::new(tags::PUBLIC_KEY_RESPONSE, now_iso8601()).with_metadata(extra)))
}

pub async fn get_history(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let viewer_id = ctx.require_auth().map_err(fail)?;
    let chat_type_str = required_str(envelope, "chat_type").map_err(fail)?;
    // §4.E/§8 scenario 3 name this field `target_id`; `target` is accepted
    // too since it's what this crate's own fixtures have historically sent.
    let target = optional_str(envelope, "target_id")
        .or_else(|| optional_str(envelope, "target"))
        .ok_or_else(|| fail(ErrorKind::ProtocolMalformed))?;
    let chat_type = ChatType::parse(chat_type_str).ok_or_else(|| fail(ErrorKind::ProtocolMalformed))?;

    let since = optional_str(envelope, "since").and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc));
    let until = optional_str(envelope, "until").and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc));
    let limit = optional_i64(envelope, "limit").unwrap_or(50).clamp(1, 500);
    let offset = optional_i64(envelope, "offset").unwrap_or(0).max(0);

    let rows = storage::messages::fetch_history(ctx.pool, chat_type, target, viewer_id, since, until, limit, offset)
        .await
        .map_err(|_| fail(ErrorKind::Io))?;

    let messages: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "message_id": row.message_id,
                "sender": row.sender_username,
                "receiver": row.receiver_username,
                "group_id": row.group_id,
                "content": row.content,
                "content_type": row.content_type,
                "encrypted": row.encrypted,
                "timestamp": row.timestamp.to_rfc3339(),
            })
        })
        .collect();

    let mut extra = serde_json::Map::new();
    extra.insert("messages".to_owned(), serde_json::Value::Array(messages));
    Ok(HandlerOutcome::just(Envelope::new(tags::HISTORY_RESPONSE, now_iso8601()).with_metadata(extra)))
}
