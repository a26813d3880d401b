//! Direct and group message handlers (§4.E `text_message` family and
//! `group_message`). Persistence always happens before fan-out, and
//! fan-out only ever reaches sessions that are live *right now* — an
//! offline recipient gets the message purely from `get_history` later.

use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::{self, groups};

use super::{error_response, fail, now_iso8601, HandlerCtx, HandlerOutcome, HandlerResult};

fn content_and_encrypted(envelope: &Envelope) -> Result<(&str, bool), ErrorKind> {
    let data = envelope.data.as_ref().ok_or(ErrorKind::ProtocolMalformed)?;
    let encrypted = !matches!(data.encryption, msg_protocol::Encryption::None);
    Ok((data.content.as_str(), encrypted))
}

pub async fn handle_direct_message(ctx: &HandlerCtx<'_>, envelope: &Envelope, default_content_type: &str) -> HandlerResult {
    let sender_id = ctx.require_auth().map_err(fail)?;
    let sender_username = ctx.username().await.ok_or_else(|| fail(ErrorKind::Unauthorized))?;

    let recipient = envelope.recipient.as_deref().ok_or_else(|| fail(ErrorKind::ProtocolMalformed))?;
    let (content, encrypted) = content_and_encrypted(envelope).map_err(fail)?;
    let content_type = envelope
        .data
        .as_ref()
        .map(|d| d.content_type.as_str())
        .unwrap_or(default_content_type);

    let recipient_id = match storage::resolve_user_ref(ctx.pool, recipient).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(&envelope.msg_type, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(&envelope.msg_type, ErrorKind::Io))),
    };

    match storage::blocks::is_blocked(ctx.pool, recipient_id, sender_id).await {
        Ok(true) => return Ok(HandlerOutcome::just(error_response(&envelope.msg_type, ErrorKind::Blocked))),
        Ok(false) => {}
        Err(_) => return Ok(HandlerOutcome::just(error_response(&envelope.msg_type, ErrorKind::Io))),
    }

    let message_id = storage::messages::save_direct_message(
        ctx.pool,
        sender_id,
        recipient_id,
        content,
        content_type,
        encrypted,
    )
    .await
    .map_err(|_| fail(ErrorKind::Io))?;

    let mut extra = serde_json::Map::new();
    extra.insert("message_id".to_owned(), serde_json::json!(message_id));
    extra.insert("recipient".to_owned(), serde_json::json!(recipient));
    let response = Envelope::response(&envelope.msg_type, true, None, extra, now_iso8601());

    let forwarded = Envelope::forward(envelope.clone(), sender_username);
    Ok(HandlerOutcome::with_fanout(response, vec![(recipient.to_owned(), forwarded)]))
}

/// Auto-creates the group and auto-joins the sender into it if either is
/// missing, per §4.E's liberal policy — unlike `join_group`, this never
/// rejects with `already_member`.
pub async fn handle_group_message(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let sender_id = ctx.require_auth().map_err(fail)?;
    let sender_username = ctx.username().await.ok_or_else(|| fail(ErrorKind::Unauthorized))?;

    let group_id = envelope.group_id.as_deref().ok_or_else(|| fail(ErrorKind::ProtocolMalformed))?;
    let (content, encrypted) = content_and_encrypted(envelope).map_err(fail)?;
    let content_type = envelope
        .data
        .as_ref()
        .map(|d| d.content_type.as_str())
        .unwrap_or("text");

    let group_name = super::optional_str(envelope, "group_name").unwrap_or(group_id);
    let (group, _created) = groups::get_or_create_group(ctx.pool, group_id, group_name, sender_id)
        .await
        .map_err(|_| fail(ErrorKind::Io))?;

    if !groups::is_member(ctx.pool, &group.group_id, sender_id).await.map_err(|_| fail(ErrorKind::Io))? {
        groups::join_member(ctx.pool, &group.group_id, sender_id)
            .await
            .map_err(|_| fail(ErrorKind::Io))?;
    }

    let message_id = storage::messages::save_group_message(
        ctx.pool,
        &group.group_id,
        sender_id,
        content,
        content_type,
        encrypted,
    )
    .await
    .map_err(|_| fail(ErrorKind::Io))?;

    let members = groups::list_members(ctx.pool, &group.group_id).await.map_err(|_| fail(ErrorKind::Io))?;
    let forwarded = Envelope::forward(envelope.clone(), sender_username.clone());
    let fanout = members
        .into_iter()
        .filter(|m| m.username != sender_username)
        .map(|m| (m.username, forwarded.clone()))
        .collect();

    let mut extra = serde_json::Map::new();
    extra.insert("message_id".to_owned(), serde_json::json!(message_id));
    extra.insert("group_id".to_owned(), serde_json::json!(group.group_id));
    let response = Envelope::response(tags::GROUP_MESSAGE, true, None, extra, now_iso8601());

    Ok(HandlerOutcome::with_fanout(response, fanout))
}
