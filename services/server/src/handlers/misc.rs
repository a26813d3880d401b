use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::{backups, sessions, users};

use super::{fail, now_iso8601, optional_i64, optional_str, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

/// Liveness ping (§4.E `alive`/`heartbeat`). Bumps `last_activity` on both
/// the live connection and the persistent `users` row, and refreshes the
/// session's `last_activity` column too, so idle-TTL expiry (§4.G) and the
/// directory's own presence pruning stay in sync. If the client carries an
/// endpoint hint (`metadata.port`, for the rare case its own listening port
/// differs from the source port seen on `conn`), the directory's endpoint
/// table is refreshed so peers who want to bypass the server for direct
/// transport have a current address to try.
pub async fn heartbeat(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    ctx.conn.touch();
    if let Some(token) = ctx.conn.session_token.read().await.clone() {
        let _ = sessions::touch_session(ctx.pool, &token).await;
    }
    if let Some(user_id) = ctx.user_id() {
        match optional_i64(envelope, "port").and_then(|p| u16::try_from(p).ok()) {
            Some(port) => {
                ctx.directory.update_endpoint_hint(user_id, ctx.conn.remote_addr, port).await;
                let _ = users::update_last_seen_network(ctx.pool, user_id, &ctx.conn.remote_addr.to_string(), i32::from(port)).await;
            }
            None => {
                let _ = users::update_last_activity(ctx.pool, user_id).await;
            }
        }
    }
    Ok(HandlerOutcome::just(Envelope::response(
        &envelope.msg_type,
        true,
        None,
        serde_json::Map::new(),
        now_iso8601(),
    )))
}

pub async fn backup(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let user_id = ctx.require_auth().map_err(fail)?;
    let dest_id = required_str(envelope, "dest_id").map_err(fail)?;
    let payload = required_str(envelope, "payload").map_err(fail)?;
    let content_type = optional_str(envelope, "content_type");

    let backup_id = backups::save_backup(ctx.pool, user_id, dest_id, payload, content_type)
        .await
        .map_err(|_| fail(ErrorKind::Io))?;

    let mut extra = serde_json::Map::new();
    extra.insert("backup_id".to_owned(), serde_json::json!(backup_id));
    Ok(HandlerOutcome::just(Envelope::response(tags::BACKUP, true, None, extra, now_iso8601())))
}
