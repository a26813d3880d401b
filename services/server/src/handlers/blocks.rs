use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::{self, blocks, StorageError};

use super::{error_response, fail, now_iso8601, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

pub async fn block_user(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;

    let target_id = match storage::resolve_user_ref(ctx.pool, target).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(tags::BLOCK_USER, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::BLOCK_USER, ErrorKind::Io))),
    };

    match blocks::block_user(ctx.pool, owner_id, target_id).await {
        Ok(()) => Ok(HandlerOutcome::just(Envelope::response(
            tags::BLOCK_USER,
            true,
            None,
            serde_json::Map::new(),
            now_iso8601(),
        ))),
        Err(StorageError::Constraint) => Ok(HandlerOutcome::just(error_response(tags::BLOCK_USER, ErrorKind::Constraint))),
        Err(_) => Ok(HandlerOutcome::just(error_response(tags::BLOCK_USER, ErrorKind::Io))),
    }
}

pub async fn unblock_user(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;

    let target_id = match storage::resolve_user_ref(ctx.pool, target).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(tags::UNBLOCK_USER, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::UNBLOCK_USER, ErrorKind::Io))),
    };

    blocks::unblock_user(ctx.pool, owner_id, target_id).await.map_err(|_| fail(ErrorKind::Io))?;
    Ok(HandlerOutcome::just(Envelope::response(
        tags::UNBLOCK_USER,
        true,
        None,
        serde_json::Map::new(),
        now_iso8601(),
    )))
}
