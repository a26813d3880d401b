use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::groups;

use super::{error_response, error_response_with_message, fail, now_iso8601, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

pub async fn create_group(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let user_id = ctx.require_auth().map_err(fail)?;
    let group_id = required_str(envelope, "group_id").map_err(fail)?;
    let group_name = super::optional_str(envelope, "group_name").unwrap_or(group_id);

    let (group, created) = groups::get_or_create_group(ctx.pool, group_id, group_name, user_id)
        .await
        .map_err(|_| fail(ErrorKind::Io))?;

    let mut extra = serde_json::Map::new();
    extra.insert("group_id".to_owned(), serde_json::json!(group.group_id));
    extra.insert("created".to_owned(), serde_json::json!(created));
    Ok(HandlerOutcome::just(Envelope::response(
        tags::CREATE_GROUP,
        true,
        None,
        extra,
        now_iso8601(),
    )))
}

pub async fn join_group(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let user_id = ctx.require_auth().map_err(fail)?;
    let group_id = required_str(envelope, "group_id").map_err(fail)?;

    if !groups::group_exists(ctx.pool, group_id).await.map_err(|_| fail(ErrorKind::Io))? {
        return Ok(HandlerOutcome::just(error_response(tags::JOIN_GROUP, ErrorKind::Constraint)));
    }

    let inserted = groups::join_member(ctx.pool, group_id, user_id).await.map_err(|_| fail(ErrorKind::Io))?;
    if !inserted {
        // §4.E requires the literal text `already_member`, not the generic
        // conflict kind code.
        return Ok(HandlerOutcome::just(error_response_with_message(tags::JOIN_GROUP, ErrorKind::Conflict, "already_member")));
    }

    let mut extra = serde_json::Map::new();
    extra.insert("group_id".to_owned(), serde_json::json!(group_id));
    Ok(HandlerOutcome::just(Envelope::response(
        tags::JOIN_GROUP,
        true,
        None,
        extra,
        now_iso8601(),
    )))
}

pub async fn get_groups(ctx: &HandlerCtx<'_>, _envelope: &Envelope) -> HandlerResult {
    let user_id = ctx.require_auth().map_err(fail)?;
    let rows = groups::list_groups_for_user(ctx.pool, user_id).await.map_err(|_| fail(ErrorKind::Io))?;

    let groups_json: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(group, role, member_count)| {
            serde_json::json!({
                "group_id": group.group_id,
                "group_name": group.group_name,
                "role": role,
                "member_count": member_count,
            })
        })
        .collect();

    let mut extra = serde_json::Map::new();
    extra.insert("groups".to_owned(), serde_json::Value::Array(groups_json));
    Ok(HandlerOutcome::just(Envelope::response(
        tags::GET_GROUPS,
        true,
        None,
        extra,
        now_iso8601(),
    )))
}
