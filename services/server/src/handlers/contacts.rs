use msg_protocol::{tags, Envelope, ErrorKind};

use crate::storage::{self, contacts, StorageError};

use super::{error_response, fail, now_iso8601, optional_bool, optional_str, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

fn contact_json(row: &contacts::ContactRow) -> serde_json::Value {
    serde_json::json!({
        "user_id": row.contact_user_id,
        "username": row.contact_username,
        "alias": row.alias,
        "group_label": row.group_label,
        "notes": row.notes,
        "favorite": row.favorite,
    })
}

pub async fn add_contact(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;
    let alias = optional_str(envelope, "alias");
    let group_label = optional_str(envelope, "group_label").unwrap_or("default");
    let notes = optional_str(envelope, "notes");

    let contact_id = match storage::resolve_user_ref(ctx.pool, target).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(tags::ADD_CONTACT, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::ADD_CONTACT, ErrorKind::Io))),
    };

    match contacts::add_contact(ctx.pool, owner_id, contact_id, alias, group_label, notes).await {
        Ok(row) => {
            let mut extra = serde_json::Map::new();
            extra.insert("contact".to_owned(), contact_json(&row));
            Ok(HandlerOutcome::just(Envelope::response(tags::ADD_CONTACT, true, None, extra, now_iso8601())))
        }
        Err(StorageError::Constraint) => Ok(HandlerOutcome::just(error_response(tags::ADD_CONTACT, ErrorKind::Constraint))),
        Err(StorageError::Conflict) => Ok(HandlerOutcome::just(error_response(tags::ADD_CONTACT, ErrorKind::Conflict))),
        Err(_) => Ok(HandlerOutcome::just(error_response(tags::ADD_CONTACT, ErrorKind::Io))),
    }
}

pub async fn get_contacts(ctx: &HandlerCtx<'_>, _envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let rows = contacts::list_contacts(ctx.pool, owner_id).await.map_err(|_| fail(ErrorKind::Io))?;
    let contacts_json: Vec<serde_json::Value> = rows.iter().map(contact_json).collect();

    let mut extra = serde_json::Map::new();
    extra.insert("contacts".to_owned(), serde_json::Value::Array(contacts_json));
    Ok(HandlerOutcome::just(Envelope::response(tags::GET_CONTACTS, true, None, extra, now_iso8601())))
}

pub async fn update_contact(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;
    let alias = optional_str(envelope, "alias");
    let group_label = optional_str(envelope, "group_label");
    let notes = optional_str(envelope, "notes");
    let favorite = optional_bool(envelope, "favorite");

    let contact_id = match storage::resolve_user_ref(ctx.pool, target).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(tags::UPDATE_CONTACT, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::UPDATE_CONTACT, ErrorKind::Io))),
    };

    match contacts::update_contact(ctx.pool, owner_id, contact_id, alias, group_label, notes, favorite).await {
        Ok(row) => {
            let mut extra = serde_json::Map::new();
            extra.insert("contact".to_owned(), contact_json(&row));
            Ok(HandlerOutcome::just(Envelope::response(tags::UPDATE_CONTACT, true, None, extra, now_iso8601())))
        }
        Err(StorageError::NotFound) => Ok(HandlerOutcome::just(error_response(tags::UPDATE_CONTACT, ErrorKind::Constraint))),
        Err(_) => Ok(HandlerOutcome::just(error_response(tags::UPDATE_CONTACT, ErrorKind::Io))),
    }
}

pub async fn remove_contact(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let owner_id = ctx.require_auth().map_err(fail)?;
    let target = required_str(envelope, "username").map_err(fail)?;

    let contact_id = match storage::resolve_user_ref(ctx.pool, target).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(HandlerOutcome::just(error_response(tags::REMOVE_CONTACT, ErrorKind::RecipientNotFound))),
        Err(_) => return Ok(HandlerOutcome::just(error_response(tags::REMOVE_CONTACT, ErrorKind::Io))),
    };

    match contacts::remove_contact(ctx.pool, owner_id, contact_id).await {
        Ok(()) => Ok(HandlerOutcome::just(Envelope::response(
            tags::REMOVE_CONTACT,
            true,
            None,
            serde_json::Map::new(),
            now_iso8601(),
        ))),
        Err(StorageError::NotFound) => Ok(HandlerOutcome::just(error_response(tags::REMOVE_CONTACT, ErrorKind::Constraint))),
        Err(_) => Ok(HandlerOutcome::just(error_response(tags::REMOVE_CONTACT, ErrorKind::Io))),
    }
}
