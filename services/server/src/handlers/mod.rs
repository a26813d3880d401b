//! Per-tag message handlers (§4.E). Each handler receives the parsed
//! envelope and a [`HandlerCtx`] borrowing the shared pool, directory and
//! config, and returns a [`HandlerOutcome`]: the response envelope destined
//! back to the sender plus a fan-out plan of envelopes to deliver to other
//! online sessions.

mod auth;
mod blocks;
mod contacts;
mod directory_lookup;
mod groups;
mod messaging;
mod misc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use sqlx::PgPool;

use msg_protocol::{tags, Envelope, ErrorKind};

use crate::config::Config;
use crate::directory::{ConnectionHandle, ConnectionId, Directory};

pub fn now_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub struct HandlerCtx<'a> {
    pub pool: &'a PgPool,
    pub directory: &'a Directory,
    pub config: &'a Config,
    pub connection_id: ConnectionId,
    pub conn: &'a ConnectionHandle,
}

impl HandlerCtx<'_> {
    pub fn user_id(&self) -> Option<i64> {
        self.conn.user_id()
    }

    pub async fn username(&self) -> Option<String> {
        self.conn.username.read().await.clone()
    }

    /// `Ok` only when the connection has completed `login`/`register`.
    pub fn require_auth(&self) -> Result<i64, ErrorKind> {
        self.user_id().ok_or(ErrorKind::Unauthorized)
    }
}

pub struct HandlerOutcome {
    pub response: Envelope,
    pub fanout: Vec<(String, Envelope)>,
}

impl HandlerOutcome {
    pub fn just(response: Envelope) -> Self {
        Self { response, fanout: Vec::new() }
    }

    pub fn with_fanout(response: Envelope, fanout: Vec<(String, Envelope)>) -> Self {
        Self { response, fanout }
    }
}

pub fn error_response(request_tag: &str, kind: ErrorKind) -> Envelope {
    error_response_with_message(request_tag, kind, kind.to_string())
}

/// Same as [`error_response`], but with a caller-supplied human-readable
/// `message` instead of the generic `ErrorKind` code string — for domain
/// errors whose own `Display` is the wire-contract text (e.g.
/// `AuthError::UsernameTaken`'s `"username exists"`, §4.C/§8.2).
pub fn error_response_with_message(request_tag: &str, kind: ErrorKind, message: impl Into<String>) -> Envelope {
    let mut extra = serde_json::Map::new();
    extra.insert("error".to_owned(), serde_json::Value::String(kind.code().to_owned()));
    Envelope::response(request_tag, false, Some(message.into()), extra, now_iso8601())
}

/// Pulls a required string field out of an envelope's `metadata` object.
pub fn required_str<'a>(envelope: &'a Envelope, field: &str) -> Result<&'a str, ErrorKind> {
    envelope
        .metadata_field(field)
        .and_then(|v| v.as_str())
        .ok_or(ErrorKind::ProtocolMalformed)
}

pub fn optional_str<'a>(envelope: &'a Envelope, field: &str) -> Option<&'a str> {
    envelope.metadata_field(field).and_then(|v| v.as_str())
}

pub fn optional_bool(envelope: &Envelope, field: &str) -> Option<bool> {
    envelope.metadata_field(field).and_then(|v| v.as_bool())
}

pub fn optional_i64(envelope: &Envelope, field: &str) -> Option<i64> {
    envelope.metadata_field(field).and_then(|v| v.as_i64())
}

/// Envelope-level checks from §4.A that apply uniformly regardless of tag:
/// a present `data.content` must be valid base64, and a present
/// `data.signature` must be valid hex (the only shape of "signature
/// verify failure" this revision can check without a key-exchange
/// protocol to source the verifying key from — see DESIGN.md).
fn validate_envelope(envelope: &Envelope) -> Result<(), ErrorKind> {
    if let Some(data) = &envelope.data {
        if BASE64.decode(&data.content).is_err() {
            return Err(ErrorKind::ProtocolMalformed);
        }
        if let Some(signature) = &data.signature {
            if hex::decode(signature).is_err() {
                return Err(ErrorKind::ProtocolMalformed);
            }
        }
    }
    Ok(())
}

/// Dispatches a fully-decoded envelope to its handler. The router is
/// responsible for the pre-authentication gate (`tags::PRE_AUTH_ALLOWED`);
/// by the time a tag reaches here it is either in that allow-list or the
/// connection is already authenticated.
pub async fn dispatch(ctx: &HandlerCtx<'_>, envelope: Envelope) -> HandlerOutcome {
    let request_tag = envelope.msg_type.clone();
    if let Err(kind) = validate_envelope(&envelope) {
        return HandlerOutcome::just(error_response(&tags::response_tag(&request_tag), kind));
    }
    let result = match request_tag.as_str() {
        tags::REGISTER => auth::register(ctx, &envelope).await,
        tags::LOGIN => auth::login(ctx, &envelope).await,
        tags::LOGOUT => auth::logout(ctx, &envelope).await,

        tags::TEXT_MESSAGE | tags::MESSAGE => messaging::handle_direct_message(ctx, &envelope, "text").await,
        tags::VOICE | tags::VOICE_MESSAGE => messaging::handle_direct_message(ctx, &envelope, "voice").await,
        tags::FILE => messaging::handle_direct_message(ctx, &envelope, "file").await,
        tags::PICTURE => messaging::handle_direct_message(ctx, &envelope, "picture").await,
        tags::STEGO_MESSAGE => messaging::handle_direct_message(ctx, &envelope, "stego").await,
        tags::GROUP_MESSAGE => messaging::handle_group_message(ctx, &envelope).await,

        tags::CREATE_GROUP => groups::create_group(ctx, &envelope).await,
        tags::JOIN_GROUP => groups::join_group(ctx, &envelope).await,
        tags::GET_GROUPS => groups::get_groups(ctx, &envelope).await,

        tags::ADD_CONTACT => contacts::add_contact(ctx, &envelope).await,
        tags::GET_CONTACTS => contacts::get_contacts(ctx, &envelope).await,
        tags::UPDATE_CONTACT => contacts::update_contact(ctx, &envelope).await,
        tags::REMOVE_CONTACT => contacts::remove_contact(ctx, &envelope).await,

        tags::GET_DIRECTORY => directory_lookup::get_directory(ctx, &envelope).await,
        tags::GET_PUBLIC_KEY => directory_lookup::get_public_key(ctx, &envelope).await,
        tags::GET_HISTORY => directory_lookup::get_history(ctx, &envelope).await,

        tags::ALIVE | tags::HEARTBEAT => misc::heartbeat(ctx, &envelope).await,
        tags::BACKUP => misc::backup(ctx, &envelope).await,
        tags::BLOCK_USER => blocks::block_user(ctx, &envelope).await,
        tags::UNBLOCK_USER => blocks::unblock_user(ctx, &envelope).await,

        other => Err((ErrorKind::ProtocolMalformed, Some(other.to_owned()))),
    };

    match result {
        Ok(outcome) => outcome,
        Err((kind, unknown_tag)) => {
            let response_tag = unknown_tag
                .map(|_| tags::ERROR.to_owned())
                .unwrap_or_else(|| tags::response_tag(&request_tag));
            HandlerOutcome::just(error_response(&response_tag, kind))
        }
    }
}

pub(crate) type HandlerResult = Result<HandlerOutcome, (ErrorKind, Option<String>)>;

pub(crate) fn fail(kind: ErrorKind) -> (ErrorKind, Option<String>) {
    (kind, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_protocol::{Encryption, MessageData};

    fn envelope_with_data(content: &str, signature: Option<&str>) -> Envelope {
        let mut env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        env.data = Some(MessageData {
            content: content.to_owned(),
            content_type: "text".to_owned(),
            encryption: Encryption::None,
            signature: signature.map(str::to_owned),
            file_info: None,
            voice_params: None,
        });
        env
    }

    #[test]
    fn validate_envelope_rejects_non_base64_content() {
        let env = envelope_with_data("not base64!!", None);
        assert_eq!(validate_envelope(&env), Err(ErrorKind::ProtocolMalformed));
    }

    #[test]
    fn validate_envelope_rejects_non_hex_signature() {
        let env = envelope_with_data("aGk=", Some("not hex"));
        assert_eq!(validate_envelope(&env), Err(ErrorKind::ProtocolMalformed));
    }

    #[test]
    fn validate_envelope_accepts_well_formed_content_and_signature() {
        let env = envelope_with_data("aGk=", Some("deadbeef"));
        assert!(validate_envelope(&env).is_ok());
    }

    #[test]
    fn validate_envelope_accepts_envelopes_with_no_data() {
        let env = Envelope::new(tags::HEARTBEAT, "2026-07-28T00:00:00Z");
        assert!(validate_envelope(&env).is_ok());
    }
}
