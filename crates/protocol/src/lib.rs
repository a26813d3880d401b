//! Wire protocol for the chat session router: the JSON envelope exchanged
//! over the transport, its payload substructures, and the length-prefixed
//! frame codec that wraps each envelope for transmission.

use serde::{Deserialize, Serialize};

/// String constants for the authoritative tag set, plus the handful of
/// server-originated tags that aren't `<request_tag>_response`.
pub mod tags {
    pub const REGISTER: &str = "register";
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";
    pub const GET_DIRECTORY: &str = "get_directory";
    pub const GET_HISTORY: &str = "get_history";
    pub const GET_PUBLIC_KEY: &str = "get_public_key";
    pub const ALIVE: &str = "alive";
    pub const BACKUP: &str = "backup";
    pub const MESSAGE: &str = "message";
    pub const VOICE: &str = "voice";
    pub const FILE: &str = "file";
    pub const PICTURE: &str = "picture";
    pub const TEXT_MESSAGE: &str = "text_message";
    pub const GROUP_MESSAGE: &str = "group_message";
    pub const STEGO_MESSAGE: &str = "stego_message";
    pub const VOICE_MESSAGE: &str = "voice_message";
    pub const CREATE_GROUP: &str = "create_group";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ADD_CONTACT: &str = "add_contact";
    pub const GET_CONTACTS: &str = "get_contacts";
    pub const UPDATE_CONTACT: &str = "update_contact";
    pub const REMOVE_CONTACT: &str = "remove_contact";
    pub const GET_GROUPS: &str = "get_groups";
    pub const JOIN_GROUP: &str = "join_group";
    pub const BLOCK_USER: &str = "block_user";
    pub const UNBLOCK_USER: &str = "unblock_user";

    pub const HISTORY_RESPONSE: &str = "history_response";
    pub const DIRECTORY_RESPONSE: &str = "directory_response";
    pub const PUBLIC_KEY_RESPONSE: &str = "public_key_response";
    pub const ERROR: &str = "error";
    pub const SYSTEM_NOTIFICATION: &str = "system_notification";
    pub const FORWARDED_MESSAGE: &str = "forwarded_message";

    /// Tags not in this list follow the uniform `<tag>_response` convention;
    /// build those with [`response_tag`].
    pub fn response_tag(request_tag: &str) -> String {
        format!("{request_tag}_response")
    }

    /// Tags accepted on a connection before it has completed authentication.
    pub const PRE_AUTH_ALLOWED: &[&str] = &[REGISTER, LOGIN, HEARTBEAT, ALIVE];
}

/// `data.encryption` discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None,
    AesGcm,
    Rsa,
    Hybrid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub duration_ms: u32,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

/// The `data` substructure: an opaque content-bearing payload plus the
/// metadata a handler needs to persist and forward it unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Base64-encoded payload bytes. The server never decodes this further
    /// than validating it is well-formed base64.
    pub content: String,
    pub content_type: String,
    pub encryption: Encryption,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_params: Option<VoiceParams>,
}

/// The single wire shape every message takes: a tag, a timestamp, optional
/// routing fields, an optional content payload, and a free-form
/// tag-specific `metadata` object.
///
/// `metadata` is `serde_json::Value` rather than a per-tag struct because
/// the tag set is large and most tags only need a handful of scalar
/// fields; handlers pull what they need out of it with
/// [`Envelope::metadata_field`] or by deserializing into a local struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            timestamp: timestamp.into(),
            sender: None,
            recipient: None,
            group_id: None,
            data: None,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>, timestamp: impl Into<String>) -> Self {
        let mut env = Self::new(tags::ERROR, timestamp);
        env.metadata = Some(serde_json::json!({ "message": message.into() }));
        env
    }

    pub fn system_notification(
        message: impl Into<String>,
        server_version: &str,
        connection_id: &str,
        timestamp: impl Into<String>,
    ) -> Self {
        let mut env = Self::new(tags::SYSTEM_NOTIFICATION, timestamp);
        env.metadata = Some(serde_json::json!({
            "message": message.into(),
            "server_version": server_version,
            "connection_id": connection_id,
        }));
        env
    }

    /// Builds a `<tag>_response` envelope carrying `success`, an optional
    /// human-readable `message`, and whatever extra fields the handler adds.
    pub fn response(
        request_tag: &str,
        success: bool,
        message: Option<String>,
        extra: serde_json::Map<String, serde_json::Value>,
        timestamp: impl Into<String>,
    ) -> Self {
        let mut fields = extra;
        fields.insert("success".to_owned(), serde_json::Value::Bool(success));
        if let Some(message) = message {
            fields.insert("message".to_owned(), serde_json::Value::String(message));
        }
        let mut env = Self::new(tags::response_tag(request_tag), timestamp);
        env.metadata = Some(serde_json::Value::Object(fields));
        env
    }

    /// Wraps `original` as a `forwarded_message`-flavored envelope: same
    /// tag and payload, `from_server` recorded in metadata, `sender` set.
    pub fn forward(mut original: Envelope, from_username: impl Into<String>) -> Self {
        original.sender = Some(from_username.into());
        let mut metadata = match original.metadata.take() {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("from_server".to_owned(), serde_json::Value::Bool(true));
        original.metadata = Some(serde_json::Value::Object(metadata));
        original
    }

    pub fn metadata_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref()?.as_object()?.get(key)
    }

    /// Attaches a metadata object to a server-originated envelope (e.g. a
    /// `*_response` built directly rather than through [`Envelope::response`]).
    pub fn with_metadata(mut self, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(serde_json::Value::Object(fields));
        self
    }
}

/// Propagation-level error kinds from the error handling design: these are
/// the categories a handler or router stage classifies a failure into
/// before deciding how to respond to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("protocol_malformed")]
    ProtocolMalformed,
    #[error("payload_too_large")]
    PayloadTooLarge,
    #[error("unauthorized")]
    Unauthorized,
    #[error("recipient_not_found")]
    RecipientNotFound,
    #[error("blocked")]
    Blocked,
    #[error("conflict")]
    Conflict,
    #[error("constraint")]
    Constraint,
    #[error("quota")]
    Quota,
    #[error("io")]
    Io,
    #[error("internal")]
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ProtocolMalformed => "protocol_malformed",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RecipientNotFound => "recipient_not_found",
            ErrorKind::Blocked => "blocked",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Quota => "quota",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Length-prefixed transport framing: `len_be32 ∥ tag4 ∥ body`.
pub mod frame {
    use super::Envelope;
    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    /// Payloads at or below this size are never compressed, matching the
    /// "only when payload > 1 KiB" rule.
    pub const COMPRESSION_THRESHOLD: usize = 1024;
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

    const TAG_NONE: &[u8; 4] = b"NONE";
    const TAG_COMP: &[u8; 4] = b"COMP";

    #[derive(Debug, thiserror::Error)]
    pub enum FrameError {
        #[error("frame of {0} bytes exceeds the configured ceiling of {1} bytes")]
        TooLarge(usize, usize),
        #[error("frame body shorter than its length prefix declared")]
        Truncated,
        #[error("unrecognized compression tag {0:?}")]
        UnknownTag([u8; 4]),
        #[error("zlib decompression failed: {0}")]
        Decompress(#[source] std::io::Error),
        #[error("zlib compression failed: {0}")]
        Compress(#[source] std::io::Error),
        #[error("envelope is not valid JSON: {0}")]
        Json(#[from] serde_json::Error),
    }

    /// Encodes an envelope into a `len_be32 ∥ tag4 ∥ body` frame body
    /// (the part after the outer transport's own framing, if any). Applies
    /// zlib compression only when it is worthwhile: payload bigger than
    /// [`COMPRESSION_THRESHOLD`] and the compressed form is smaller.
    pub fn encode(envelope: &Envelope, max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
        let json = serde_json::to_vec(envelope)?;

        let (tag, body) = if json.len() > COMPRESSION_THRESHOLD {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json).map_err(FrameError::Compress)?;
            let compressed = encoder.finish().map_err(FrameError::Compress)?;
            if compressed.len() < json.len() {
                (*TAG_COMP, compressed)
            } else {
                (*TAG_NONE, json)
            }
        } else {
            (*TAG_NONE, json)
        };

        let total = 4 + body.len();
        if total > max_frame_size {
            return Err(FrameError::TooLarge(total, max_frame_size));
        }

        let mut frame = Vec::with_capacity(4 + 4 + body.len());
        frame.extend_from_slice(&(4 + body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes a complete frame (length prefix already consumed by the
    /// caller, `body` is the `tag4 ∥ payload` that followed it).
    pub fn decode_body(body: &[u8]) -> Result<Envelope, FrameError> {
        if body.len() < 4 {
            return Err(FrameError::Truncated);
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&body[..4]);
        let payload = &body[4..];

        let json = if &tag == TAG_NONE {
            payload.to_vec()
        } else if &tag == TAG_COMP {
            let mut decoder = ZlibDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(FrameError::Decompress)?;
            out
        } else {
            return Err(FrameError::UnknownTag(tag));
        };

        Ok(serde_json::from_slice(&json)?)
    }

    /// Reads the 4-byte big-endian length prefix from the front of `buf`.
    pub fn read_length_prefix(buf: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        let mut env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        env.sender = Some("alice".to_owned());
        env.recipient = Some("bob".to_owned());
        env.data = Some(MessageData {
            content: "aGk=".to_owned(),
            content_type: "text".to_owned(),
            encryption: Encryption::None,
            signature: None,
            file_info: None,
            voice_params: None,
        });
        env
    }

    #[test]
    fn envelope_round_trips_through_json_with_type_tag() {
        let env = sample_envelope();
        let json = serde_json::to_string(&env).expect("serialize");
        assert!(json.contains("\"type\":\"text_message\""));
        let parsed: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, env);
    }

    #[test]
    fn response_envelope_carries_success_and_extra_fields() {
        let mut extra = serde_json::Map::new();
        extra.insert("user_id".to_owned(), serde_json::json!(1));
        let env = Envelope::response(
            tags::REGISTER,
            true,
            None,
            extra,
            "2026-07-28T00:00:00Z",
        );
        assert_eq!(env.msg_type, "register_response");
        assert_eq!(env.metadata_field("success"), Some(&serde_json::json!(true)));
        assert_eq!(env.metadata_field("user_id"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn forward_sets_sender_and_from_server_flag() {
        let original = sample_envelope();
        let forwarded = Envelope::forward(original, "alice");
        assert_eq!(forwarded.sender.as_deref(), Some("alice"));
        assert_eq!(
            forwarded.metadata_field("from_server"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn frame_round_trip_uses_none_tag_for_small_payloads() {
        let env = sample_envelope();
        let encoded = frame::encode(&env, frame::DEFAULT_MAX_FRAME_SIZE).expect("encode");
        let len = u32::from_be_bytes(encoded[0..4].try_into().unwrap());
        assert_eq!(len as usize, encoded.len() - 4);
        assert_eq!(&encoded[4..8], b"NONE");
        let decoded = frame::decode_body(&encoded[4..]).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn frame_round_trip_compresses_large_repetitive_payloads() {
        let mut env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        env.data = Some(MessageData {
            content: "A".repeat(4096),
            content_type: "text".to_owned(),
            encryption: Encryption::None,
            signature: None,
            file_info: None,
            voice_params: None,
        });
        let encoded = frame::encode(&env, frame::DEFAULT_MAX_FRAME_SIZE).expect("encode");
        assert_eq!(&encoded[4..8], b"COMP");
        let decoded = frame::decode_body(&encoded[4..]).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn frame_encode_rejects_frames_over_the_ceiling() {
        let mut env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        env.data = Some(MessageData {
            content: "A".repeat(200),
            content_type: "text".to_owned(),
            encryption: Encryption::None,
            signature: None,
            file_info: None,
            voice_params: None,
        });
        let err = frame::encode(&env, 16).expect_err("should exceed tiny ceiling");
        assert!(matches!(err, frame::FrameError::TooLarge(_, 16)));
    }

    #[test]
    fn decode_body_rejects_unknown_compression_tag() {
        let mut body = Vec::new();
        body.extend_from_slice(b"ZZZZ");
        body.extend_from_slice(b"{}");
        let err = frame::decode_body(&body).expect_err("unknown tag");
        assert!(matches!(err, frame::FrameError::UnknownTag(_)));
    }
}
