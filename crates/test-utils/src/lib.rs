//! Shared test utilities for driving a running chat server end to end:
//! a WebSocket client plus small helpers for building well-formed
//! envelopes without repeating boilerplate in every integration test.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;

use msg_protocol::{tags, Encryption, Envelope, MessageData};

pub fn now_iso8601() -> String {
    "2026-07-28T00:00:00Z".to_owned()
}

pub fn register_envelope(username: &str, password: &str, email: &str) -> Envelope {
    let mut env = Envelope::new(tags::REGISTER, now_iso8601());
    env.metadata = Some(serde_json::json!({
        "username": username,
        "password": password,
        "email": email,
    }));
    env
}

pub fn login_envelope(username: &str, password: &str) -> Envelope {
    let mut env = Envelope::new(tags::LOGIN, now_iso8601());
    env.metadata = Some(serde_json::json!({
        "username": username,
        "password": password,
    }));
    env
}

pub fn text_message_envelope(sender: &str, recipient: &str, plaintext: &str) -> Envelope {
    let mut env = Envelope::new(tags::TEXT_MESSAGE, now_iso8601());
    env.sender = Some(sender.to_owned());
    env.recipient = Some(recipient.to_owned());
    env.data = Some(MessageData {
        content: base64_encode(plaintext.as_bytes()),
        content_type: "text".to_owned(),
        encryption: Encryption::None,
        signature: None,
        file_info: None,
        voice_params: None,
    });
    env
}

/// Minimal base64 encoder so this crate doesn't need its own `base64`
/// dependency purely for test fixture construction.
pub fn base64_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4)) as usize] as char);
        if let Some(b1) = b1 {
            out.push(ALPHABET[(((b1 & 0x0f) << 2) | (b2.unwrap_or(0) >> 6)) as usize] as char);
        } else {
            out.push('=');
        }
        if let Some(b2) = b2 {
            out.push(ALPHABET[(b2 & 0x3f) as usize] as char);
        } else {
            out.push('=');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_envelope_carries_credentials_in_metadata() {
        let env = register_envelope("alice", "pw12345678", "a@x");
        assert_eq!(env.msg_type, tags::REGISTER);
        assert_eq!(
            env.metadata_field("username"),
            Some(&serde_json::json!("alice"))
        );
    }

    #[test]
    fn text_message_envelope_base64_encodes_content() {
        let env = text_message_envelope("alice", "bob", "hi");
        let data = env.data.expect("data present");
        assert_eq!(data.content, "aGk=");
        assert_eq!(env.recipient.as_deref(), Some("bob"));
    }
}
