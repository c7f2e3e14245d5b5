//! Context token codec
//!
//! A context token is base64 over a small JSON object carrying at least
//! `sessionId` plus optional attribution parameters. Outbound messages embed
//! it; inbound replies hand it back.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use clickpath_common::Attributes;
use serde_json::{Map, Value};

/// Decoded context token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextToken {
    pub session_id: String,
    pub attributes: Attributes,
}

/// Decode a raw token; `None` for anything malformed or without a session id
pub fn decode(raw: &str) -> Option<ContextToken> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let bytes = [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(raw).ok())?;

    let object: Map<String, Value> = match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => map,
        _ => return None,
    };

    let session_id = ["sessionId", "session_id"]
        .iter()
        .filter_map(|k| object.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())?
        .to_string();

    Some(ContextToken {
        session_id,
        attributes: Attributes::from_params(&object),
    })
}

/// Encode a token for embedding in an outbound message
pub fn encode(session_id: &str, attributes: &Attributes) -> String {
    let payload = serde_json::json!({
        "sessionId": session_id,
        "source": attributes.source,
        "medium": attributes.medium,
        "campaign": attributes.campaign,
        "content": attributes.content,
        "placement": attributes.placement,
    });
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_decode() {
        let mut attrs = Attributes::default();
        attrs.source = "fb".to_string();
        let token = encode("abc123", &attrs);

        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.session_id, "abc123");
        assert_eq!(decoded.attributes.source, "fb");
    }

    #[test]
    fn test_decodes_padded_standard_base64() {
        let token = STANDARD.encode(r#"{"sessionId":"s-1","utm_campaign":"spring"}"#);
        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.session_id, "s-1");
        assert_eq!(decoded.attributes.campaign, "spring");
        assert_eq!(decoded.attributes.source, "direct");
    }

    #[test]
    fn test_malformed_tokens_are_none() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("%%%not-base64%%%"), None);
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode("not json")), None);
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode("[1,2]")), None);
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode(r#"{"source":"fb"}"#)), None);
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode(r#"{"sessionId":"  "}"#)), None);
        assert_eq!(decode(&URL_SAFE_NO_PAD.encode(r#"{"sessionId":7}"#)), None);
    }
}
