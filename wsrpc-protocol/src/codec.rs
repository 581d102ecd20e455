//! Encoder and decoder for JSON-RPC envelopes.
//!
//! Buffers are length-delimited `Bytes`; nothing here relies on a terminator.

use crate::error::ProtocolError;
use crate::message::{Notification, Request, Response};
use crate::JSONRPC_VERSION;
use bytes::Bytes;

/// Decodes reassembled payloads into requests.
pub struct Decoder;

impl Decoder {
    /// Decodes and validates a request envelope.
    ///
    /// Any error here means the message must be dropped without a response.
    pub fn decode_request(payload: &[u8]) -> Result<Request, ProtocolError> {
        let request: Request = serde_json::from_slice(payload)?;

        if request.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::InvalidEnvelope("jsonrpc version must be \"2.0\""));
        }
        if request.method.is_empty() {
            return Err(ProtocolError::InvalidEnvelope("method must be a non-empty string"));
        }

        Ok(request)
    }

    /// Decodes a response envelope (used by peers and tests).
    pub fn decode_response(payload: &[u8]) -> Result<Response, ProtocolError> {
        let response: Response = serde_json::from_slice(payload)?;
        if response.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::InvalidEnvelope("jsonrpc version must be \"2.0\""));
        }
        if response.result.is_some() == response.error.is_some() {
            return Err(ProtocolError::InvalidEnvelope(
                "exactly one of result and error must be present",
            ));
        }
        Ok(response)
    }
}

/// Encodes responses and notifications into text payloads.
pub struct Encoder;

impl Encoder {
    /// Encodes a response.
    pub fn encode_response(response: &Response) -> Result<Bytes, ProtocolError> {
        Self::encode_json(response)
    }

    /// Encodes a change notification.
    pub fn encode_notification(notification: &Notification) -> Result<Bytes, ProtocolError> {
        Self::encode_json(notification)
    }

    /// Encodes a request (used by peers and tests).
    pub fn encode_request(request: &Request) -> Result<Bytes, ProtocolError> {
        Self::encode_json(request)
    }

    /// Encodes any JSON-serializable value.
    pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(ProtocolError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::{RequestId, ResponseError};
    use serde_json::json;

    #[test]
    fn test_decode_valid_request() {
        let req = Decoder::decode_request(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert_eq!(req.id, Some(RequestId::from(1)));
        assert_eq!(req.params, None);
    }

    #[test]
    fn test_decode_with_params() {
        let req =
            Decoder::decode_request(br#"{"jsonrpc":"2.0","method":"setX","params":{"x":5}}"#)
                .unwrap();
        assert_eq!(req.params, Some(json!({"x": 5})));
        assert!(req.is_notification());
    }

    #[test]
    fn test_decode_rejects_unparseable() {
        let err = Decoder::decode_request(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        let err = Decoder::decode_request(b"").unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        let err = Decoder::decode_request(br#"[{"jsonrpc":"2.0","method":"a"}]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn test_decode_rejects_bad_envelope() {
        // Missing version
        let err = Decoder::decode_request(br#"{"method":"ping","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        // Wrong version
        let err =
            Decoder::decode_request(br#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));

        // Version of the wrong type
        let err = Decoder::decode_request(br#"{"jsonrpc":2.0,"method":"ping"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        // Missing method
        let err = Decoder::decode_request(br#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));

        // Empty method
        let err = Decoder::decode_request(br#"{"jsonrpc":"2.0","method":"","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));

        // Non-string method
        let err = Decoder::decode_request(br#"{"jsonrpc":"2.0","method":7}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Json(_)));
    }

    #[test]
    fn test_encode_response_roundtrip() {
        let request =
            Decoder::decode_request(br#"{"jsonrpc":"2.0","method":"get","id":"r-1"}"#).unwrap();
        let response = Response::ok(request.id.clone(), json!({"x": 5}));
        let bytes = Encoder::encode_response(&response).unwrap();

        let decoded = Decoder::decode_response(&bytes).unwrap();
        assert_eq!(decoded.id, request.id);
        assert_eq!(decoded.result, Some(json!({"x": 5})));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_encode_error_response() {
        let response = Response::error(
            Some(RequestId::from("a")),
            ResponseError::new(ErrorKind::InvalidParams, "x must be a number"),
        );
        let bytes = Encoder::encode_response(&response).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["error"]["code"], json!(-32602));
        assert_eq!(value["error"]["message"], json!("x must be a number"));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_decode_response_rejects_both_result_and_error() {
        let err = Decoder::decode_response(
            br#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":-32603,"message":"x"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));

        let err = Decoder::decode_response(br#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_encode_notification() {
        let bytes = Encoder::encode_notification(&Notification::update(json!({"on": true})))
            .unwrap();
        assert_eq!(
            bytes.as_ref(),
            br#"{"jsonrpc":"2.0","method":"update","params":{"on":true}}"#
        );
    }

    #[test]
    fn test_encode_request() {
        let bytes = Encoder::encode_request(&Request::new("ping").with_id(1)).unwrap();
        let decoded = Decoder::decode_request(&bytes).unwrap();
        assert_eq!(decoded.method, "ping");
    }
}
