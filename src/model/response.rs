//! API responses.

use serde::{Deserialize, Serialize};

use crate::model::{EncodingError, Request};

/// A shaped response bound to its originating request.
///
/// `data` holds the already-encoded body; on WebSocket transports the whole
/// response is framed as one JSON object with the body embedded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request: Request,
    pub status_code: u16,
    #[serde(default)]
    pub total: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redirect: String,
    #[serde(default, with = "raw_body")]
    pub data: Vec<u8>,
}

impl Response {
    /// A blank response for `request`. The status code is zero until the
    /// handler shell shapes it.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            status_code: 0,
            total: 0,
            messages: Vec::new(),
            redirect: String::new(),
            data: Vec::new(),
        }
    }

    /// Encode `value` with the request's negotiated encoder into the body.
    pub fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodingError> {
        self.data = self.request.encoding.encode(value)?;
        Ok(())
    }
}

/// Serializes the encoded body as embedded raw JSON rather than a byte
/// array, so WebSocket frames read like their HTTP siblings.
mod raw_body {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::value::RawValue;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if data.is_empty() {
            return serializer.serialize_none();
        }
        match std::str::from_utf8(data)
            .ok()
            .and_then(|s| RawValue::from_string(s.to_string()).ok())
        {
            Some(raw) => serde::Serialize::serialize(&raw, serializer),
            // Non-JSON bodies (msgpack) never travel inside a JSON frame.
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw: Option<Box<RawValue>> = Option::deserialize(deserializer)?;
        match raw {
            Some(raw) if raw.get() != "null" => Ok(raw.get().as_bytes().to_vec()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, Operation};

    fn response() -> Response {
        Response::new(Request::new(
            Operation::RetrieveMany,
            Identity::new("user", "users"),
        ))
    }

    #[test]
    fn encode_uses_request_encoding() {
        let mut resp = response();
        resp.encode(&serde_json::json!({"name": "the name"})).unwrap();
        assert_eq!(resp.data, br#"{"name":"the name"}"#);
    }

    #[test]
    fn frame_embeds_body_as_raw_json() {
        let mut resp = response();
        resp.status_code = 200;
        resp.encode(&serde_json::json!([{"ID": "xxx"}])).unwrap();

        let encoded = serde_json::to_string(&resp).unwrap();
        let frame: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(frame["statusCode"], 200);
        assert_eq!(frame["data"][0]["ID"], "xxx");

        let back: Response = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back.data, resp.data);
    }

    #[test]
    fn frame_with_empty_body_has_null_data() {
        let mut resp = response();
        resp.status_code = 204;
        let encoded = serde_json::to_string(&resp).unwrap();
        let frame: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert!(frame["data"].is_null());

        let back: Response = serde_json::from_str(&encoded).unwrap();
        assert!(back.data.is_empty());
    }
}
