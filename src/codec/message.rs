//! Protocol message envelope.
//!
//! Every frame is a JSON object with a `type` discriminator. Encoding emits
//! the canonical camelCase field names; decoding also accepts the legacy
//! aliases (`requestId` for `subscriptionId`, `query` for `queryPath`,
//! `queryId`, `path`, `startVersion`/`endVersion`, `message` for `error`).

use super::value::{decode_value, encode_value, EncodeOptions, Value};
use crate::error::{Result, SyncLinkError};
use serde_json::{json, Map, Value as JsonValue};

/// Whether a one-shot request is a mutation or an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Mutation,
    Action,
}

impl RequestKind {
    fn request_type(&self) -> &'static str {
        match self {
            RequestKind::Mutation => "mutation",
            RequestKind::Action => "action",
        }
    }

    fn result_type(&self) -> &'static str {
        match self {
            RequestKind::Mutation => "mutationResult",
            RequestKind::Action => "actionResult",
        }
    }
}

/// Kind of a single entry in a `transition` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModificationKind {
    QueryUpdated,
    QueryFailed,
    QueryRemoved,
    /// Unknown kind, kept so newer servers do not break older clients.
    Other(String),
}

impl ModificationKind {
    fn as_str(&self) -> &str {
        match self {
            ModificationKind::QueryUpdated => "QueryUpdated",
            ModificationKind::QueryFailed => "QueryFailed",
            ModificationKind::QueryRemoved => "QueryRemoved",
            ModificationKind::Other(s) => s,
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "QueryUpdated" => ModificationKind::QueryUpdated,
            "QueryFailed" => ModificationKind::QueryFailed,
            "QueryRemoved" => ModificationKind::QueryRemoved,
            other => ModificationKind::Other(other.to_string()),
        }
    }
}

/// One query change carried by a `transition` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub kind: ModificationKind,
    pub query_id: String,
    pub value: Option<Value>,
    pub error_message: Option<String>,
    pub log_lines: Vec<String>,
}

/// A protocol message, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Subscribe {
        subscription_id: String,
        query_path: String,
        args: Value,
    },
    Unsubscribe {
        subscription_id: String,
    },
    /// `mutation` or `action` request.
    Request {
        kind: RequestKind,
        request_id: String,
        path: String,
        args: Value,
    },
    /// `queryResult` / `update`.
    QueryResult {
        subscription_id: String,
        value: Value,
        log_lines: Vec<String>,
    },
    /// `mutationResult` / `actionResult`.
    RequestResult {
        kind: RequestKind,
        request_id: String,
        success: bool,
        value: Value,
        log_lines: Vec<String>,
        error_code: Option<String>,
    },
    Error {
        message: String,
        error_code: Option<String>,
        subscription_id: Option<String>,
        request_id: Option<String>,
    },
    Ping,
    Pong,
    Authenticate {
        token: String,
    },
    Authenticated,
    Subscribed {
        subscription_id: String,
    },
    /// `modifyQuerySet` / `transition`.
    Transition {
        base_version: Value,
        new_version: Value,
        modifications: Vec<Modification>,
    },
}

impl WireMessage {
    /// The `type` discriminator written by [`encode_message`].
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Subscribe { .. } => "subscribe",
            WireMessage::Unsubscribe { .. } => "unsubscribe",
            WireMessage::Request { kind, .. } => kind.request_type(),
            WireMessage::QueryResult { .. } => "queryResult",
            WireMessage::RequestResult { kind, .. } => kind.result_type(),
            WireMessage::Error { .. } => "error",
            WireMessage::Ping => "ping",
            WireMessage::Pong => "pong",
            WireMessage::Authenticate { .. } => "authenticate",
            WireMessage::Authenticated => "authenticated",
            WireMessage::Subscribed { .. } => "subscribed",
            WireMessage::Transition { .. } => "transition",
        }
    }
}

/// Serialize a message to JSON text.
pub fn encode_message(msg: &WireMessage) -> Result<String> {
    let envelope = to_envelope(msg)?;
    serde_json::to_string(&envelope)
        .map_err(|e| SyncLinkError::serialization(format!("failed to write JSON: {}", e), "$"))
}

/// Serialize a message to UTF-8 bytes for binary frames.
pub fn encode_binary(msg: &WireMessage) -> Result<Vec<u8>> {
    encode_message(msg).map(String::into_bytes)
}

/// Parse JSON text into a message, validating the variant's required fields.
pub fn decode_message(text: &str) -> Result<WireMessage> {
    let json: JsonValue = serde_json::from_str(text)
        .map_err(|e| SyncLinkError::deserialization(format!("invalid JSON: {}", e)))?;
    from_envelope(&json)
}

/// Parse a binary frame produced by [`encode_binary`].
pub fn decode_binary(bytes: &[u8]) -> Result<WireMessage> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SyncLinkError::deserialization(format!("binary frame is not UTF-8: {}", e)))?;
    decode_message(text)
}

fn wire(value: &Value) -> Result<JsonValue> {
    encode_value(value, &EncodeOptions::default())
}

fn to_envelope(msg: &WireMessage) -> Result<JsonValue> {
    let mut out = match msg {
        WireMessage::Subscribe {
            subscription_id,
            query_path,
            args,
        } => json!({
            "subscriptionId": subscription_id,
            "queryPath": query_path,
            "args": wire(args)?,
        }),
        WireMessage::Unsubscribe { subscription_id } => json!({ "subscriptionId": subscription_id }),
        WireMessage::Request {
            request_id,
            path,
            args,
            ..
        } => json!({
            "requestId": request_id,
            "path": path,
            "args": wire(args)?,
        }),
        WireMessage::QueryResult {
            subscription_id,
            value,
            log_lines,
        } => json!({
            "subscriptionId": subscription_id,
            "value": wire(value)?,
            "logLines": log_lines,
        }),
        WireMessage::RequestResult {
            request_id,
            success,
            value,
            log_lines,
            error_code,
            ..
        } => {
            let mut obj = json!({
                "requestId": request_id,
                "success": success,
                "value": wire(value)?,
                "logLines": log_lines,
            });
            if let Some(code) = error_code {
                obj["errorCode"] = JsonValue::String(code.clone());
            }
            obj
        },
        WireMessage::Error {
            message,
            error_code,
            subscription_id,
            request_id,
        } => {
            let mut obj = json!({ "error": message });
            if let Some(code) = error_code {
                obj["errorCode"] = JsonValue::String(code.clone());
            }
            if let Some(id) = subscription_id {
                obj["subscriptionId"] = JsonValue::String(id.clone());
            }
            if let Some(id) = request_id {
                obj["requestId"] = JsonValue::String(id.clone());
            }
            obj
        },
        WireMessage::Ping | WireMessage::Pong | WireMessage::Authenticated => json!({}),
        WireMessage::Authenticate { token } => json!({ "token": token }),
        WireMessage::Subscribed { subscription_id } => json!({ "subscriptionId": subscription_id }),
        WireMessage::Transition {
            base_version,
            new_version,
            modifications,
        } => {
            let mut items = Vec::with_capacity(modifications.len());
            for m in modifications {
                let mut item = json!({
                    "type": m.kind.as_str(),
                    "queryId": m.query_id,
                    "logLines": m.log_lines,
                });
                if let Some(value) = &m.value {
                    item["value"] = wire(value)?;
                }
                if let Some(error) = &m.error_message {
                    item["errorMessage"] = JsonValue::String(error.clone());
                }
                items.push(item);
            }
            json!({
                "baseVersion": wire(base_version)?,
                "newVersion": wire(new_version)?,
                "modifications": items,
            })
        },
    };
    out["type"] = JsonValue::String(msg.type_name().to_string());
    Ok(out)
}

/// Field accessor that understands aliases and reports the canonical name
/// when a required field is missing.
struct Fields<'a> {
    obj: &'a Map<String, JsonValue>,
}

impl<'a> Fields<'a> {
    fn any(&self, names: &[&str]) -> Option<&'a JsonValue> {
        names.iter().find_map(|name| self.obj.get(*name))
    }

    fn required(&self, names: &[&str]) -> Result<&'a JsonValue> {
        self.any(names).ok_or_else(|| SyncLinkError::missing_field(names[0]))
    }

    fn required_value(&self, names: &[&str]) -> Result<Value> {
        decode_value(self.required(names)?)
    }

    fn required_id(&self, names: &[&str]) -> Result<String> {
        id_string(self.required(names)?, names[0])
    }

    fn optional_id(&self, names: &[&str]) -> Result<Option<String>> {
        match self.any(names) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => id_string(v, names[0]).map(Some),
        }
    }

    fn required_str(&self, names: &[&str]) -> Result<String> {
        match self.required(names)? {
            JsonValue::String(s) => Ok(s.clone()),
            _ => Err(wrong_type(names[0], "a string")),
        }
    }

    fn optional_str(&self, names: &[&str]) -> Result<Option<String>> {
        match self.any(names) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(names[0], "a string")),
        }
    }

    fn log_lines(&self, required: bool) -> Result<Vec<String>> {
        match self.obj.get("logLines") {
            None if required => Err(SyncLinkError::missing_field("logLines")),
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(v) => string_list(v, "logLines"),
        }
    }
}

fn wrong_type(field: &str, expected: &str) -> SyncLinkError {
    SyncLinkError::DeserializationError {
        message: format!("field '{}' must be {}", field, expected),
        field: Some(field.to_string()),
    }
}

fn id_string(value: &JsonValue, field: &str) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        _ => Err(wrong_type(field, "a string or number")),
    }
}

fn string_list(value: &JsonValue, field: &str) -> Result<Vec<String>> {
    let items = value.as_array().ok_or_else(|| wrong_type(field, "an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| wrong_type(field, "an array of strings"))
        })
        .collect()
}

fn from_envelope(json: &JsonValue) -> Result<WireMessage> {
    let obj = json
        .as_object()
        .ok_or_else(|| SyncLinkError::deserialization("message must be a JSON object"))?;
    let fields = Fields { obj };
    let msg_type = fields.required_str(&["type"])?;

    let msg = match msg_type.as_str() {
        "subscribe" => WireMessage::Subscribe {
            subscription_id: fields.required_id(&["subscriptionId", "requestId"])?,
            query_path: fields.required_str(&["queryPath", "query"])?,
            args: fields.required_value(&["args"])?,
        },
        "unsubscribe" => WireMessage::Unsubscribe {
            subscription_id: fields.required_id(&["subscriptionId", "queryId"])?,
        },
        "mutation" => WireMessage::Request {
            kind: RequestKind::Mutation,
            request_id: fields.required_id(&["requestId"])?,
            path: fields.required_str(&["path", "mutation"])?,
            args: fields.required_value(&["args"])?,
        },
        "action" => WireMessage::Request {
            kind: RequestKind::Action,
            request_id: fields.required_id(&["requestId"])?,
            path: fields.required_str(&["path", "action"])?,
            args: fields.required_value(&["args"])?,
        },
        "queryResult" | "update" => WireMessage::QueryResult {
            subscription_id: fields.required_id(&["subscriptionId", "queryId"])?,
            value: fields.required_value(&["value"])?,
            log_lines: fields.log_lines(false)?,
        },
        "mutationResult" | "actionResult" => WireMessage::RequestResult {
            kind: if msg_type == "mutationResult" {
                RequestKind::Mutation
            } else {
                RequestKind::Action
            },
            request_id: fields.required_id(&["requestId"])?,
            success: fields
                .required(&["success"])?
                .as_bool()
                .ok_or_else(|| wrong_type("success", "a boolean"))?,
            value: fields.required_value(&["value"])?,
            log_lines: fields.log_lines(true)?,
            error_code: fields.optional_str(&["errorCode"])?,
        },
        "error" => WireMessage::Error {
            message: fields.required_str(&["error", "message"])?,
            error_code: fields.optional_str(&["errorCode"])?,
            subscription_id: fields.optional_id(&["subscriptionId", "queryId"])?,
            request_id: fields.optional_id(&["requestId"])?,
        },
        "ping" => WireMessage::Ping,
        "pong" => WireMessage::Pong,
        "authenticate" => WireMessage::Authenticate {
            token: fields.required_str(&["token"])?,
        },
        "authenticated" => WireMessage::Authenticated,
        "subscribed" => WireMessage::Subscribed {
            subscription_id: fields.required_id(&["subscriptionId", "queryId", "requestId"])?,
        },
        "modifyQuerySet" | "transition" => {
            let base_version = fields.required_value(&["baseVersion", "startVersion"])?;
            let new_version = fields.required_value(&["newVersion", "endVersion"])?;
            let raw = fields
                .required(&["modifications"])?
                .as_array()
                .ok_or_else(|| wrong_type("modifications", "an array"))?;
            let modifications = raw.iter().map(decode_modification).collect::<Result<Vec<_>>>()?;
            WireMessage::Transition {
                base_version,
                new_version,
                modifications,
            }
        },
        other => {
            return Err(SyncLinkError::DeserializationError {
                message: format!("unknown message type '{}'", other),
                field: Some("type".to_string()),
            });
        },
    };
    Ok(msg)
}

fn decode_modification(item: &JsonValue) -> Result<Modification> {
    let obj = item
        .as_object()
        .ok_or_else(|| wrong_type("modifications", "an array of objects"))?;
    let fields = Fields { obj };
    let value = match obj.get("value") {
        Some(v) => Some(decode_value(v)?),
        None => None,
    };
    Ok(Modification {
        kind: ModificationKind::parse(&fields.required_str(&["type"])?),
        query_id: fields.required_id(&["queryId", "subscriptionId"])?,
        value,
        error_message: fields.optional_str(&["errorMessage", "error"])?,
        log_lines: fields.log_lines(false)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::RecordId;
    use serde_json::json;

    fn decode_json(value: JsonValue) -> Result<WireMessage> {
        decode_message(&value.to_string())
    }

    #[test]
    fn test_subscribe_encodes_camel_case_with_markers() {
        let msg = WireMessage::Subscribe {
            subscription_id: "q1".into(),
            query_path: "messages:list".into(),
            args: Value::object([("limit", Value::Int64(10))]),
        };
        let text = encode_message(&msg).unwrap();
        let json: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "subscribe",
                "subscriptionId": "q1",
                "queryPath": "messages:list",
                "args": {"limit": {"$int64": "10"}},
            })
        );
        assert_eq!(decode_message(&text).unwrap(), msg);
    }

    #[test]
    fn test_subscribe_missing_args_names_field() {
        let err = decode_json(json!({
            "type": "subscribe",
            "requestId": "r1",
            "query": "messages:list",
        }))
        .unwrap_err();
        match err {
            SyncLinkError::DeserializationError { field, .. } => {
                assert_eq!(field.as_deref(), Some("args"));
            },
            other => panic!("expected DeserializationError, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_accepts_aliases() {
        let msg = decode_json(json!({
            "type": "subscribe",
            "requestId": 7,
            "query": "users:get",
            "args": null,
        }))
        .unwrap();
        assert_eq!(
            msg,
            WireMessage::Subscribe {
                subscription_id: "7".into(),
                query_path: "users:get".into(),
                args: Value::Null,
            }
        );
    }

    #[test]
    fn test_update_alias_decodes_nested_markers() {
        let msg = decode_json(json!({
            "type": "update",
            "queryId": "q9",
            "value": [{"owner": {"$id": {"table": "users", "id": "u1"}}, "at": {"$date": 5}}],
        }))
        .unwrap();
        assert_eq!(
            msg,
            WireMessage::QueryResult {
                subscription_id: "q9".into(),
                value: Value::Array(vec![Value::object([
                    ("owner", Value::Id(RecordId::new("users", "u1"))),
                    ("at", Value::Timestamp(5)),
                ])]),
                log_lines: Vec::new(),
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = decode_json(json!({"type": "teleport"})).unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_missing_type_rejected() {
        let err = decode_json(json!({"value": 1})).unwrap_err();
        assert!(matches!(
            err,
            SyncLinkError::DeserializationError { field: Some(ref f), .. } if f == "type"
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            decode_message("{not json").unwrap_err(),
            SyncLinkError::DeserializationError { .. }
        ));
    }

    #[test]
    fn test_mutation_result_requires_log_lines() {
        let err = decode_json(json!({
            "type": "mutationResult",
            "requestId": "1",
            "success": true,
            "value": null,
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            SyncLinkError::DeserializationError { field: Some(ref f), .. } if f == "logLines"
        ));
    }

    #[test]
    fn test_action_result_round_trip() {
        let msg = WireMessage::RequestResult {
            kind: RequestKind::Action,
            request_id: "42".into(),
            success: false,
            value: Value::from("quota exceeded"),
            log_lines: vec!["line".into()],
            error_code: Some("QUOTA".into()),
        };
        let text = encode_message(&msg).unwrap();
        assert!(text.contains("\"type\":\"actionResult\""));
        assert_eq!(decode_message(&text).unwrap(), msg);
    }

    #[test]
    fn test_error_accepts_message_alias() {
        let msg = decode_json(json!({"type": "error", "message": "denied", "errorCode": "AUTH"})).unwrap();
        assert_eq!(
            msg,
            WireMessage::Error {
                message: "denied".into(),
                error_code: Some("AUTH".into()),
                subscription_id: None,
                request_id: None,
            }
        );
    }

    #[test]
    fn test_transition_decodes_modifications() {
        let msg = decode_json(json!({
            "type": "modifyQuerySet",
            "startVersion": 1,
            "endVersion": 2,
            "modifications": [
                {"type": "QueryUpdated", "queryId": "q1", "value": {"$int64": "3"}},
                {"type": "QueryFailed", "queryId": "q2", "errorMessage": "bad"},
            ],
        }))
        .unwrap();
        match msg {
            WireMessage::Transition { modifications, new_version, .. } => {
                assert_eq!(new_version, Value::Float(2.0));
                assert_eq!(modifications.len(), 2);
                assert_eq!(modifications[0].kind, ModificationKind::QueryUpdated);
                assert_eq!(modifications[0].value, Some(Value::Int64(3)));
                assert_eq!(modifications[1].kind, ModificationKind::QueryFailed);
                assert_eq!(modifications[1].error_message.as_deref(), Some("bad"));
            },
            other => panic!("expected transition, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_wraps_json_text() {
        let bytes = encode_binary(&WireMessage::Ping).unwrap();
        assert_eq!(bytes, br#"{"type":"ping"}"#.to_vec());
        assert_eq!(decode_binary(&bytes).unwrap(), WireMessage::Ping);
        assert!(decode_binary(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_unencodable_args_fail_message_encoding() {
        let msg = WireMessage::Request {
            kind: RequestKind::Mutation,
            request_id: "1".into(),
            path: "m:send".into(),
            args: Value::Float(f64::NAN),
        };
        assert!(matches!(
            encode_message(&msg).unwrap_err(),
            SyncLinkError::SerializationError { .. }
        ));
    }
}
