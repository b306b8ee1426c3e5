//! Classification of inbound push messages.
//!
//! Most messages are only a cue to re-pull state over REST; some carry the
//! data inline. Parse failures drop the message and never touch the socket.
//!
//! Inline data counts only when every element is an object carrying at least
//! one measurement field; anything else is valid JSON with nothing to act on.

use crate::config::SyncConfig;
use crate::error::ProtocolError;
use crate::types::Measurement;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// What a push message asks the client to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Server has new data; re-pull the current range.
    RefetchRequested,
    /// Liveness echo from the server.
    Liveness { message: Option<String> },
    /// Data delivered inline; replaces the dataset without a fetch.
    DirectData(Vec<Measurement>),
    /// Nothing actionable.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct NotificationRouter {
    update_tags: HashSet<String>,
    liveness_tag: String,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl NotificationRouter {
    pub fn new<I, S>(update_tags: I, liveness_tag: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            update_tags: update_tags.into_iter().map(Into::into).collect(),
            liveness_tag: liveness_tag.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.update_tags.iter().cloned(), config.liveness_tag.clone())
    }

    /// Classify one text payload.
    ///
    /// Checked in order: update tag, liveness tag, embedded `data` field, bare
    /// array of records. Anything else is ignored. Only a payload that is not
    /// JSON at all is an error.
    pub fn route(&self, payload: &str) -> Result<Notification, ProtocolError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| ProtocolError::new(format!("invalid JSON: {e}")))?;

        match value {
            Value::Object(mut fields) => {
                if let Some(Value::String(kind)) = fields.get("type") {
                    if self.update_tags.contains(kind) {
                        return Ok(Notification::RefetchRequested);
                    }
                    if *kind == self.liveness_tag {
                        let message = fields
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        return Ok(Notification::Liveness { message });
                    }
                }

                match fields.remove("data") {
                    Some(data) => direct_data(data),
                    None => Ok(Notification::Ignored),
                }
            }
            array @ Value::Array(_) => direct_data(array),
            _ => Ok(Notification::Ignored),
        }
    }
}

fn direct_data(value: Value) -> Result<Notification, ProtocolError> {
    let Value::Array(items) = value else {
        debug!("Inline data is not an array");
        return Ok(Notification::Ignored);
    };
    if !items.iter().all(is_record) {
        debug!(len = items.len(), "Inline data is not a list of measurements");
        return Ok(Notification::Ignored);
    }

    items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Measurement>, _>>()
        .map(Notification::DirectData)
        .map_err(|e| ProtocolError::new(format!("unreadable measurement: {e}")))
}

fn is_record(item: &Value) -> bool {
    item.as_object().is_some_and(|fields| {
        Measurement::WIRE_FIELDS
            .iter()
            .any(|name| fields.contains_key(*name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementType;

    fn router() -> NotificationRouter {
        NotificationRouter::default()
    }

    #[test]
    fn test_update_tags_request_refetch() {
        let r = router();
        assert_eq!(
            r.route(r#"{"type":"heartrate_update"}"#),
            Ok(Notification::RefetchRequested)
        );
        assert_eq!(
            r.route(r#"{"type":"ouratimeseries_update","data":[]}"#),
            Ok(Notification::RefetchRequested)
        );
    }

    #[test]
    fn test_pong_is_informational() {
        assert_eq!(
            router().route(r#"{"type":"pong","message":"alive"}"#),
            Ok(Notification::Liveness {
                message: Some("alive".to_string())
            })
        );
    }

    #[test]
    fn test_embedded_data_is_direct() {
        let payload = r#"{"type":"snapshot","data":[
            {"timestamp":"2026-01-04T22:18:21.700Z","measurement_type":"hrv","measurement_value":44}
        ]}"#;
        match router().route(payload) {
            Ok(Notification::DirectData(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].measurement_type, Some(MeasurementType::Hrv));
            }
            other => panic!("expected direct data, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_array_is_direct() {
        let payload = r#"[{"timestamp":null,"measurement_value":null}]"#;
        assert!(matches!(
            router().route(payload),
            Ok(Notification::DirectData(records)) if records.len() == 1
        ));
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        let r = router();
        assert_eq!(r.route(r#"{"type":"hello"}"#), Ok(Notification::Ignored));
        assert_eq!(r.route(r#"{"data":null}"#), Ok(Notification::Ignored));
        assert_eq!(r.route("42"), Ok(Notification::Ignored));
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        let r = router();
        assert!(r.route("not json").is_err());
        assert!(r.route(r#"{"type":"heartrate_update""#).is_err());
    }

    #[test]
    fn test_arrays_of_non_records_are_ignored() {
        let r = router();
        assert_eq!(r.route("[1, 2, 3]"), Ok(Notification::Ignored));
        assert_eq!(r.route(r#"[{"foo":1}]"#), Ok(Notification::Ignored));
        assert_eq!(r.route(r#"{"data":"oops"}"#), Ok(Notification::Ignored));
        assert_eq!(r.route(r#"{"data":[{"foo":1}]}"#), Ok(Notification::Ignored));
        // One stray element disqualifies the whole batch.
        assert_eq!(
            r.route(r#"[{"timestamp":"2026-01-04T22:18:21Z","measurement_value":60},{"foo":1}]"#),
            Ok(Notification::Ignored)
        );
    }

    #[test]
    fn test_empty_array_is_direct() {
        assert_eq!(router().route("[]"), Ok(Notification::DirectData(Vec::new())));
    }

    #[test]
    fn test_custom_tags() {
        let r = NotificationRouter::new(["steps_update"], "heartbeat");
        assert_eq!(
            r.route(r#"{"type":"steps_update"}"#),
            Ok(Notification::RefetchRequested)
        );
        assert_eq!(r.route(r#"{"type":"heartrate_update"}"#), Ok(Notification::Ignored));
        assert!(matches!(
            r.route(r#"{"type":"heartbeat"}"#),
            Ok(Notification::Liveness { message: None })
        ));
    }
}
