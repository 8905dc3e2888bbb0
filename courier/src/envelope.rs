use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of application data exchanged over the broker
///
/// Envelopes are immutable once built. On the wire they are represented as a JSON object
/// with the fields `id`, `name`, `timestamp`, `data` and `senderId`. Unknown fields are ignored
/// and missing fields fall back to their empty value when decoding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Envelope {
    id: String,
    name: String,
    timestamp: i64,
    data: String,
    sender_id: String,
}

impl Envelope {
    /// Creates a new envelope with a random identifier and the current time
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: Utc::now().timestamp_micros(),
            data: data.into(),
            sender_id: String::new(),
        }
    }

    /// Creates a new instance from raw parts
    pub fn from_parts(
        id: impl Into<String>,
        name: impl Into<String>,
        timestamp: i64,
        data: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timestamp,
            data: data.into(),
            sender_id: sender_id.into(),
        }
    }

    /// Consumes the envelope and returns one with the given sender
    pub fn with_sender(self, sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            ..self
        }
    }

    /// Opaque identifier, unique per construction
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name describing what the envelope carries
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the unix epoch at which the envelope was built
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Application payload
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Identifier of the service that built the envelope, empty if unknown
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn generate_unique_identifiers() {
        let first = Envelope::new("created", "{}");
        let second = Envelope::new("created", "{}");

        assert_ne!(first.id(), second.id());
        assert!(first.timestamp() <= second.timestamp());
        assert_eq!(first.sender_id(), "");
    }

    #[test]
    fn use_camel_case_on_the_wire() {
        let envelope = Envelope::from_parts("id-1", "created", 1_600_000_000_000_000, "data", "svc");
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            value,
            json!({
                "id": "id-1",
                "name": "created",
                "timestamp": 1_600_000_000_000_000i64,
                "data": "data",
                "senderId": "svc",
            })
        );
    }

    #[test]
    fn survive_the_wire() {
        let envelope = Envelope::new("session.created", r#"{"answer":42}"#).with_sender("manager");
        let wire = serde_json::to_vec(&envelope).unwrap();

        assert_eq!(serde_json::from_slice::<Envelope>(&wire).unwrap(), envelope);
    }

    #[test]
    fn ignore_unknown_and_default_missing_fields() {
        let decoded: Envelope =
            serde_json::from_str(r#"{"id":"a","name":"b","unexpected":true}"#).unwrap();

        assert_eq!(decoded, Envelope::from_parts("a", "b", 0, "", ""));
    }

    #[test]
    fn reject_mistyped_fields() {
        assert!(serde_json::from_str::<Envelope>(r#"{"timestamp":"yesterday"}"#).is_err());
    }
}
