use serde::Serialize;
use std::fmt;

/// Observability context attached to a diagnostic event
///
/// Fields are only ever written, never read back by any logic. Each present
/// field describes the operation the event belongs to.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    topics: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
}

impl DiagnosticContext {
    /// Serialized message payload, lossily converted to UTF-8
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = Some(String::from_utf8_lossy(payload).into_owned());
        self
    }

    /// Single topic the operation targets
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics = vec![topic.into()];
        self
    }

    /// Topics the operation targets
    pub fn with_topics(mut self, topics: &[String]) -> Self {
        self.topics = topics.to_vec();
        self
    }

    /// Broker hosts involved
    pub fn with_hosts(mut self, hosts: &[String]) -> Self {
        self.hosts = hosts.to_vec();
        self
    }

    /// Message key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Consumer group identifier
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Partition and offset of a placed or received message
    pub fn with_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = Some(partition);
        self.offset = Some(offset);
        self
    }

    /// Partition without a known offset
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    #[allow(missing_docs)]
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    #[allow(missing_docs)]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    #[allow(missing_docs)]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    #[allow(missing_docs)]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[allow(missing_docs)]
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    #[allow(missing_docs)]
    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    #[allow(missing_docs)]
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }
}

impl fmt::Display for DiagnosticContext {
    /// Renders the present fields as a compact JSON object
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
