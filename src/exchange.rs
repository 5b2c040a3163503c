//! The live unit of work as seen by the codec.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;

/// Number of exchanges merged into an aggregate so far.
pub const AGGREGATED_SIZE: &str = "AggregatedSize";
/// Completion timeout of the aggregate, in milliseconds.
pub const AGGREGATED_TIMEOUT: &str = "AggregatedTimeout";
/// Which completion condition fired.
pub const AGGREGATED_COMPLETED_BY: &str = "AggregatedCompletedBy";
pub const AGGREGATED_CORRELATION_KEY: &str = "AggregatedCorrelationKey";
pub const AGGREGATED_COLLECTION_GUARD: &str = "AggregatedCollectionGuard";
/// Legacy property name for the origin endpoint. Holders carry the origin
/// as a structural field; this key is stripped on restore.
pub const AGGREGATED_FROM_ENDPOINT: &str = "AggregatedFromEndpoint";

/// Properties every holder carries, set or not.
pub const RESERVED_PROPERTY_KEYS: [&str; 5] = [
    AGGREGATED_SIZE,
    AGGREGATED_TIMEOUT,
    AGGREGATED_COMPLETED_BY,
    AGGREGATED_CORRELATION_KEY,
    AGGREGATED_COLLECTION_GUARD,
];

/// An addressable channel, identified by its URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    uri: String,
}

impl Endpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub type_name: String,
    pub message: String,
}

impl Fault {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub headers: BTreeMap<String, Value>,
    pub body: Option<Value>,
}

impl Message {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub id: String,
    pub message: Message,
    pub properties: BTreeMap<String, Value>,
    pub fault: Option<Fault>,
    /// Where the exchange entered the runtime. Provenance only.
    pub from_endpoint: Option<Arc<Endpoint>>,
}

impl Exchange {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message: Message::new(),
            properties: BTreeMap::new(),
            fault: None,
            from_endpoint: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.message.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.message.headers.insert(name.into(), value.into());
    }

    pub fn body(&self) -> Option<&Value> {
        self.message.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.message.body = Some(body.into());
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}
