//! Serialization-safe snapshot of an exchange.
//!
//! [`Holder::build`] projects a live [`Exchange`] into plain values and
//! strings, dropping whatever cannot be persisted under the configured
//! policy. [`Holder::restore`] rebuilds a fresh exchange from a decoded
//! holder and re-links its origin endpoint against the running context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::RuntimeContext;
use crate::exchange::{
    Exchange, Fault, Message, AGGREGATED_COLLECTION_GUARD, AGGREGATED_COMPLETED_BY,
    AGGREGATED_CORRELATION_KEY, AGGREGATED_FROM_ENDPOINT, AGGREGATED_SIZE, AGGREGATED_TIMEOUT,
    RESERVED_PROPERTY_KEYS,
};
use crate::value::Value;

/// Builder policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Keep header values that are serializable but not scalar.
    pub allow_complex_headers: bool,
    /// Project ordinary exchange properties. Reserved slots are always
    /// written.
    pub include_properties: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            allow_complex_headers: false,
            include_properties: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Body,
    Header,
    Property,
}

/// Placeholder for a value left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedValue {
    pub scope: Scope,
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holder {
    pub exchange_id: String,
    pub message_id: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, Value>,
    /// Ordinary properties plus the reserved slots. A reserved slot that was
    /// never set holds `Value::Null`.
    pub properties: BTreeMap<String, Value>,
    pub from_endpoint: Option<String>,
    pub fault: Option<Fault>,
    pub dropped: Vec<DroppedValue>,
}

// ============================================================================
// Reserved slots
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum SlotKind {
    Int,
    Long,
    Text,
}

const RESERVED_SLOTS: [(&str, SlotKind); 5] = [
    (AGGREGATED_SIZE, SlotKind::Int),
    (AGGREGATED_TIMEOUT, SlotKind::Long),
    (AGGREGATED_COMPLETED_BY, SlotKind::Text),
    (AGGREGATED_CORRELATION_KEY, SlotKind::Text),
    (AGGREGATED_COLLECTION_GUARD, SlotKind::Text),
];

impl SlotKind {
    /// Lossless conversion into the slot's type.
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (SlotKind::Int, Value::Int(v)) => Some(Value::Int(*v)),
            (SlotKind::Int, Value::Long(v)) => i32::try_from(*v).ok().map(Value::Int),
            (SlotKind::Int, Value::String(s)) => s.trim().parse().ok().map(Value::Int),
            (SlotKind::Long, Value::Int(v)) => Some(Value::Long(i64::from(*v))),
            (SlotKind::Long, Value::Long(v)) => Some(Value::Long(*v)),
            (SlotKind::Long, Value::String(s)) => s.trim().parse().ok().map(Value::Long),
            (SlotKind::Text, Value::String(s)) => Some(Value::String(s.clone())),
            (SlotKind::Text, Value::Int(v)) => Some(Value::String(v.to_string())),
            (SlotKind::Text, Value::Long(v)) => Some(Value::String(v.to_string())),
            (SlotKind::Text, Value::Bool(v)) => Some(Value::String(v.to_string())),
            _ => None,
        }
    }
}

// ============================================================================
// Build
// ============================================================================

impl Holder {
    pub fn build(exchange: &Exchange, allow_complex_headers: bool) -> Self {
        Self::build_with(
            exchange,
            &BuildOptions {
                allow_complex_headers,
                ..BuildOptions::default()
            },
        )
    }

    /// Never fails; values without a safe representation are recorded in
    /// `dropped` instead.
    pub fn build_with(exchange: &Exchange, options: &BuildOptions) -> Self {
        let mut dropped = Vec::new();

        let body = match &exchange.message.body {
            Some(v) if v.is_serializable() => Some(v.clone()),
            Some(v) => {
                drop_value(&mut dropped, Scope::Body, "body", v);
                None
            }
            None => None,
        };

        let mut headers = BTreeMap::new();
        for (name, value) in &exchange.message.headers {
            let keep = value.is_scalar()
                || (options.allow_complex_headers && value.is_serializable());
            if keep {
                headers.insert(name.clone(), value.clone());
            } else {
                drop_value(&mut dropped, Scope::Header, name, value);
            }
        }

        let mut properties = BTreeMap::new();
        if options.include_properties {
            for (name, value) in &exchange.properties {
                let reserved = name == AGGREGATED_FROM_ENDPOINT
                    || RESERVED_PROPERTY_KEYS.contains(&name.as_str());
                if reserved {
                    continue;
                }
                if value.is_serializable() {
                    properties.insert(name.clone(), value.clone());
                } else {
                    drop_value(&mut dropped, Scope::Property, name, value);
                }
            }
        }

        for (key, kind) in RESERVED_SLOTS {
            let slot = match exchange.properties.get(key) {
                None => Value::Null,
                Some(v) => kind.coerce(v).unwrap_or_else(|| {
                    drop_value(&mut dropped, Scope::Property, key, v);
                    Value::Null
                }),
            };
            properties.insert(key.to_string(), slot);
        }

        Holder {
            exchange_id: exchange.id.clone(),
            message_id: exchange.message.id.clone(),
            body,
            headers,
            properties,
            from_endpoint: exchange
                .from_endpoint
                .as_ref()
                .map(|endpoint| endpoint.uri().to_string()),
            fault: exchange.fault.clone(),
            dropped,
        }
    }

    /// True when `key` is present and explicitly unset.
    pub fn is_unset(&self, key: &str) -> bool {
        matches!(self.properties.get(key), Some(Value::Null))
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Rebuild an exchange. The origin endpoint is attached only if `ctx`
    /// currently runs an endpoint with that URI.
    pub fn restore(self, ctx: &RuntimeContext) -> Exchange {
        let Holder {
            exchange_id,
            message_id,
            body,
            headers,
            mut properties,
            from_endpoint,
            fault,
            dropped: _,
        } = self;

        properties.remove(AGGREGATED_FROM_ENDPOINT);

        let from_endpoint = from_endpoint.and_then(|uri| {
            let found = ctx.endpoint(&uri);
            if found.is_none() {
                debug!(
                    exchange_id = %exchange_id,
                    uri = %uri,
                    context = ctx.name(),
                    "origin endpoint not running; leaving unset"
                );
            }
            found
        });

        Exchange {
            id: exchange_id,
            message: Message {
                id: message_id,
                headers,
                body,
            },
            properties,
            fault,
            from_endpoint,
        }
    }
}

fn drop_value(dropped: &mut Vec<DroppedValue>, scope: Scope, name: &str, value: &Value) {
    warn!(
        ?scope,
        field = name,
        type_name = value.type_name(),
        "value cannot be persisted; dropping"
    );
    dropped.push(DroppedValue {
        scope,
        name: name.to_string(),
        type_name: value.type_name().to_string(),
    });
}
