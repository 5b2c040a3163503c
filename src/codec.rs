//! Holder CBOR encode/decode.
//!
//! The outer shape is a fixed serde struct and is never chosen by the
//! stream. Every leaf is a `[type_name, payload]` pair whose type is
//! resolved against the caller's context, falling back to the built-in
//! set. Unknown names fail closed with the offending field path.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

use ciborium::value::Value as CborValue;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RuntimeContext;
use crate::error::{CodecError, Result};
use crate::exchange::{Exchange, Fault};
use crate::holder::{BuildOptions, DroppedValue, Holder};
use crate::resolver::{resolve_with_fallback, BuiltinType, TypeDescriptor, TypeResolver};
use crate::value::Value;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireHolder {
    id: String,
    message_id: String,
    body: Option<Tagged>,
    #[serde(deserialize_with = "unique_entries")]
    headers: BTreeMap<String, Tagged>,
    #[serde(deserialize_with = "unique_entries")]
    properties: BTreeMap<String, Tagged>,
    from_endpoint: Option<String>,
    fault: Option<Fault>,
    dropped: Vec<DroppedValue>,
}

/// `[type_name, payload]`
#[derive(Debug, Serialize, Deserialize)]
struct Tagged(String, CborValue);

impl Tagged {
    fn into_cbor(self) -> CborValue {
        CborValue::Array(vec![CborValue::Text(self.0), self.1])
    }

    fn from_cbor(value: CborValue, path: &str) -> Result<Self> {
        let CborValue::Array(items) = value else {
            return Err(CodecError::decoding(path, "expected [type, payload] pair"));
        };
        let mut items = items.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(CborValue::Text(name)), Some(payload), None) => Ok(Tagged(name, payload)),
            _ => Err(CodecError::decoding(path, "expected [type, payload] pair")),
        }
    }
}

/// Like the default map impl, but a repeated key is an error rather than a
/// silent overwrite.
fn unique_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Tagged>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = BTreeMap<String, Tagged>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of tagged values")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = BTreeMap::new();
            while let Some((key, value)) = access.next_entry::<String, Tagged>()? {
                if entries.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key \"{key}\"")));
                }
                entries.insert(key, value);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

// ============================================================================
// Encode
// ============================================================================

/// Encode a holder as CBOR bytes.
pub fn encode_holder(holder: &Holder) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_holder_to(holder, &mut buf)?;
    Ok(buf)
}

/// Encode a holder directly into `sink`.
pub fn encode_holder_to<W: Write>(holder: &Holder, sink: W) -> Result<()> {
    let wire = WireHolder {
        id: holder.exchange_id.clone(),
        message_id: holder.message_id.clone(),
        body: holder
            .body
            .as_ref()
            .map(|body| encode_value(body, "body"))
            .transpose()?,
        headers: encode_entries(&holder.headers, "headers")?,
        properties: encode_entries(&holder.properties, "properties")?,
        from_endpoint: holder.from_endpoint.clone(),
        fault: holder.fault.clone(),
        dropped: holder.dropped.clone(),
    };
    ciborium::into_writer(&wire, sink).map_err(|e| CodecError::encoding("holder", e.to_string()))
}

fn encode_entries(
    entries: &BTreeMap<String, Value>,
    scope: &str,
) -> Result<BTreeMap<String, Tagged>> {
    entries
        .iter()
        .map(|(name, value)| Ok((name.clone(), encode_value(value, &format!("{scope}.{name}"))?)))
        .collect()
}

fn encode_value(value: &Value, path: &str) -> Result<Tagged> {
    let payload = match value {
        Value::Null => CborValue::Null,
        Value::Bool(v) => CborValue::Bool(*v),
        Value::Int(v) => CborValue::Integer((*v).into()),
        Value::Long(v) => CborValue::Integer((*v).into()),
        Value::Double(v) => CborValue::Float(*v),
        Value::String(v) => CborValue::Text(v.clone()),
        Value::Bytes(v) => CborValue::Bytes(v.clone()),
        Value::List(items) => CborValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| Ok(encode_value(item, &format!("{path}[{i}]"))?.into_cbor()))
                .collect::<Result<_>>()?,
        ),
        Value::Map(entries) => CborValue::Map(
            entries
                .iter()
                .map(|(key, item)| {
                    let tagged = encode_value(item, &format!("{path}.{key}"))?;
                    Ok((CborValue::Text(key.clone()), tagged.into_cbor()))
                })
                .collect::<Result<_>>()?,
        ),
        Value::Extension(ext) => {
            let name = ext.type_name();
            if BuiltinType::from_name(name).is_some() {
                return Err(CodecError::encoding(
                    path,
                    format!("extension uses built-in type name {name}"),
                ));
            }
            ext.to_cbor()
                .map_err(|e| CodecError::encoding(path, format!("{name}: {e}")))?
        }
        Value::Opaque(handle) => {
            return Err(CodecError::encoding(
                path,
                format!("live handle of type {} has no wire form", handle.type_name()),
            ))
        }
    };
    Ok(Tagged(value.type_name().to_string(), payload))
}

// ============================================================================
// Decode
// ============================================================================

/// Decode CBOR bytes into a holder, resolving leaf types via `resolver`.
pub fn decode_holder(resolver: &dyn TypeResolver, data: &[u8]) -> Result<Holder> {
    let mut remaining = data;
    let wire: WireHolder = ciborium::from_reader(&mut remaining)
        .map_err(|e| CodecError::Decoding(e.to_string()))?;
    if !remaining.is_empty() {
        return Err(CodecError::Decoding(format!(
            "{} trailing bytes after holder",
            remaining.len()
        )));
    }

    Ok(Holder {
        exchange_id: wire.id,
        message_id: wire.message_id,
        body: wire
            .body
            .map(|body| decode_value(resolver, body, "body"))
            .transpose()?,
        headers: decode_entries(resolver, wire.headers, "headers")?,
        properties: decode_entries(resolver, wire.properties, "properties")?,
        from_endpoint: wire.from_endpoint,
        fault: wire.fault,
        dropped: wire.dropped,
    })
}

/// Buffer `reader` to the end, then decode.
pub fn decode_holder_from<R: Read>(resolver: &dyn TypeResolver, mut reader: R) -> Result<Holder> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| CodecError::Decoding(e.to_string()))?;
    decode_holder(resolver, &buf)
}

fn decode_entries(
    resolver: &dyn TypeResolver,
    entries: BTreeMap<String, Tagged>,
    scope: &str,
) -> Result<BTreeMap<String, Value>> {
    entries
        .into_iter()
        .map(|(name, tagged)| {
            let value = decode_value(resolver, tagged, &format!("{scope}.{name}"))?;
            Ok((name, value))
        })
        .collect()
}

fn decode_value(resolver: &dyn TypeResolver, tagged: Tagged, path: &str) -> Result<Value> {
    let Tagged(type_name, payload) = tagged;
    match resolve_with_fallback(resolver, &type_name) {
        Some(TypeDescriptor::Builtin(builtin)) => decode_builtin(resolver, builtin, payload, path),
        Some(TypeDescriptor::Extension(ty)) => ty
            .decode(payload)
            .map(Value::Extension)
            .map_err(|e| CodecError::decoding(path, format!("{type_name}: {e}"))),
        None => Err(CodecError::UnresolvedType {
            type_name,
            path: path.to_string(),
        }),
    }
}

fn decode_builtin(
    resolver: &dyn TypeResolver,
    builtin: BuiltinType,
    payload: CborValue,
    path: &str,
) -> Result<Value> {
    let value = match (builtin, payload) {
        (BuiltinType::Null, CborValue::Null) => Value::Null,
        (BuiltinType::Bool, CborValue::Bool(v)) => Value::Bool(v),
        (BuiltinType::Int, CborValue::Integer(v)) => Value::Int(
            i32::try_from(v).map_err(|_| CodecError::decoding(path, "int out of range"))?,
        ),
        (BuiltinType::Long, CborValue::Integer(v)) => Value::Long(
            i64::try_from(v).map_err(|_| CodecError::decoding(path, "long out of range"))?,
        ),
        (BuiltinType::Double, CborValue::Float(v)) => Value::Double(v),
        (BuiltinType::String, CborValue::Text(v)) => Value::String(v),
        (BuiltinType::Bytes, CborValue::Bytes(v)) => Value::Bytes(v),
        (BuiltinType::List, CborValue::Array(items)) => Value::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    let tagged = Tagged::from_cbor(item, &item_path)?;
                    decode_value(resolver, tagged, &item_path)
                })
                .collect::<Result<_>>()?,
        ),
        (BuiltinType::Map, CborValue::Map(entries)) => {
            let mut map = BTreeMap::new();
            for (key, item) in entries {
                let CborValue::Text(key) = key else {
                    return Err(CodecError::decoding(path, "map key is not text"));
                };
                let item_path = format!("{path}.{key}");
                let tagged = Tagged::from_cbor(item, &item_path)?;
                let value = decode_value(resolver, tagged, &item_path)?;
                if map.insert(key, value).is_some() {
                    return Err(CodecError::decoding(&item_path, "duplicate map key"));
                }
            }
            Value::Map(map)
        }
        (builtin, _) => {
            return Err(CodecError::decoding(
                path,
                format!("payload does not match type {}", builtin.name()),
            ))
        }
    };
    Ok(value)
}

// ============================================================================
// ExchangeCodec
// ============================================================================

/// Exchange-level marshal/unmarshal. Stateless apart from its build policy,
/// so one instance can be shared across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeCodec {
    options: BuildOptions,
}

impl ExchangeCodec {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn marshal_exchange(&self, exchange: &Exchange) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.marshal_exchange_to(exchange, &mut buf)?;
        Ok(buf)
    }

    pub fn marshal_exchange_to<W: Write>(&self, exchange: &Exchange, sink: W) -> Result<()> {
        let holder = Holder::build_with(exchange, &self.options);
        encode_holder_to(&holder, sink)?;
        debug!(
            exchange_id = %exchange.id,
            dropped = holder.dropped.len(),
            "marshalled exchange"
        );
        Ok(())
    }

    pub fn unmarshal_exchange(&self, ctx: &RuntimeContext, data: &[u8]) -> Result<Exchange> {
        let holder = decode_holder(ctx, data)?;
        debug!(
            exchange_id = %holder.exchange_id,
            bytes = data.len(),
            "unmarshalled exchange"
        );
        Ok(holder.restore(ctx))
    }

    pub fn unmarshal_exchange_from<R: Read>(
        &self,
        ctx: &RuntimeContext,
        reader: R,
    ) -> Result<Exchange> {
        Ok(decode_holder_from(ctx, reader)?.restore(ctx))
    }
}
