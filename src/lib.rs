//! Snapshot codec for in-flight exchanges: build a serialization-safe
//! holder, encode it to CBOR, and restore it against a runtime context.

pub mod codec;
pub mod context;
pub mod error;
pub mod exchange;
pub mod holder;
pub mod options;
pub mod repository;
pub mod resolver;
pub mod value;

pub use codec::{decode_holder, decode_holder_from, encode_holder, encode_holder_to, ExchangeCodec};
pub use context::RuntimeContext;
pub use error::{CodecError, RepositoryError, Result};
pub use exchange::{
    Endpoint, Exchange, Fault, Message, AGGREGATED_COLLECTION_GUARD, AGGREGATED_COMPLETED_BY,
    AGGREGATED_CORRELATION_KEY, AGGREGATED_FROM_ENDPOINT, AGGREGATED_SIZE, AGGREGATED_TIMEOUT,
    RESERVED_PROPERTY_KEYS,
};
pub use holder::{BuildOptions, DroppedValue, Holder, Scope};
pub use options::CodecOptions;
pub use repository::{AggregationRepository, SqliteAggregationRepository};
pub use resolver::{
    BuiltinType, ExtensionType, ExtensionValue, SerdeType, SerdeValue, TypeDescriptor,
    TypeRegistry, TypeResolver,
};
pub use value::{Opaque, Value};
