//! Context-bound type resolution for extension values.
//!
//! Decoding never consults a process-global registry. The caller passes a
//! [`TypeResolver`] scoped to its runtime; names it does not know fall back
//! to the built-in set and otherwise fail closed.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ciborium::value::Value as CborValue;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;
use crate::value::Value;

// ============================================================================
// Extension traits
// ============================================================================

/// A value whose type is defined outside this crate.
pub trait ExtensionValue: fmt::Debug + Send + Sync {
    /// Name under which the owning [`ExtensionType`] is registered.
    fn type_name(&self) -> &str;

    /// Structured payload written after the type name.
    fn to_cbor(&self) -> Result<CborValue, String>;

    fn as_any(&self) -> &dyn Any;
}

/// Reconstructs [`ExtensionValue`]s of one named type.
pub trait ExtensionType: Send + Sync {
    fn type_name(&self) -> &str;

    fn decode(&self, payload: CborValue) -> Result<Arc<dyn ExtensionValue>, String>;
}

// ============================================================================
// Descriptors
// ============================================================================

/// Always-available leaf and container types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    Null,
    Bool,
    Int,
    Long,
    Double,
    String,
    Bytes,
    List,
    Map,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 9] = [
        BuiltinType::Null,
        BuiltinType::Bool,
        BuiltinType::Int,
        BuiltinType::Long,
        BuiltinType::Double,
        BuiltinType::String,
        BuiltinType::Bytes,
        BuiltinType::List,
        BuiltinType::Map,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Null => "null",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Long => "long",
            BuiltinType::Double => "double",
            BuiltinType::String => "string",
            BuiltinType::Bytes => "bytes",
            BuiltinType::List => "list",
            BuiltinType::Map => "map",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

#[derive(Clone)]
pub enum TypeDescriptor {
    Builtin(BuiltinType),
    Extension(Arc<dyn ExtensionType>),
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        match self {
            TypeDescriptor::Builtin(b) => b.name(),
            TypeDescriptor::Extension(ext) => ext.type_name(),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Builtin(b) => write!(f, "Builtin({})", b.name()),
            TypeDescriptor::Extension(ext) => write!(f, "Extension({})", ext.type_name()),
        }
    }
}

/// Maps a wire type name to something that can rebuild the value.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<TypeDescriptor>;
}

/// Context types first, then built-ins, nothing else.
pub(crate) fn resolve_with_fallback(
    resolver: &dyn TypeResolver,
    name: &str,
) -> Option<TypeDescriptor> {
    resolver
        .resolve(name)
        .or_else(|| BuiltinType::from_name(name).map(TypeDescriptor::Builtin))
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// The active type space of one runtime context.
///
/// Extensions register on load and unregister on unload; lookups always see
/// the current set.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<dyn ExtensionType>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, returning the one it replaced. Built-in names are
    /// refused so an extension value can never decode as a plain built-in.
    pub fn register(
        &self,
        ty: Arc<dyn ExtensionType>,
    ) -> Result<Option<Arc<dyn ExtensionType>>, CodecError> {
        let name = ty.type_name();
        if BuiltinType::from_name(name).is_some() {
            return Err(CodecError::ReservedTypeName(name.to_string()));
        }
        let name = name.to_string();
        Ok(self.types.write().insert(name, ty))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.types.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl TypeResolver for TypeRegistry {
    fn resolve(&self, name: &str) -> Option<TypeDescriptor> {
        self.types
            .read()
            .get(name)
            .cloned()
            .map(TypeDescriptor::Extension)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

// ============================================================================
// Serde-backed extensions
// ============================================================================

/// An [`ExtensionType`] for any serde type, registered under a fixed name.
pub struct SerdeType<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeType<T>
where
    T: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Wrap a value so it carries this type's name.
    pub fn value(&self, value: T) -> Value {
        Value::Extension(Arc::new(SerdeValue::new(self.name.clone(), value)))
    }
}

impl<T> ExtensionType for SerdeType<T>
where
    T: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        &self.name
    }

    fn decode(&self, payload: CborValue) -> Result<Arc<dyn ExtensionValue>, String> {
        let value: T = payload.deserialized().map_err(|e| e.to_string())?;
        Ok(Arc::new(SerdeValue::new(self.name.clone(), value)))
    }
}

#[derive(Debug)]
pub struct SerdeValue<T> {
    type_name: String,
    value: T,
}

impl<T> SerdeValue<T> {
    pub fn new(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T> ExtensionValue for SerdeValue<T>
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn to_cbor(&self) -> Result<CborValue, String> {
        CborValue::serialized(&self.value).map_err(|e| e.to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
