//! The hosting runtime's view exposed to the restore path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::exchange::Endpoint;
use crate::resolver::{TypeDescriptor, TypeRegistry, TypeResolver};

/// Running endpoints plus the active type space.
///
/// Both sets change while the runtime is up; restore always sees the
/// current state.
pub struct RuntimeContext {
    name: String,
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    types: Arc<TypeRegistry>,
}

impl RuntimeContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_types(name, Arc::new(TypeRegistry::new()))
    }

    /// Share a registry between contexts that load the same extensions.
    pub fn with_types(name: impl Into<String>, types: Arc<TypeRegistry>) -> Self {
        Self {
            name: name.into(),
            endpoints: RwLock::new(HashMap::new()),
            types,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Add an endpoint, or return the existing one with the same URI.
    pub fn add_endpoint(&self, uri: &str) -> Arc<Endpoint> {
        self.endpoints
            .write()
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(Endpoint::new(uri)))
            .clone()
    }

    pub fn remove_endpoint(&self, uri: &str) -> bool {
        self.endpoints.write().remove(uri).is_some()
    }

    pub fn endpoint(&self, uri: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(uri).cloned()
    }
}

impl TypeResolver for RuntimeContext {
    fn resolve(&self, name: &str) -> Option<TypeDescriptor> {
        self.types.resolve(name)
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uris: Vec<String> = self.endpoints.read().keys().cloned().collect();
        uris.sort();
        f.debug_struct("RuntimeContext")
            .field("name", &self.name)
            .field("endpoints", &uris)
            .field("types", &self.types)
            .finish()
    }
}
