//! Capability Registry
//!
//! The registry owns every capability descriptor, built-in or generated,
//! together with the handler that runs it. It is shared between sessions as
//! `Arc<CapabilityRegistry>`; the write lock is held only while one entry is
//! inserted or replaced, so a registration is visible to every session as
//! soon as `register` returns.

use sdk::capability::Capability;
use sdk::descriptor::{CapabilityDescriptor, Origin, SchemaError};
use sdk::errors::EngineError;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid descriptor: {0}")]
    Schema(#[from] SchemaError),

    #[error("built-in capability '{0}' cannot be replaced")]
    BuiltinOverride(String),

    #[error("capability '{0}' not found")]
    NotFound(String),

    #[error("capability '{name}' is at version {found}, expected {expected}")]
    VersionConflict {
        name: String,
        expected: u32,
        found: u32,
    },
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Duplicate(name) => EngineError::DuplicateCapability(name),
            RegistryError::Schema(e) => EngineError::InvalidSchema(e.to_string()),
            RegistryError::BuiltinOverride(name) => EngineError::BuiltinOverride(name),
            RegistryError::NotFound(name) => EngineError::CapabilityNotFound(name),
            RegistryError::VersionConflict {
                name,
                expected,
                found,
            } => EngineError::VersionConflict {
                name,
                expected,
                found,
            },
        }
    }
}

/// A descriptor together with the handler that runs it
#[derive(Clone)]
pub struct RegisteredCapability {
    pub descriptor: CapabilityDescriptor,
    pub handler: Arc<dyn Capability>,
}

impl std::fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCapability")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Shared registry of invocable capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<BTreeMap<String, RegisteredCapability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new capability.
    ///
    /// # Errors
    ///
    /// - `Schema` if the descriptor is malformed
    /// - `BuiltinOverride` if a generated descriptor names a built-in
    /// - `Duplicate` if the name is already taken
    pub fn register(
        &self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn Capability>,
    ) -> Result<(), RegistryError> {
        descriptor.validate_schema()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&descriptor.name) {
            if existing.descriptor.origin == Origin::Builtin && descriptor.origin == Origin::Generated
            {
                warn!("Rejected generated override of built-in {}", descriptor.name);
                return Err(RegistryError::BuiltinOverride(descriptor.name));
            }
            return Err(RegistryError::Duplicate(descriptor.name));
        }

        info!(
            "Registered {} v{} ({}, {})",
            descriptor.name, descriptor.version, descriptor.origin, descriptor.side_effect
        );
        entries.insert(
            descriptor.name.clone(),
            RegisteredCapability {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Replace a generated capability with a new version.
    ///
    /// Succeeds only when the current entry is `generated` and still at
    /// `expected_version`; the new descriptor is stored as
    /// `expected_version + 1`. Two sessions regenerating the same capability
    /// cannot both win.
    pub fn supersede(
        &self,
        mut descriptor: CapabilityDescriptor,
        handler: Arc<dyn Capability>,
        expected_version: u32,
    ) -> Result<CapabilityDescriptor, RegistryError> {
        descriptor.validate_schema()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let current = entries
            .get(&descriptor.name)
            .ok_or_else(|| RegistryError::NotFound(descriptor.name.clone()))?;

        if current.descriptor.origin == Origin::Builtin {
            return Err(RegistryError::BuiltinOverride(descriptor.name));
        }
        if current.descriptor.version != expected_version {
            return Err(RegistryError::VersionConflict {
                name: descriptor.name,
                expected: expected_version,
                found: current.descriptor.version,
            });
        }

        descriptor.origin = Origin::Generated;
        descriptor.version = expected_version + 1;
        info!("Superseded {} with v{}", descriptor.name, descriptor.version);

        entries.insert(
            descriptor.name.clone(),
            RegisteredCapability {
                descriptor: descriptor.clone(),
                handler,
            },
        );
        Ok(descriptor)
    }

    /// Look up a capability by qualified name
    pub fn resolve(&self, name: &str) -> Result<RegisteredCapability, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let found = entries.get(name).cloned();
        debug!("resolve {} -> {}", name, found.is_some());
        found.ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Descriptors sorted by name, optionally restricted to one namespace
    pub fn list(&self, namespace: Option<&str>) -> Vec<CapabilityDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .filter(|entry| namespace.map_or(true, |ns| entry.descriptor.namespace() == ns))
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Qualified names currently taken
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
