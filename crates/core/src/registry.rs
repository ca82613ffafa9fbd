//! Generic `__type__`-keyed factory registry (§4.2, §9).
//!
//! The C++ core resolves implementations through global static
//! registrar objects that run at library-load time. Per §9's redesign
//! flag, this instead is an explicit registry a caller constructs and
//! populates at a known call site: no hidden global state, and adding
//! an implementation is a normal function call instead of a macro that
//! hopes its constructor runs before main.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::metadata::Metadata;

/// A factory keyed by the `__type__` tag found in a capability's stored
/// [`Metadata`], producing the corresponding implementation.
pub struct Registry<T: ?Sized> {
    factories: HashMap<String, Box<dyn Fn(&Metadata) -> Result<Box<T>> + Send + Sync>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `type_name`. Overwrites any factory
    /// previously registered under the same name.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&Metadata) -> Result<Box<T>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    /// Builds an implementation from stored `metadata`, dispatching on
    /// its `__type__` field (defaulting to `"default"`).
    pub fn create(&self, metadata: &Metadata) -> Result<Box<T>> {
        let mut tmp = metadata.clone();
        let type_name = tmp.type_tag()?;
        let factory = self
            .factories
            .get(type_name.as_str())
            .ok_or_else(|| Error::invalid_config(format!("no factory registered for type '{type_name}'")))?;
        factory(metadata)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DefaultValidator, Validator};

    #[test]
    fn creates_registered_default() {
        let mut registry: Registry<dyn Validator> = Registry::new();
        registry.register("default", |_m| Ok(Box::new(DefaultValidator)));
        let made = registry.create(&Metadata::empty()).unwrap();
        let mut md = Metadata::empty();
        let data = crate::data::Data::empty();
        assert!(made.validate(&mut md, &data).is_ok());
    }

    #[test]
    fn unknown_type_errors() {
        let registry: Registry<dyn Validator> = Registry::new();
        let md = Metadata::from_tree(serde_json::json!({"__type__": "nope"}));
        assert!(registry.create(&md).is_err());
    }
}
