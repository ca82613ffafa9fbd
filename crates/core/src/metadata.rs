//! A structured document carried by every [`Event`](crate::event::Event).
//!
//! A [`Metadata`] keeps both a textual representation and a parsed tree.
//! The two are kept coherent lazily: mutating one invalidates the other
//! until the caller asks for it again, at which point it is regenerated.

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Repr {
    Text(String),
    Tree(Value),
    Both(String, Value),
}

/// A document, lazily kept coherent between its textual and parsed forms.
#[derive(Debug, Clone)]
pub struct Metadata {
    repr: Repr,
}

impl Metadata {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            repr: Repr::Text(text.into()),
        }
    }

    pub fn from_tree(tree: Value) -> Self {
        Self {
            repr: Repr::Tree(tree),
        }
    }

    pub fn empty() -> Self {
        Self::from_tree(Value::Object(Default::default()))
    }

    /// Returns the textual form, regenerating it from the parsed tree if
    /// the text is currently invalid.
    pub fn text(&mut self) -> Result<&str> {
        if let Repr::Tree(tree) = &self.repr {
            let text = serde_json::to_string(tree)?;
            self.repr = Repr::Both(text, tree.clone());
        }
        match &self.repr {
            Repr::Text(t) | Repr::Both(t, _) => Ok(t),
            Repr::Tree(_) => unreachable!(),
        }
    }

    /// Returns the parsed tree, regenerating it from the text if the tree
    /// is currently invalid.
    pub fn tree(&mut self) -> Result<&Value> {
        if let Repr::Text(text) = &self.repr {
            let tree: Value = serde_json::from_str(text)
                .map_err(|e| Error::invalid_metadata(format!("not valid JSON: {e}")))?;
            self.repr = Repr::Both(text.clone(), tree);
        }
        match &self.repr {
            Repr::Tree(t) | Repr::Both(_, t) => Ok(t),
            Repr::Text(_) => unreachable!(),
        }
    }

    /// Replaces the textual form, invalidating the parsed tree.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.repr = Repr::Text(text.into());
    }

    /// Replaces the parsed tree, invalidating the textual form.
    pub fn set_tree(&mut self, tree: Value) {
        self.repr = Repr::Tree(tree);
    }

    /// Looks up the `__type__` field used by the capability factories
    /// (§4.2), defaulting to `"default"`.
    pub fn type_tag(&mut self) -> Result<String> {
        Ok(self
            .tree()?
            .get("__type__")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string())
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.tree().ok() == b.tree().ok()
    }
}
