//! Variable scopes
//!
//! Scopes form a chain: `$let`, `$filter`, `$map`, `$reduce` and lookup
//! sub-pipelines each push a child scope that borrows its parent. A child
//! never writes into its parent, so bindings cannot leak out of the
//! construct that introduced them.

use crate::value::Value;

#[derive(Debug, Default)]
pub struct Variables<'p> {
    parent: Option<&'p Variables<'p>>,
    bindings: Vec<(String, Value)>,
}

impl<'p> Variables<'p> {
    /// An empty root scope
    pub fn new() -> Self {
        Self::default()
    }

    /// A child scope holding `bindings`, shadowing any outer names
    pub fn child(&'p self, bindings: Vec<(String, Value)>) -> Variables<'p> {
        Variables {
            parent: Some(self),
            bindings,
        }
    }

    /// A child scope with a single binding
    pub fn bind(&'p self, name: impl Into<String>, value: Value) -> Variables<'p> {
        self.child(vec![(name.into(), value)])
    }

    /// Looks a name up through the scope chain, innermost first
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.parent.map_or(true, |p| p.is_empty())
    }
}
