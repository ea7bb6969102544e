//! Layered variable scope.
//!
//! Lookup walks an ordered chain: innermost block scope first, then page
//! arguments, then global/shared context arguments. An unresolved name is
//! not an error here; the evaluator maps it to the `Undefined` marker after
//! trying its zero-arity filter fallback.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::pending::CancelToken;
use crate::value::Value;

pub type ArgMap = FxHashMap<String, Value>;

/// Names the pipe-stage grammar claims for itself; they cannot be bound.
const RESERVED_BINDINGS: &[&str] = &["it", "return"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_BINDINGS.contains(&name)
}

pub struct ScopeContext {
    /// Block-scope layers, innermost last.
    layers: Vec<ArgMap>,
    page_args: Arc<RwLock<ArgMap>>,
    global_args: Arc<RwLock<ArgMap>>,
    cancel: CancelToken,
}

impl ScopeContext {
    pub fn new() -> Self {
        ScopeContext {
            layers: vec![ArgMap::default()],
            page_args: Arc::new(RwLock::new(ArgMap::default())),
            global_args: Arc::new(RwLock::new(ArgMap::default())),
            cancel: CancelToken::new(),
        }
    }

    /// A scope sharing the given global argument layer; used by contexts so
    /// concurrent page renders see one shared layer.
    pub fn with_globals(global_args: Arc<RwLock<ArgMap>>) -> Self {
        ScopeContext {
            layers: vec![ArgMap::default()],
            page_args: Arc::new(RwLock::new(ArgMap::default())),
            global_args,
            cancel: CancelToken::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        for layer in self.layers.iter().rev() {
            if let Some(value) = layer.get(name) {
                return Some(value.clone());
            }
        }
        if let Some(value) = self.page_args.read().get(name) {
            return Some(value.clone());
        }
        self.global_args.read().get(name).cloned()
    }

    /// Bind into the innermost block scope.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.layers
            .last_mut()
            .expect("scope chain always has a block layer")
            .insert(name.into(), value);
    }

    pub fn define_page(&self, name: impl Into<String>, value: Value) {
        self.page_args.write().insert(name.into(), value);
    }

    pub fn define_global(&self, name: impl Into<String>, value: Value) {
        self.global_args.write().insert(name.into(), value);
    }

    pub fn define_json(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.define(name, Value::from(value));
    }

    /// Bind any serializable host value via its JSON form.
    pub fn define_serialized<T: serde::Serialize>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<()> {
        let json = serde_json::to_value(value)?;
        self.define(name, Value::from(json));
        Ok(())
    }

    /// Remove a binding from the innermost block scope.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.layers
            .last_mut()
            .expect("scope chain always has a block layer")
            .remove(name)
    }

    pub fn push_layer(&mut self) {
        self.layers.push(ArgMap::default());
    }

    pub fn pop_layer(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for ScopeContext {
    fn default() -> Self {
        ScopeContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inner_layers_shadow_outer() {
        let mut scope = ScopeContext::new();
        scope.define("x", Value::Int(1));
        scope.push_layer();
        scope.define("x", Value::Int(2));
        assert_eq!(scope.lookup("x"), Some(Value::Int(2)));
        scope.pop_layer();
        assert_eq!(scope.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn lookup_order_is_block_then_page_then_global() {
        let mut scope = ScopeContext::new();
        scope.define_global("x", Value::Int(1));
        assert_eq!(scope.lookup("x"), Some(Value::Int(1)));
        scope.define_page("x", Value::Int(2));
        assert_eq!(scope.lookup("x"), Some(Value::Int(2)));
        scope.define("x", Value::Int(3));
        assert_eq!(scope.lookup("x"), Some(Value::Int(3)));
    }

    #[test]
    fn unresolved_name_is_none() {
        let scope = ScopeContext::new();
        assert_eq!(scope.lookup("missing"), None);
    }

    #[test]
    fn globals_are_shared_between_scopes() {
        let globals = Arc::new(RwLock::new(ArgMap::default()));
        let a = ScopeContext::with_globals(globals.clone());
        let b = ScopeContext::with_globals(globals);
        a.define_global("site", Value::text("pexl"));
        assert_eq!(b.lookup("site"), Some(Value::text("pexl")));
    }

    #[test]
    fn serialized_host_values_become_script_values() {
        let mut scope = ScopeContext::new();
        scope
            .define_serialized("point", &serde_json::json!({"x": 1, "y": 2}))
            .unwrap();
        match scope.lookup("point") {
            Some(Value::Map(entries)) => assert_eq!(entries.read()["x"], Value::Int(1)),
            other => panic!("expected a map, got {other:?}"),
        }
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved("it"));
        assert!(is_reserved("return"));
        assert!(!is_reserved("arg"));
    }
}
