//! The script context: registry, caches and shared arguments.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use pexl_parser::ast::Pipeline;
use pexl_parser::Parser;

use crate::cache::ExpiringCache;
use crate::error::{EvalError, Result, ScriptError};
use crate::methods::DefaultMethods;
use crate::registry::{MethodRegistry, ScriptMethods};
use crate::scope::{ArgMap, ScopeContext};
use crate::value::Value;

/// Owns the method registry, the expiring cache, the AST cache and the
/// global argument layer shared by every scope created from this context.
/// Two independently constructed contexts share no cache state.
pub struct ScriptContext {
    registry: MethodRegistry,
    expiring_cache: ExpiringCache,
    ast_cache: DashMap<String, Arc<Pipeline>>,
    global_args: Arc<RwLock<ArgMap>>,
}

impl ScriptContext {
    /// A context with the default filter set registered.
    pub fn new() -> Self {
        let context = ScriptContext::empty();
        context.register(Arc::new(DefaultMethods::new()));
        context
    }

    /// A context with no providers registered.
    pub fn empty() -> Self {
        ScriptContext {
            registry: MethodRegistry::new(),
            expiring_cache: ExpiringCache::new(),
            ast_cache: DashMap::new(),
            global_args: Arc::new(RwLock::new(ArgMap::default())),
        }
    }

    pub fn register(&self, provider: Arc<dyn ScriptMethods>) {
        self.registry.register(provider);
    }

    pub fn register_preferred(&self, provider: Arc<dyn ScriptMethods>) {
        self.registry.register_preferred(provider);
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn expiring_cache(&self) -> &ExpiringCache {
        &self.expiring_cache
    }

    /// Set a global/shared argument visible to every scope of this context.
    pub fn arg(&self, name: impl Into<String>, value: Value) {
        self.global_args.write().insert(name.into(), value);
    }

    /// A fresh scope chain sharing this context's global argument layer.
    pub fn new_scope(&self) -> ScopeContext {
        ScopeContext::with_globals(self.global_args.clone())
    }

    /// Parse a pipeline, memoized by raw source text so identical fragments
    /// evaluated across requests parse once.
    pub fn parse(&self, source: &str) -> Result<Arc<Pipeline>> {
        if let Some(cached) = self.ast_cache.get(source) {
            return Ok(cached.clone());
        }
        let pipeline = Parser::parse_pipeline(source)
            .map_err(|e| ScriptError::new(source, EvalError::Syntax(e)))?;
        let pipeline = Arc::new(pipeline);
        self.ast_cache
            .insert(source.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    pub fn ast_cache_len(&self) -> usize {
        self.ast_cache.len()
    }

    /// Drop all cached state. Entries never expire implicitly; this is the
    /// only point the expiring cache empties short of dropping the context.
    pub fn reset(&self) {
        self.expiring_cache.clear();
        self.ast_cache.clear();
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        ScriptContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_is_memoized_by_source_text() {
        let context = ScriptContext::new();
        let first = context.parse("1 + 2 |> incr").unwrap();
        let second = context.parse("1 + 2 |> incr").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(context.ast_cache_len(), 1);
    }

    #[test]
    fn parse_errors_carry_the_syntax_kind() {
        let context = ScriptContext::new();
        let err = context.parse("1 +").unwrap_err();
        assert!(matches!(err.kind(), EvalError::Syntax(_)));
    }

    #[test]
    fn reset_clears_caches() {
        let context = ScriptContext::new();
        context.parse("1").unwrap();
        context.expiring_cache().set("k", Value::Int(1));
        context.reset();
        assert_eq!(context.ast_cache_len(), 0);
        assert_eq!(context.expiring_cache().len(), 0);
    }

    #[test]
    fn contexts_share_no_cache_state() {
        let a = ScriptContext::new();
        let b = ScriptContext::new();
        a.parse("1 + 2").unwrap();
        a.registry().resolve("incr", 1);
        a.expiring_cache().set("k", Value::Int(1));
        assert_eq!(b.ast_cache_len(), 0);
        assert_eq!(b.registry().cache_len(), 0);
        assert_eq!(b.expiring_cache().len(), 0);
    }

    #[test]
    fn global_args_flow_into_new_scopes() {
        let context = ScriptContext::new();
        context.arg("site", Value::text("pexl"));
        assert_eq!(
            context.new_scope().lookup("site"),
            Some(Value::text("pexl"))
        );
    }
}
