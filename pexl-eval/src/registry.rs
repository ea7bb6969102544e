//! Filter providers and the per-context invoker cache.
//!
//! Filters are registered by host-supplied providers and resolved by
//! `(name, arity)` only; there is no type-based overload resolution. A
//! resolution, hit or miss, is memoized per registry instance, and two
//! independently constructed registries never share cache state.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::scope::ScopeContext;
use crate::value::Value;

pub type Invoker = Arc<dyn Fn(&mut ScopeContext, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A resolved filter binding: the callable plus its declared arity and
/// whether results may be memoized in the owning context's expiring cache.
#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub arity: usize,
    pub cacheable: bool,
    pub invoker: Invoker,
}

impl MethodSpec {
    pub fn new<F>(name: impl Into<String>, arity: usize, func: F) -> Self
    where
        F: Fn(&mut ScopeContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        MethodSpec {
            name: name.into(),
            arity,
            cacheable: false,
            invoker: Arc::new(func),
        }
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodSpec({}/{})", self.name, self.arity)
    }
}

/// A provider of named filter operations, distinguished by arity only.
pub trait ScriptMethods: Send + Sync {
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &str;

    fn find(&self, name: &str, arity: usize) -> Option<MethodSpec>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokerKey {
    pub name: String,
    pub arity: usize,
}

impl InvokerKey {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        InvokerKey {
            name: name.into(),
            arity,
        }
    }
}

/// A map-backed [`ScriptMethods`] provider: a name→callable mapping built
/// at startup rather than discovered by scanning.
pub struct MethodSet {
    name: String,
    methods: FxHashMap<InvokerKey, MethodSpec>,
}

impl MethodSet {
    pub fn named(name: impl Into<String>) -> Self {
        MethodSet {
            name: name.into(),
            methods: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, spec: MethodSpec) {
        self.methods
            .insert(InvokerKey::new(spec.name.clone(), spec.arity), spec);
    }

    pub fn method<F>(&mut self, name: &str, arity: usize, func: F)
    where
        F: Fn(&mut ScopeContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(MethodSpec::new(name, arity, func));
    }

    pub fn cacheable_method<F>(&mut self, name: &str, arity: usize, func: F)
    where
        F: Fn(&mut ScopeContext, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(MethodSpec::new(name, arity, func).cacheable());
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl ScriptMethods for MethodSet {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn find(&self, name: &str, arity: usize) -> Option<MethodSpec> {
        self.methods
            .get(&InvokerKey::new(name, arity))
            .cloned()
    }
}

struct Providers {
    /// Providers inserted ahead of the scan-registered list; they win
    /// regardless of registration order.
    preferred: usize,
    items: Vec<Arc<dyn ScriptMethods>>,
}

/// Ordered provider list plus the per-instance `(name, arity)` memo.
/// Duplicate registrations without a precedence marker resolve by
/// registration order: first registered wins.
pub struct MethodRegistry {
    providers: RwLock<Providers>,
    cache: DashMap<InvokerKey, Option<MethodSpec>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry {
            providers: RwLock::new(Providers {
                preferred: 0,
                items: Vec::new(),
            }),
            cache: DashMap::new(),
        }
    }

    pub fn register(&self, provider: Arc<dyn ScriptMethods>) {
        {
            let mut providers = self.providers.write();
            providers.items.push(provider);
        }
        // bindings may have changed; memoized misses would hide the new provider
        self.cache.clear();
    }

    pub fn register_preferred(&self, provider: Arc<dyn ScriptMethods>) {
        {
            let mut providers = self.providers.write();
            let at = providers.preferred;
            providers.items.insert(at, provider);
            providers.preferred += 1;
        }
        self.cache.clear();
    }

    /// Resolve `(name, arity)` by scanning providers in order, memoizing
    /// both hits and misses.
    pub fn resolve(&self, name: &str, arity: usize) -> Option<MethodSpec> {
        let key = InvokerKey::new(name, arity);
        let entry = self.cache.entry(key).or_insert_with(|| {
            let providers = self.providers.read();
            let resolved = providers
                .items
                .iter()
                .find_map(|provider| provider.find(name, arity));
            trace!(
                filter = name,
                arity,
                resolved = resolved.is_some(),
                "resolved filter binding"
            );
            resolved
        });
        entry.value().clone()
    }

    /// Memoized resolutions (hits and misses), inspectable for diagnostics.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.read().items.len()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        MethodRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider(provider_name: &str, filter: &str, result: i64) -> Arc<dyn ScriptMethods> {
        let mut set = MethodSet::named(provider_name);
        set.method(filter, 0, move |_, _| Ok(Value::Int(result)));
        Arc::new(set)
    }

    fn invoke(registry: &MethodRegistry, name: &str) -> Value {
        let spec = registry.resolve(name, 0).unwrap();
        (spec.invoker)(&mut ScopeContext::new(), &[]).unwrap()
    }

    #[test]
    fn resolves_by_name_and_arity() {
        let registry = MethodRegistry::new();
        registry.register(provider("p", "f", 1));
        assert!(registry.resolve("f", 0).is_some());
        assert!(registry.resolve("f", 2).is_none());
        assert!(registry.resolve("g", 0).is_none());
    }

    #[test]
    fn first_registered_wins() {
        let registry = MethodRegistry::new();
        registry.register(provider("first", "f", 1));
        registry.register(provider("second", "f", 2));
        assert_eq!(invoke(&registry, "f"), Value::Int(1));
    }

    #[test]
    fn preferred_providers_win_regardless_of_order() {
        let registry = MethodRegistry::new();
        registry.register(provider("scanned", "f", 1));
        registry.register_preferred(provider("preferred", "f", 2));
        assert_eq!(invoke(&registry, "f"), Value::Int(2));

        // later preferred registrations stay ahead of the scanned list
        registry.register_preferred(provider("preferred2", "g", 3));
        registry.register(provider("scanned2", "g", 4));
        assert_eq!(invoke(&registry, "g"), Value::Int(3));
    }

    #[test]
    fn hits_and_misses_are_memoized() {
        let registry = MethodRegistry::new();
        registry.register(provider("p", "f", 1));
        assert_eq!(registry.cache_len(), 0);
        registry.resolve("f", 0);
        registry.resolve("missing", 0);
        registry.resolve("missing", 0);
        assert_eq!(registry.cache_len(), 2);
    }

    #[test]
    fn registration_clears_memoized_misses() {
        let registry = MethodRegistry::new();
        assert!(registry.resolve("f", 0).is_none());
        registry.register(provider("p", "f", 1));
        assert!(registry.resolve("f", 0).is_some());
    }

    #[test]
    fn independent_registries_never_share_cache_state() {
        let a = MethodRegistry::new();
        let b = MethodRegistry::new();
        a.register(provider("p", "f", 1));
        a.resolve("f", 0);
        assert_eq!(a.cache_len(), 1);
        assert_eq!(b.cache_len(), 0);
    }
}
