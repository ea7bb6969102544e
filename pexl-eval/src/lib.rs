/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Evaluator for the PEXL page expression language.
//!
//! This crate evaluates expressions parsed by the `pexl-parser` crate in
//! the same workspace against a layered variable scope, threading values
//! through `|>` pipe chains of host-registered filters.
//!
//! # How to use
//! The `eval` function evaluates standalone fragments against a fresh
//! context with the default filter set:
//!
//! ```rust
//! use pexl_eval::eval;
//! assert_eq!(eval("'Hello ' + 'World'").unwrap().render(), "Hello World");
//! ```
//!
//! Hosts that render pages hold a [`ScriptContext`] (filters, caches,
//! shared arguments) and create one scope per render:
//!
//! ```rust
//! use pexl_eval::{Evaluator, ScriptContext, Value};
//!
//! let context = ScriptContext::new();
//! context.arg("price", Value::Int(100));
//! let mut scope = context.new_scope();
//! let result = Evaluator::new(&context)
//!     .eval("price |> incr |> currency", &mut scope)
//!     .unwrap();
//! assert_eq!(result, Value::text("$101.00"));
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod eval;
pub mod methods;
pub mod pending;
pub mod registry;
pub mod scope;
pub mod value;

pub use cache::ExpiringCache;
pub use context::ScriptContext;
pub use error::{EvalError, Result, ScriptError, SyntaxError};
pub use eval::Evaluator;
pub use methods::DefaultMethods;
pub use pending::{CancelToken, Deferred};
pub use registry::{Invoker, InvokerKey, MethodRegistry, MethodSet, MethodSpec, ScriptMethods};
pub use scope::ScopeContext;
pub use value::{Callable, ReturnSignal, Truthy, Value};

/// Evaluate a standalone fragment against a fresh default context.
pub fn eval(input: &str) -> Result<Value> {
    let context = ScriptContext::new();
    let mut scope = context.new_scope();
    Evaluator::new(&context).eval(input, &mut scope)
}

/// Evaluate against an existing context, in a fresh scope.
pub fn eval_in_context(input: &str, context: &ScriptContext) -> Result<Value> {
    let mut scope = context.new_scope();
    Evaluator::new(context).eval(input, &mut scope)
}

/// Evaluate against an existing context and scope, preserving bindings the
/// fragment makes for later fragments of the same render.
pub fn eval_with_scope(
    input: &str,
    context: &ScriptContext,
    scope: &mut ScopeContext,
) -> Result<Value> {
    Evaluator::new(context).eval(input, scope)
}
