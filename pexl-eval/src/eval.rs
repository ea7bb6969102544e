//! The tree-walking evaluator.
//!
//! Walks a parsed [`Pipeline`] against a [`ScopeContext`], threading values
//! through `|>` stages, consulting the context's method registry for filter
//! calls and its expiring cache for cacheable results. Pending filter
//! results are settled with a resumption loop before dependent stages run,
//! so ordering stays left-to-right within one chain.

use std::time::Duration;

use indexmap::IndexMap;
use pexl_parser::ast::{
    BinaryOp, Expression, Literal, LogicalOp, Pipeline, TemplatePart, UnaryOp,
};
use tracing::{debug, trace};

use crate::context::ScriptContext;
use crate::error::{EvalError, Result, ScriptError};
use crate::registry::MethodSpec;
use crate::scope::{self, ScopeContext};
use crate::value::{ReturnSignal, Truthy, Value};

/// How long one settle iteration blocks before re-checking cancellation.
const SETTLE_SLICE: Duration = Duration::from_millis(10);

type EvalResult<T = Value> = std::result::Result<T, EvalError>;

pub struct Evaluator<'c> {
    context: &'c ScriptContext,
}

impl<'c> Evaluator<'c> {
    pub fn new(context: &'c ScriptContext) -> Self {
        Evaluator { context }
    }

    /// Evaluate a source fragment. The result may be the `Undefined`
    /// marker, or a `Return` signal the host must honor by terminating
    /// page output early.
    pub fn eval(&self, source: &str, scope: &mut ScopeContext) -> Result<Value> {
        let pipeline = self.context.parse(source)?;
        debug!(source, "evaluating");
        self.eval_pipeline(&pipeline, scope)
            .map_err(|kind| ScriptError::new(source, kind))
    }

    /// Evaluate and render as page text: empty for `Undefined`/`Null`, the
    /// signal's value for an early return.
    pub fn render(&self, source: &str, scope: &mut ScopeContext) -> Result<String> {
        Ok(self.eval(source, scope)?.render())
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, scope: &mut ScopeContext) -> EvalResult {
        let source = self.eval_expr(&pipeline.source, scope)?;
        let mut value = self.settle(source, scope)?;
        for stage in &pipeline.stages {
            value = self.eval_stage(value, stage, scope)?;
            if matches!(value, Value::Return(_)) {
                break;
            }
        }
        Ok(value)
    }

    /// One `|>` stage: the piped value is threaded as the first positional
    /// argument, except for the binding, guard and return forms the stage
    /// grammar claims.
    fn eval_stage(
        &self,
        piped: Value,
        stage: &Expression,
        scope: &mut ScopeContext,
    ) -> EvalResult {
        let (name, args) = match stage {
            Expression::Call { callee, args } => match callee.as_ref() {
                Expression::Identifier(name) => (name, args),
                _ => {
                    return Err(EvalError::NotSupported(
                        "pipe stage must name a filter".into(),
                    ))
                }
            },
            _ => {
                return Err(EvalError::NotSupported(
                    "pipe stage must be a filter call".into(),
                ))
            }
        };

        match name.as_str() {
            // `|> assignTo: name` and `|> to => name` are identical
            "assignTo" | "to" => {
                let target = binding_target(name, args)?;
                if scope::is_reserved(&target) {
                    return Err(EvalError::NotSupported(format!(
                        "cannot bind reserved name '{target}'"
                    )));
                }
                scope.define(target, piped);
                Ok(Value::Undefined)
            }
            "do" => {
                if piped.is_null() || piped.is_undefined() {
                    return Ok(Value::Undefined);
                }
                let [body] = args.as_slice() else {
                    return Err(EvalError::NotSupported(
                        "do expects a single expression".into(),
                    ));
                };
                // the body runs in the current scope so its assignments
                // persist; only the item binding is restored afterwards
                let shadowed = scope.remove("it");
                scope.define("it", piped);
                let result = self
                    .eval_expr(body, scope)
                    .and_then(|v| self.settle(v, scope));
                match shadowed {
                    Some(previous) => scope.define("it", previous),
                    None => {
                        scope.remove("it");
                    }
                }
                result?;
                Ok(Value::Undefined)
            }
            "return" => {
                let options = match args.as_slice() {
                    [] => None,
                    [options_expr] => {
                        let evaluated = self.eval_expr(options_expr, scope)?;
                        match self.settle(evaluated, scope)? {
                            Value::Map(entries) => Some(entries.read().clone()),
                            other => {
                                return Err(EvalError::NotSupported(format!(
                                    "return options must be a map, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    _ => {
                        return Err(EvalError::NotSupported(
                            "return accepts at most one options map".into(),
                        ))
                    }
                };
                Ok(Value::Return(Box::new(ReturnSignal {
                    value: piped,
                    options,
                })))
            }
            _ => {
                let mut call_args = Vec::with_capacity(1 + args.len());
                call_args.push(piped);
                for arg in args {
                    let evaluated = self.eval_expr(arg, scope)?;
                    call_args.push(self.settle(evaluated, scope)?);
                }
                let arity = call_args.len();
                let spec = self.context.registry().resolve(name, arity).ok_or_else(|| {
                    EvalError::UnknownFilter {
                        name: name.clone(),
                        arity,
                    }
                })?;
                let result = self.invoke(&spec, &call_args, scope)?;
                self.settle(result, scope)
            }
        }
    }

    fn eval_expr(&self, expr: &Expression, scope: &mut ScopeContext) -> EvalResult {
        match expr {
            Expression::Literal(literal) => Ok(literal_value(literal)),
            Expression::Identifier(name) => self.eval_identifier(name, scope),
            Expression::Unary { op, operand } => {
                let value = self.eval_expr(operand, scope)?;
                let value = self.settle(value, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(value.is_falsey())),
                    UnaryOp::Minus => match value {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(n) => Ok(Value::Float(-n)),
                        Value::Undefined => Err(undefined(operand)),
                        other => Err(EvalError::NotSupported(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expression::Binary { op, left, right } => {
                let lhs = self.eval_expr(left, scope)?;
                let lhs = self.settle(lhs, scope)?;
                let rhs = self.eval_expr(right, scope)?;
                let rhs = self.settle(rhs, scope)?;
                binary_op(*op, &lhs, &rhs, left, right)
            }
            Expression::Logical { op, left, right } => {
                let lhs = self.eval_expr(left, scope)?;
                let lhs = self.settle(lhs, scope)?;
                match op {
                    LogicalOp::And if lhs.is_falsey() => Ok(lhs),
                    LogicalOp::Or if lhs.is_truthy() => Ok(lhs),
                    _ => {
                        let rhs = self.eval_expr(right, scope)?;
                        self.settle(rhs, scope)
                    }
                }
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.eval_expr(test, scope)?;
                if self.settle(test, scope)?.is_truthy() {
                    self.eval_expr(consequent, scope)
                } else {
                    self.eval_expr(alternate, scope)
                }
            }
            Expression::Member {
                object,
                property,
                computed,
            } => {
                let target = self.eval_expr(object, scope)?;
                let target = self.settle(target, scope)?;
                if target.is_null() || target.is_undefined() {
                    return Ok(Value::Undefined);
                }
                let key = if *computed {
                    let key = self.eval_expr(property, scope)?;
                    self.settle(key, scope)?
                } else {
                    match property.as_ref() {
                        Expression::Identifier(name) => Value::text(name.clone()),
                        _ => {
                            return Err(EvalError::NotSupported(
                                "member property must be a name".into(),
                            ))
                        }
                    }
                };
                Ok(member_access(&target, &key))
            }
            Expression::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.eval_expr(element, scope)?;
                    items.push(self.settle(value, scope)?);
                }
                Ok(Value::list(items))
            }
            Expression::Object(properties) => {
                let mut entries = IndexMap::with_capacity(properties.len());
                for (key, value_expr) in properties {
                    if entries.contains_key(key) {
                        return Err(EvalError::NotSupported(format!(
                            "duplicate key '{key}' in object literal"
                        )));
                    }
                    let value = self.eval_expr(value_expr, scope)?;
                    entries.insert(key.clone(), self.settle(value, scope)?);
                }
                Ok(Value::map(entries))
            }
            Expression::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(part_expr) => {
                            let value = self.eval_expr(part_expr, scope)?;
                            out.push_str(&self.settle(value, scope)?.render());
                        }
                    }
                }
                Ok(Value::text(out))
            }
            Expression::Call { callee, args } => self.eval_call(callee, args, scope),
        }
    }

    /// Lookup order: block scopes, page args, global args, then a
    /// registered zero-argument filter read as a binding, then `Undefined`.
    fn eval_identifier(&self, name: &str, scope: &mut ScopeContext) -> EvalResult {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        if let Some(spec) = self.context.registry().resolve(name, 0) {
            trace!(name, "reading zero-arity filter as binding");
            return self.invoke(&spec, &[], scope);
        }
        Ok(Value::Undefined)
    }

    fn eval_call(
        &self,
        callee: &Expression,
        args: &[Expression],
        scope: &mut ScopeContext,
    ) -> EvalResult {
        let Expression::Identifier(name) = callee else {
            return Err(EvalError::NotSupported(
                "method calls on values are not supported".into(),
            ));
        };
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_expr(arg, scope)?;
            values.push(self.settle(value, scope)?);
        }
        // a scope-bound callable shadows registry filters of the same name
        if let Some(Value::Callable(callable)) = scope.lookup(name) {
            trace!(name, "invoking scope-bound callable");
            return callable
                .invoke(scope, &values)
                .map_err(|e| invocation(name, e));
        }
        let spec = self
            .context
            .registry()
            .resolve(name, values.len())
            .ok_or_else(|| EvalError::UnknownFilter {
                name: name.clone(),
                arity: values.len(),
            })?;
        self.invoke(&spec, &values, scope)
    }

    fn invoke(&self, spec: &MethodSpec, args: &[Value], scope: &mut ScopeContext) -> EvalResult {
        trace!(filter = %spec.name, arity = spec.arity, "invoking filter");
        if spec.cacheable {
            let key = cache_key(&spec.name, args);
            if let Some(hit) = self.context.expiring_cache().get(&key) {
                trace!(filter = %spec.name, "expiring cache hit");
                return Ok(hit);
            }
            let result = (spec.invoker)(scope, args).map_err(|e| invocation(&spec.name, e))?;
            // only settled values are cached, so a hit never re-suspends
            let result = self.settle(result, scope)?;
            self.context.expiring_cache().set(key, result.clone());
            return Ok(result);
        }
        (spec.invoker)(scope, args).map_err(|e| invocation(&spec.name, e))
    }

    /// Drive a pending value to completion: poll, check cancellation, wait
    /// a bounded slice, repeat. An abandoned evaluation aborts with
    /// `Cancelled` but leaves populated cache entries intact.
    fn settle(&self, mut value: Value, scope: &ScopeContext) -> EvalResult {
        loop {
            let deferred = match &value {
                Value::Pending(deferred) => deferred.clone(),
                _ => return Ok(value),
            };
            if scope.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            if let Some(resolved) = deferred.wait_for(SETTLE_SLICE) {
                value = resolved;
            }
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::Text(s) => Value::text(s.clone()),
    }
}

fn binding_target(stage: &str, args: &[Expression]) -> EvalResult<String> {
    match args {
        [Expression::Identifier(name)] => Ok(name.clone()),
        [Expression::Literal(Literal::Text(name))] => Ok(name.clone()),
        _ => Err(EvalError::NotSupported(format!(
            "{stage} expects a binding name"
        ))),
    }
}

fn undefined(expr: &Expression) -> EvalError {
    EvalError::UndefinedSymbol {
        name: symbol_name(expr),
    }
}

fn symbol_name(expr: &Expression) -> String {
    match expr {
        Expression::Identifier(name) => name.clone(),
        Expression::Member {
            object,
            property,
            computed: false,
        } => match property.as_ref() {
            Expression::Identifier(name) => format!("{}.{name}", symbol_name(object)),
            _ => "expression".to_string(),
        },
        _ => "expression".to_string(),
    }
}

fn invocation(name: &str, error: anyhow::Error) -> EvalError {
    // filter bodies may raise a specific kind; surface it unwrapped
    match error.downcast::<EvalError>() {
        Ok(kind) => kind,
        Err(error) => EvalError::Invocation {
            name: name.to_string(),
            source: error,
        },
    }
}

fn binary_op(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    left: &Expression,
    right: &Expression,
) -> EvalResult {
    // equality comparisons against the no-value marker are allowed
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }
    if lhs.is_undefined() {
        return Err(undefined(left));
    }
    if rhs.is_undefined() {
        return Err(undefined(right));
    }

    match op {
        BinaryOp::Add => {
            if matches!(lhs, Value::Text(_)) || matches!(rhs, Value::Text(_)) {
                return Ok(Value::text(format!("{}{}", lhs.render(), rhs.render())));
            }
            numeric_op(op, lhs, rhs)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => numeric_op(op, lhs, rhs),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => compare(op, lhs, rhs),
        BinaryOp::Eq | BinaryOp::NotEq => unreachable!("handled above"),
    }
}

/// Int⊕Int stays Int (`/` with a remainder promotes); any Float operand
/// promotes the other side.
fn numeric_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        match op {
            BinaryOp::Add => {
                if let Some(n) = a.checked_add(*b) {
                    return Ok(Value::Int(n));
                }
            }
            BinaryOp::Sub => {
                if let Some(n) = a.checked_sub(*b) {
                    return Ok(Value::Int(n));
                }
            }
            BinaryOp::Mul => {
                if let Some(n) = a.checked_mul(*b) {
                    return Ok(Value::Int(n));
                }
            }
            BinaryOp::Div => {
                if *b == 0 {
                    return Err(division_by_zero("divide"));
                }
                if a % b == 0 {
                    return Ok(Value::Int(a / b));
                }
            }
            BinaryOp::Mod => {
                if *b == 0 {
                    return Err(division_by_zero("modulo"));
                }
                return Ok(Value::Int(a % b));
            }
            _ => {}
        }
    }
    let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::NotSupported(format!(
                "cannot apply numeric operator to {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(division_by_zero("divide"));
            }
            Ok(Value::Float(a / b))
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(division_by_zero("modulo"));
            }
            Ok(Value::Float(a % b))
        }
        _ => unreachable!("caller dispatches arithmetic operators only"),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult {
    let ordering = match (lhs, rhs) {
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                None => return Ok(Value::Bool(false)),
            },
            _ => {
                return Err(EvalError::NotSupported(format!(
                    "cannot compare {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                )))
            }
        },
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::GtEq => ordering.is_ge(),
        _ => unreachable!("caller dispatches comparison operators only"),
    };
    Ok(Value::Bool(result))
}

fn division_by_zero(name: &str) -> EvalError {
    EvalError::Invocation {
        name: name.to_string(),
        source: anyhow::anyhow!("division by zero"),
    }
}

fn member_access(object: &Value, key: &Value) -> Value {
    match object {
        Value::Map(entries) => entries
            .read()
            .get(&key.render())
            .cloned()
            .unwrap_or(Value::Undefined),
        Value::List(items) => {
            let index = match key {
                Value::Int(i) if *i >= 0 => *i as usize,
                Value::Float(f) if *f >= 0.0 => f.floor() as usize,
                _ => return Value::Undefined,
            };
            items.read().get(index).cloned().unwrap_or(Value::Undefined)
        }
        _ => Value::Undefined,
    }
}

fn cache_key(name: &str, args: &[Value]) -> String {
    let mut key = String::from(name);
    for arg in args {
        key.push('\u{1f}');
        key.push_str(&arg.render());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{CancelToken, Deferred};
    use crate::registry::MethodSet;
    use crate::value::Callable;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn eval_one(source: &str) -> Result<Value> {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        Evaluator::new(&context).eval(source, &mut scope)
    }

    #[test]
    fn literals_and_arithmetic() {
        assert_eq!(eval_one("1").unwrap(), Value::Int(1));
        assert_eq!(eval_one("1 + 2").unwrap(), Value::Int(3));
        assert_eq!(eval_one("2 + 3 * 4").unwrap(), Value::Int(14));
        assert_eq!(eval_one("(2 + 3) * 4").unwrap(), Value::Int(20));
        assert_eq!(eval_one("1.5 * 3.0").unwrap(), Value::Float(4.5));
        assert_eq!(eval_one("13 / 2").unwrap(), Value::Float(6.5));
        assert_eq!(eval_one("6 / 2").unwrap(), Value::Int(3));
        assert_eq!(eval_one("7 mod 4").unwrap(), Value::Int(3));
        assert_eq!(eval_one("-5 + 7").unwrap(), Value::Int(2));
    }

    #[test]
    fn string_concat_and_comparison() {
        assert_eq!(
            eval_one("'Hello ' + 'World'").unwrap(),
            Value::text("Hello World")
        );
        assert_eq!(eval_one("'a' + 1").unwrap(), Value::text("a1"));
        assert_eq!(eval_one("2 > 1").unwrap(), Value::Bool(true));
        assert_eq!(eval_one("2 <= 1").unwrap(), Value::Bool(false));
        assert_eq!(eval_one("'abc' < 'abd'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_an_invocation_error() {
        let err = eval_one("1 / 0").unwrap_err();
        assert!(matches!(err.kind(), EvalError::Invocation { .. }));
    }

    #[test]
    fn logical_operators_return_operand_values() {
        assert_eq!(eval_one("'foo' && 6 >= 6").unwrap(), Value::Bool(true));
        assert_eq!(eval_one("0 || 'x'").unwrap(), Value::text("x"));
        assert_eq!(eval_one("0 && 'x'").unwrap(), Value::Int(0));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let context = ScriptContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = MethodSet::named("test");
        {
            let calls = calls.clone();
            set.method("boom", 0, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("must not be invoked")
            });
        }
        context.register(Arc::new(set));
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator.eval("false && boom()", &mut scope).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            evaluator.eval("1 || boom()", &mut scope).unwrap(),
            Value::Int(1)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn conditional_evaluates_selected_branch_only() {
        let context = ScriptContext::new();
        context.arg("a", Value::Int(1));
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator
                .eval("(1 < 2) ? 3+4 : -5+(add(6,a)+7)", &mut scope)
                .unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            evaluator
                .eval("1+2 > subtract(3,4) ? 'YES' : 'NO'", &mut scope)
                .unwrap(),
            Value::text("YES")
        );
    }

    #[test]
    fn member_access_resolves_dynamically() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        scope.define_json(
            "foo",
            serde_json::json!({"bar": [{"tek": "hello"}, {"tek": "baz"}]}),
        );
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator.eval("foo.bar[1].tek", &mut scope).unwrap(),
            Value::text("baz")
        );
        assert_eq!(
            evaluator.eval("foo.bar[0]['tek']", &mut scope).unwrap(),
            Value::text("hello")
        );
        // out-of-range and missing keys yield no value, not an error
        assert_eq!(
            evaluator.eval("foo.bar[9]", &mut scope).unwrap(),
            Value::Undefined
        );
        assert_eq!(
            evaluator.eval("foo.nope.deeper", &mut scope).unwrap(),
            Value::Undefined
        );
    }

    #[test]
    fn undefined_in_arithmetic_names_the_symbol() {
        let err = eval_one("missing + 1").unwrap_err();
        match err.kind() {
            EvalError::UndefinedSymbol { name } => assert_eq!(name, "missing"),
            other => panic!("expected UndefinedSymbol, got {other:?}"),
        }
        // equality against the marker stays legal
        assert_eq!(eval_one("missing == null").unwrap(), Value::Bool(false));
    }

    #[test]
    fn duplicate_object_key_is_not_supported() {
        let err = eval_one("{a: 1, a: 2}").unwrap_err();
        assert!(matches!(err.kind(), EvalError::NotSupported(_)));
    }

    #[test]
    fn template_literals_render_parts() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        scope.define("name", Value::text("World"));
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator.eval("`Hello ${name}!`", &mut scope).unwrap(),
            Value::text("Hello World!")
        );
        // null and undefined interpolations render as empty text
        assert_eq!(
            evaluator.eval("`[${null}${ghost}]`", &mut scope).unwrap(),
            Value::text("[]")
        );
    }

    #[test]
    fn pipe_chain_threads_value_through_filters() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        scope.define("it", Value::Int(10));
        let evaluator = Evaluator::new(&context);
        let source = "{ a: add(it % 3,1) * 2, b: 2*3+incr(4+decr(5)) } |> values |> sum |> currency";
        assert_eq!(
            evaluator.eval(source, &mut scope).unwrap(),
            Value::text("$19.00")
        );
    }

    #[test]
    fn assign_to_binds_and_do_guards() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);

        assert_eq!(
            evaluator.eval("1 |> assignTo: arg", &mut scope).unwrap(),
            Value::Undefined
        );
        evaluator
            .eval("arg |> do: assign('doArg', incr(it))", &mut scope)
            .unwrap();
        assert_eq!(evaluator.render("doArg", &mut scope).unwrap(), "2");

        // starting from null or an undefined name skips the do stage
        evaluator.eval("null |> assignTo: nothing", &mut scope).unwrap();
        evaluator
            .eval("nothing |> do: assign('doArg2', incr(it))", &mut scope)
            .unwrap();
        assert_eq!(evaluator.render("doArg2", &mut scope).unwrap(), "");
        evaluator
            .eval("ghost |> do: assign('doArg3', incr(it))", &mut scope)
            .unwrap();
        assert_eq!(evaluator.render("doArg3", &mut scope).unwrap(), "");
    }

    #[test]
    fn arrow_binding_form_matches_colon_form() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);
        evaluator.eval("5 |> to => viaArrow", &mut scope).unwrap();
        evaluator.eval("5 |> assignTo: viaColon", &mut scope).unwrap();
        assert_eq!(
            evaluator.eval("viaArrow == viaColon", &mut scope).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn indexed_assignment_mutates_through_existing_reference() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);

        evaluator
            .eval("[1,2,3] |> assignTo: numArray", &mut scope)
            .unwrap();
        evaluator.eval("assign('numArray[1]', 4)", &mut scope).unwrap();
        assert_eq!(
            evaluator.eval("numArray[1]", &mut scope).unwrap(),
            Value::Int(4)
        );

        evaluator
            .eval("['a','b','c'] |> assignTo: strArray", &mut scope)
            .unwrap();
        evaluator
            .eval("assign('strArray[1]', 'B')", &mut scope)
            .unwrap();
        assert_eq!(
            evaluator.eval("strArray[1]", &mut scope).unwrap(),
            Value::text("B")
        );

        evaluator
            .eval("{a: 'foo', b: 'bar'} |> assignTo: map", &mut scope)
            .unwrap();
        evaluator
            .eval("assign(\"map['b']\", 'qux')", &mut scope)
            .unwrap();
        assert_eq!(
            evaluator.eval("map['b']", &mut scope).unwrap(),
            Value::text("qux")
        );
    }

    #[test]
    fn unknown_filter_kind_is_inspectable() {
        let err = eval_one("1 |> nope").unwrap_err();
        match err.kind() {
            EvalError::UnknownFilter { name, arity } => {
                assert_eq!(name, "nope");
                assert_eq!(*arity, 1);
            }
            other => panic!("expected UnknownFilter, got {other:?}"),
        }
        let err = eval_one("nope(1, 2)").unwrap_err();
        assert!(matches!(
            err.kind(),
            EvalError::UnknownFilter { arity: 2, .. }
        ));
    }

    #[test]
    fn binding_a_reserved_name_is_not_supported() {
        let err = eval_one("1 |> assignTo: it").unwrap_err();
        assert!(matches!(err.kind(), EvalError::NotSupported(_)));
        let err = eval_one("assign('nope[0]', 1)").unwrap_err();
        assert!(matches!(err.kind(), EvalError::NotSupported(_)));
    }

    #[test]
    fn filter_failures_surface_as_invocation_with_cause() {
        let context = ScriptContext::new();
        let mut set = MethodSet::named("test");
        set.method("explode", 1, |_, _| anyhow::bail!("kaboom"));
        context.register(Arc::new(set));
        let mut scope = context.new_scope();
        let err = Evaluator::new(&context)
            .eval("1 |> explode", &mut scope)
            .unwrap_err();
        match err.kind() {
            EvalError::Invocation { name, source } => {
                assert_eq!(name, "explode");
                assert_eq!(source.to_string(), "kaboom");
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn early_return_stops_the_chain() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);
        let result = evaluator.eval("42 |> return |> incr", &mut scope).unwrap();
        match result {
            Value::Return(signal) => {
                assert_eq!(signal.value, Value::Int(42));
                assert_eq!(signal.options, None);
            }
            other => panic!("expected Return, got {other:?}"),
        }

        let result = evaluator
            .eval("'x' |> return({ contentType: 'text/plain' })", &mut scope)
            .unwrap();
        match result {
            Value::Return(signal) => {
                assert_eq!(signal.value, Value::text("x"));
                let options = signal.options.expect("options map");
                assert_eq!(options["contentType"], Value::text("text/plain"));
            }
            other => panic!("expected Return, got {other:?}"),
        }
    }

    #[test]
    fn zero_arity_filter_reads_as_binding() {
        let context = ScriptContext::new();
        let mut set = MethodSet::named("test");
        set.method("answer", 0, |_, _| Ok(Value::Int(42)));
        context.register(Arc::new(set));
        let mut scope = context.new_scope();
        assert_eq!(
            Evaluator::new(&context).eval("answer + 1", &mut scope).unwrap(),
            Value::Int(43)
        );
    }

    #[test]
    fn scope_bound_callable_shadows_registry() {
        let context = ScriptContext::new();
        let mut scope = context.new_scope();
        scope.define(
            "incr",
            Value::Callable(Callable::new(
                "incr",
                Arc::new(|_scope: &mut ScopeContext, args: &[Value]| {
                    Ok(Value::Int(args[0].as_f64().unwrap_or(0.0) as i64 + 100))
                }),
            )),
        );
        assert_eq!(
            Evaluator::new(&context).eval("incr(1)", &mut scope).unwrap(),
            Value::Int(101)
        );
    }

    #[test]
    fn cacheable_filter_results_are_memoized_per_context() {
        let context = ScriptContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = MethodSet::named("test");
        {
            let calls = calls.clone();
            set.cacheable_method("slowTwice", 1, move |_, args| {
                calls.fetch_add(1, Ordering::SeqCst);
                numeric_op(BinaryOp::Mul, &args[0], &Value::Int(2))
                    .map_err(anyhow::Error::from)
            });
        }
        context.register(Arc::new(set));
        let mut scope = context.new_scope();
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator.eval("3 |> slowTwice", &mut scope).unwrap(),
            Value::Int(6)
        );
        assert_eq!(
            evaluator.eval("3 |> slowTwice", &mut scope).unwrap(),
            Value::Int(6)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.expiring_cache().len(), 1);

        context.reset();
        evaluator.eval("3 |> slowTwice", &mut scope).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pending_results_settle_before_dependent_stages() {
        let context = ScriptContext::new();
        let deferred = Deferred::new();
        let mut set = MethodSet::named("test");
        {
            let deferred = deferred.clone();
            set.method("later", 0, move |_, _| Ok(Value::Pending(deferred.clone())));
        }
        context.register(Arc::new(set));
        let handle = {
            let deferred = deferred.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                deferred.complete(Value::Int(41));
            })
        };
        let mut scope = context.new_scope();
        assert_eq!(
            Evaluator::new(&context)
                .eval("later() |> incr", &mut scope)
                .unwrap(),
            Value::Int(42)
        );
        handle.join().unwrap();
    }

    #[test]
    fn cancellation_aborts_a_suspended_evaluation() {
        let context = ScriptContext::new();
        let mut set = MethodSet::named("test");
        set.method("forever", 0, |_, _| Ok(Value::Pending(Deferred::new())));
        context.register(Arc::new(set));
        let mut scope = context.new_scope();
        let token = CancelToken::new();
        scope.set_cancel_token(token.clone());
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let err = Evaluator::new(&context)
            .eval("forever() |> incr", &mut scope)
            .unwrap_err();
        assert!(matches!(err.kind(), EvalError::Cancelled));
        handle.join().unwrap();

        // populated cache entries survive the abandoned evaluation
        context.expiring_cache().set("kept", Value::Int(1));
        assert_eq!(context.expiring_cache().get("kept"), Some(Value::Int(1)));
    }
}
