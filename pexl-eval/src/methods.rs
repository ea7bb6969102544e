//! The built-in default filter provider.
//!
//! Arithmetic, collection, formatting and predicate filters, plus the
//! `assign` scope mutator. Filter bodies return `anyhow::Result`; argument
//! counts are guaranteed by arity-based dispatch, argument types are
//! checked here.

use anyhow::{bail, ensure, Context};

use crate::error::EvalError;
use crate::registry::{MethodSet, ScriptMethods};
use crate::scope::{self, ScopeContext};
use crate::value::{Truthy, Value};

pub struct DefaultMethods {
    set: MethodSet,
}

impl DefaultMethods {
    pub fn new() -> Self {
        let mut set = MethodSet::named("default");

        set.method("add", 2, |_, args| arith_add(&args[0], &args[1]));
        set.method("subtract", 2, |_, args| {
            arith("subtract", &args[0], &args[1], i64::checked_sub, |a, b| a - b)
        });
        set.method("multiply", 2, |_, args| {
            arith("multiply", &args[0], &args[1], i64::checked_mul, |a, b| a * b)
        });
        set.method("divide", 2, |_, args| arith_div(&args[0], &args[1]));
        set.method("incr", 1, |_, args| arith_add(&args[0], &Value::Int(1)));
        set.method("incrBy", 2, |_, args| arith_add(&args[0], &args[1]));
        set.method("decr", 1, |_, args| {
            arith("decr", &args[0], &Value::Int(1), i64::checked_sub, |a, b| a - b)
        });
        set.method("decrBy", 2, |_, args| {
            arith("decrBy", &args[0], &args[1], i64::checked_sub, |a, b| a - b)
        });

        set.method("values", 1, |_, args| match &args[0] {
            Value::Map(entries) => Ok(Value::list(entries.read().values().cloned().collect())),
            Value::List(_) => Ok(args[0].clone()),
            other => bail!("values expects a map, got {}", other.type_name()),
        });
        set.method("keys", 1, |_, args| match &args[0] {
            Value::Map(entries) => Ok(Value::list(
                entries.read().keys().cloned().map(Value::Text).collect(),
            )),
            other => bail!("keys expects a map, got {}", other.type_name()),
        });
        set.method("sum", 1, |_, args| sum(&args[0]));
        set.method("count", 1, |_, args| match &args[0] {
            Value::List(items) => Ok(Value::Int(items.read().len() as i64)),
            Value::Map(entries) => Ok(Value::Int(entries.read().len() as i64)),
            Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => bail!("count expects a list, map or text, got {}", other.type_name()),
        });
        set.method("first", 1, |_, args| match &args[0] {
            Value::List(items) => Ok(items.read().first().cloned().unwrap_or(Value::Undefined)),
            other => bail!("first expects a list, got {}", other.type_name()),
        });
        set.method("last", 1, |_, args| match &args[0] {
            Value::List(items) => Ok(items.read().last().cloned().unwrap_or(Value::Undefined)),
            other => bail!("last expects a list, got {}", other.type_name()),
        });

        set.method("currency", 1, |_, args| {
            let n = expect_num("currency", &args[0])?;
            Ok(Value::text(format_currency(n)))
        });
        set.method("upper", 1, |_, args| {
            Ok(Value::text(args[0].render().to_uppercase()))
        });
        set.method("lower", 1, |_, args| {
            Ok(Value::text(args[0].render().to_lowercase()))
        });
        set.method("trim", 1, |_, args| {
            Ok(Value::text(args[0].render().trim().to_string()))
        });
        set.method("join", 1, |_, args| join(&args[0], ","));
        set.method("join", 2, |_, args| {
            let sep = args[1].render();
            join(&args[0], &sep)
        });
        set.method("repeat", 2, |_, args| {
            let times = match &args[1] {
                Value::Int(n) if *n >= 0 => *n as usize,
                other => bail!("repeat expects a non-negative count, got {}", other.render()),
            };
            Ok(Value::text(args[0].render().repeat(times)))
        });

        set.method("isNull", 1, |_, args| {
            Ok(Value::Bool(args[0].is_null() || args[0].is_undefined()))
        });
        set.method("isFalsy", 1, |_, args| Ok(Value::Bool(args[0].is_falsey())));
        set.method("coalesce", 2, |_, args| Ok(or_default(&args[0], &args[1])));
        set.method("default", 2, |_, args| Ok(or_default(&args[0], &args[1])));

        set.method("assign", 2, |scope, args| {
            let target = match &args[0] {
                Value::Text(s) => s.clone(),
                other => bail!("assign expects a text target, got {}", other.type_name()),
            };
            assign_value(scope, &target, args[1].clone())
        });

        DefaultMethods { set }
    }
}

impl Default for DefaultMethods {
    fn default() -> Self {
        DefaultMethods::new()
    }
}

impl ScriptMethods for DefaultMethods {
    fn provider_name(&self) -> &str {
        self.set.provider_name()
    }

    fn find(&self, name: &str, arity: usize) -> Option<crate::registry::MethodSpec> {
        self.set.find(name, arity)
    }
}

fn expect_num(filter: &str, value: &Value) -> anyhow::Result<f64> {
    value
        .as_f64()
        .with_context(|| format!("{filter} expects a number, got {}", value.type_name()))
}

fn arith(
    filter: &str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (a, b) {
        if let Some(n) = int_op(*a, *b) {
            return Ok(Value::Int(n));
        }
    }
    Ok(Value::Float(float_op(
        expect_num(filter, a)?,
        expect_num(filter, b)?,
    )))
}

/// `+` concatenates when either operand is text, otherwise adds.
fn arith_add(a: &Value, b: &Value) -> anyhow::Result<Value> {
    if matches!(a, Value::Text(_)) || matches!(b, Value::Text(_)) {
        return Ok(Value::text(format!("{}{}", a.render(), b.render())));
    }
    arith("add", a, b, i64::checked_add, |a, b| a + b)
}

/// Integer division with a non-zero remainder promotes to float.
fn arith_div(a: &Value, b: &Value) -> anyhow::Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (a, b) {
        ensure!(*b != 0, "division by zero");
        if a % b == 0 {
            return Ok(Value::Int(a / b));
        }
    }
    let divisor = expect_num("divide", b)?;
    ensure!(divisor != 0.0, "division by zero");
    Ok(Value::Float(expect_num("divide", a)? / divisor))
}

fn sum(value: &Value) -> anyhow::Result<Value> {
    let Value::List(items) = value else {
        bail!("sum expects a list, got {}", value.type_name());
    };
    let mut int_total = 0i64;
    let mut float_total = 0f64;
    let mut is_float = false;
    for item in items.read().iter() {
        match item {
            Value::Int(n) if !is_float => match int_total.checked_add(*n) {
                Some(total) => int_total = total,
                None => {
                    is_float = true;
                    float_total = int_total as f64 + *n as f64;
                }
            },
            Value::Int(n) => float_total += *n as f64,
            Value::Float(n) => {
                if !is_float {
                    is_float = true;
                    float_total = int_total as f64;
                }
                float_total += n;
            }
            other => bail!("sum expects numeric items, got {}", other.type_name()),
        }
    }
    Ok(if is_float {
        Value::Float(float_total)
    } else {
        Value::Int(int_total)
    })
}

fn join(value: &Value, separator: &str) -> anyhow::Result<Value> {
    let Value::List(items) = value else {
        bail!("join expects a list, got {}", value.type_name());
    };
    let joined = items
        .read()
        .iter()
        .map(Value::render)
        .collect::<Vec<_>>()
        .join(separator);
    Ok(Value::text(joined))
}

fn or_default(value: &Value, fallback: &Value) -> Value {
    if value.is_null() || value.is_undefined() {
        fallback.clone()
    } else {
        value.clone()
    }
}

/// en-US currency shape: `$1,234.50`.
fn format_currency(n: f64) -> String {
    let negative = n < 0.0;
    let cents = (n.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let frac = cents % 100;
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{}${grouped}.{frac:02}", if negative { "-" } else { "" })
}

enum Accessor {
    Index(usize),
    Key(String),
}

/// Parse an assignment target of the shape `name`, `name[0]`, `name['k']`
/// or a dotted path, possibly chained.
fn parse_assign_target(expr: &str) -> anyhow::Result<(String, Vec<Accessor>)> {
    let name_end = expr
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(expr.len());
    let name = expr[..name_end].trim();
    ensure!(!name.is_empty(), "empty assignment target '{expr}'");

    let mut accessors = Vec::new();
    let mut rest = &expr[name_end..];
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(stripped.len());
            let field = stripped[..end].trim();
            ensure!(!field.is_empty(), "malformed assignment target '{expr}'");
            accessors.push(Accessor::Key(field.to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .with_context(|| format!("unbalanced '[' in assignment target '{expr}'"))?;
            let inner = stripped[..close].trim();
            let accessor = if let Some(key) = unquote(inner) {
                Accessor::Key(key.to_string())
            } else {
                Accessor::Index(
                    inner
                        .parse()
                        .with_context(|| format!("bad index '{inner}' in '{expr}'"))?,
                )
            };
            accessors.push(accessor);
            rest = &stripped[close + 1..];
        } else {
            bail!("malformed assignment target '{expr}'");
        }
    }
    Ok((name.to_string(), accessors))
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Bind a bare name in the current scope, or mutate an existing container
/// in place through its shared reference. The named container must already
/// exist for indexed/keyed targets.
fn assign_value(scope: &mut ScopeContext, target: &str, value: Value) -> anyhow::Result<Value> {
    let (name, accessors) = parse_assign_target(target)?;
    if scope::is_reserved(&name) {
        return Err(EvalError::NotSupported(format!("cannot bind reserved name '{name}'")).into());
    }

    if accessors.is_empty() {
        scope.define(name, value.clone());
        return Ok(value);
    }

    let mut current = scope.lookup(&name).ok_or_else(|| {
        anyhow::Error::from(EvalError::NotSupported(format!(
            "cannot assign to non-existing '{name}' in '{target}'"
        )))
    })?;

    for (i, accessor) in accessors.iter().enumerate() {
        let last = i + 1 == accessors.len();
        if last {
            set_in(&current, accessor, value.clone(), target)?;
        } else {
            current = step_into(&current, accessor, target)?;
        }
    }
    Ok(value)
}

fn step_into(current: &Value, accessor: &Accessor, target: &str) -> anyhow::Result<Value> {
    let stepped = match (current, accessor) {
        (Value::List(items), Accessor::Index(i)) => items.read().get(*i).cloned(),
        (Value::Map(entries), Accessor::Key(k)) => entries.read().get(k).cloned(),
        _ => None,
    };
    stepped.ok_or_else(|| {
        anyhow::Error::from(EvalError::NotSupported(format!(
            "missing intermediate step in assignment target '{target}'"
        )))
    })
}

fn set_in(current: &Value, accessor: &Accessor, value: Value, target: &str) -> anyhow::Result<()> {
    match (current, accessor) {
        (Value::List(items), Accessor::Index(i)) => {
            let mut items = items.write();
            ensure!(
                *i < items.len(),
                "index {i} out of range in assignment target '{target}'"
            );
            items[*i] = value;
            Ok(())
        }
        (Value::Map(entries), Accessor::Key(k)) => {
            entries.write().insert(k.clone(), value);
            Ok(())
        }
        (other, _) => bail!(
            "cannot assign into {} in target '{target}'",
            other.type_name()
        ),
    }
}
