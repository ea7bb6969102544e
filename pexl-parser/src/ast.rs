//! Expression AST.
//!
//! Nodes are built once per parse and never mutated; equality is derived
//! field-wise structural equality, so two independent parses of equivalent
//! source compare equal.

/// A literal value embedded in the source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Not,
}

/// Arithmetic and comparison operators. The keyword spelling `mod` maps to
/// the same `Mod` tag as `%`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Short-circuit operators. `and`/`or` and `&&`/`||` map to the same tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// One part of a backtick template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    /// Dot access stores the property as an `Identifier` with `computed`
    /// false; bracket access stores an arbitrary expression with `computed`
    /// true.
    Member {
        object: Box<Expression>,
        property: Box<Expression>,
        computed: bool,
    },
    /// Properties keep source order; keys are identifier or string-literal
    /// spellings.
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Template(Vec<TemplatePart>),
}

impl Expression {
    /// The normalized shape a bare callable target is rewritten into:
    /// `a` and `a()` both become a zero-argument call on identifier `a`.
    pub fn zero_arg_call(name: impl Into<String>) -> Expression {
        Expression::Call {
            callee: Box::new(Expression::Identifier(name.into())),
            args: Vec::new(),
        }
    }

    /// The callee name when this is a call on a plain identifier.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Expression::Call { callee, .. } => match callee.as_ref() {
                Expression::Identifier(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A source expression plus zero or more `|>`-separated stages.
///
/// Stages sit outside the expression tree; each one is a `Call`-shaped
/// [`Expression`] produced by the normalizing call-target grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub source: Expression,
    pub stages: Vec<Expression>,
}
