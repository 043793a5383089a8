use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

// ---- Core AST types ----

/// A complete program: statements in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = value;`
    Let { name: String, value: Expr },

    /// `name = value;` (compound assignments and `++`/`--` desugar to this)
    Assign { name: String, value: Expr },

    /// `if condition {body} else {alternative}`
    If {
        condition: Expr,
        body: Vec<Stmt>,
        alternative: Vec<Stmt>,
    },

    /// `while condition {body}`
    While { condition: Expr, body: Vec<Stmt> },

    Break {
        #[serde(skip)]
        span: Span,
    },

    Continue {
        #[serde(skip)]
        span: Span,
    },

    /// `fn name(params) {body}`
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        #[serde(skip)]
        span: Span,
    },

    /// `return value;`
    Return(Expr),

    /// Expression evaluated for its side effects.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),

    /// Variable reference
    Ref(String),

    /// `left op right`
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `!operand` or `-operand`
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `function(args)`; builtins and user functions share this shape.
    Call { function: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equals,
    NotEquals,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Power => "**",
            BinOp::LessThan => "<",
            BinOp::LessOrEqual => "<=",
            BinOp::GreaterThan => ">",
            BinOp::GreaterOrEqual => ">=",
            BinOp::Equals => "==",
            BinOp::NotEquals => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Literal(Literal::Int(value))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }
}
