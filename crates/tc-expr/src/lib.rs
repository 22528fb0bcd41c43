#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tc_types::{ArithmeticOp, ComparisonOp, Scalar, parse_plain_number};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixOp {
    Neg,
    Not,
}

impl PrefixOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self.arithmetic() {
            Some(op) => op.symbol(),
            None => match self.comparison() {
                Some(op) => op.symbol(),
                None => match self {
                    Self::Concat => "&",
                    Self::And => "and",
                    _ => "or",
                },
            },
        }
    }

    fn arithmetic(self) -> Option<ArithmeticOp> {
        Some(match self {
            Self::Add => ArithmeticOp::Add,
            Self::Sub => ArithmeticOp::Sub,
            Self::Mul => ArithmeticOp::Mul,
            Self::Div => ArithmeticOp::Div,
            Self::Mod => ArithmeticOp::Mod,
            _ => return None,
        })
    }

    fn comparison(self) -> Option<ComparisonOp> {
        Some(match self {
            Self::Eq => ComparisonOp::Eq,
            Self::Ne => ComparisonOp::Ne,
            Self::Gt => ComparisonOp::Gt,
            Self::Ge => ComparisonOp::Ge,
            Self::Lt => ComparisonOp::Lt,
            Self::Le => ComparisonOp::Le,
            _ => return None,
        })
    }

    fn apply(self, left: &Scalar, right: &Scalar) -> Scalar {
        if let Some(op) = self.arithmetic() {
            return left.arithmetic(op, right);
        }
        if let Some(op) = self.comparison() {
            return Scalar::Bool(left.compare(op, right));
        }
        match self {
            Self::Concat => left.concat(right),
            Self::And => Scalar::Bool(left.truthy() && right.truthy()),
            _ => Scalar::Bool(left.truthy() || right.truthy()),
        }
    }
}

/// Parsed expression tree. Immutable once built; evaluation never stores
/// anything on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Keeps the literal's source text so the canonical form reprints it.
    NumberLiteral {
        text: String,
    },
    StringLiteral {
        value: String,
    },
    ColumnReference {
        name: String,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("syntax error at position {position} in {input:?}: {message}")]
    Syntax {
        message: String,
        input: String,
        position: usize,
    },
    #[error("evaluation loop on column {column:?} (path: {})", .path.join(" -> "))]
    EvaluationLoop { column: String, path: Vec<String> },
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
}

/// The chain of derived columns currently being resolved, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalPath {
    columns: Vec<String>,
}

impl EvalPath {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|entry| entry == column)
    }

    pub fn push(&mut self, column: &str) {
        self.columns.push(column.to_owned());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.columns.pop()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.columns
    }
}

/// Values already present in the row being evaluated.
pub trait RowValues {
    /// `None` when the row holds nothing for `column` yet.
    fn value(&self, column: &str) -> Option<Scalar>;
}

/// A row plus whatever knows how to produce its missing columns.
pub trait Environment: RowValues {
    /// Produce (and usually memoize) the value of a column the row does not
    /// hold yet. `path` already ends with `column`. Returns `None` when
    /// `column` is not derivable here.
    fn derive(
        &mut self,
        column: &str,
        path: &mut EvalPath,
    ) -> Option<Result<Scalar, ExprError>> {
        let _ = (column, path);
        None
    }
}

/// Resolve a column reference against `env`.
///
/// A name already on `path` is a dependency loop. Values the row holds are
/// magic-cast. Anything else is derived with the name pushed on `path`.
pub fn resolve_column<E>(column: &str, env: &mut E, path: &mut EvalPath) -> Result<Scalar, ExprError>
where
    E: Environment + ?Sized,
{
    if path.contains(column) {
        let mut cycle = path.as_slice().to_vec();
        cycle.push(column.to_owned());
        return Err(ExprError::EvaluationLoop {
            column: column.to_owned(),
            path: cycle,
        });
    }
    if let Some(value) = env.value(column) {
        return Ok(value.magic_cast());
    }

    path.push(column);
    let derived = env.derive(column, path);
    path.pop();
    derived.unwrap_or_else(|| Err(ExprError::UnknownColumn(column.to_owned())))
}

impl Expr {
    pub fn evaluate<E>(&self, env: &mut E) -> Result<Scalar, ExprError>
    where
        E: Environment + ?Sized,
    {
        self.evaluate_with_path(env, &mut EvalPath::new())
    }

    pub fn evaluate_with_path<E>(&self, env: &mut E, path: &mut EvalPath) -> Result<Scalar, ExprError>
    where
        E: Environment + ?Sized,
    {
        match self {
            Self::NumberLiteral { text } => {
                Ok(parse_plain_number(text).map_or_else(Scalar::nan, Scalar::Number))
            }
            Self::StringLiteral { value } => Ok(Scalar::Text(value.clone())),
            Self::ColumnReference { name } => resolve_column(name, env, path),
            Self::Prefix { op, operand } => {
                let value = operand.evaluate_with_path(env, path)?;
                Ok(match op {
                    PrefixOp::Neg => value.negate(),
                    PrefixOp::Not => Scalar::Bool(!value.truthy()),
                })
            }
            Self::Binary { left, op, right } => {
                let lhs = left.evaluate_with_path(env, path)?;
                let rhs = right.evaluate_with_path(env, path)?;
                Ok(op.apply(&lhs, &rhs))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumberLiteral { text } => f.write_str(text),
            Self::StringLiteral { value } => write!(f, "'{}'", value.replace('\'', "''")),
            Self::ColumnReference { name } => write!(f, "{{{}}}", name.replace('}', "\\}")),
            Self::Prefix { op, operand } => write!(f, "{}({operand})", op.symbol()),
            Self::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

/// Row backed by a plain map, with computed columns given as parsed
/// expressions. Derived values are memoized into the row.
#[derive(Debug, Clone)]
pub struct MapEnvironment<'a> {
    row: BTreeMap<String, Scalar>,
    computed: &'a BTreeMap<String, Expr>,
}

impl<'a> MapEnvironment<'a> {
    #[must_use]
    pub fn new(row: BTreeMap<String, Scalar>, computed: &'a BTreeMap<String, Expr>) -> Self {
        Self { row, computed }
    }

    #[must_use]
    pub fn into_row(self) -> BTreeMap<String, Scalar> {
        self.row
    }
}

impl RowValues for MapEnvironment<'_> {
    fn value(&self, column: &str) -> Option<Scalar> {
        self.row.get(column).cloned()
    }
}

impl Environment for MapEnvironment<'_> {
    fn derive(
        &mut self,
        column: &str,
        path: &mut EvalPath,
    ) -> Option<Result<Scalar, ExprError>> {
        let computed = self.computed;
        let expr = computed.get(column)?;
        let result = expr.evaluate_with_path(self, path);
        if let Ok(value) = &result {
            self.row.insert(column.to_owned(), value.clone());
        }
        Some(result)
    }
}

impl RowValues for BTreeMap<String, Scalar> {
    fn value(&self, column: &str) -> Option<Scalar> {
        self.get(column).cloned()
    }
}

impl Environment for BTreeMap<String, Scalar> {}

/// Parser for the column expression language. Holds no state; each
/// consumer owns its own instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionParser;

impl ExpressionParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Result<Expr, ExprError> {
        parse_expr(text)
    }
}

/// Parse an expression.
///
/// Grammar, loosest binding first:
///   or_expr      → and_expr ( "or" and_expr )*
///   and_expr     → equality ( "and" equality )*
///   equality     → ordering ( ("=" | "!=") ordering )*
///   ordering     → concat ( (">" | ">=" | "<" | "<=") concat )*
///   concat       → additive ( "&" additive )*
///   additive     → multiplicative ( ("+" | "-") multiplicative )*
///   multiplicative → prefix ( ("*" | "/" | "%") prefix )*
///   prefix       → ("-" | "not") prefix | atom
///   atom         → NUMBER | STRING | "{" COLUMN "}" | "(" or_expr ")"
///
/// Trees deeper than [`MAX_EXPR_DEPTH`] are rejected with a syntax error,
/// so a left-associative chain holds at most that many operators.
pub fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        end: input.chars().count(),
        tokens,
        pos: 0,
        nesting: 0,
    };
    let Node { expr, .. } = parser.parse_or()?;
    if let Some(trailing) = parser.tokens.get(parser.pos) {
        return Err(syntax_error(
            input,
            trailing.position,
            format!("unexpected {} after complete expression", trailing.token.describe()),
        ));
    }
    Ok(expr)
}

fn syntax_error(input: &str, position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        message: message.into(),
        input: input.to_owned(),
        position,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Column(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(text) => format!("number {text}"),
            Self::Str(value) => format!("string {value:?}"),
            Self::Column(name) => format!("column {{{name}}}"),
            Self::LParen => "'('".to_owned(),
            Self::RParen => "')'".to_owned(),
            other => match other.binary_op() {
                Some(op) => format!("operator {}", op.symbol()),
                None => "'not'".to_owned(),
            },
        }
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self {
            Self::Plus => BinaryOp::Add,
            Self::Minus => BinaryOp::Sub,
            Self::Star => BinaryOp::Mul,
            Self::Slash => BinaryOp::Div,
            Self::Percent => BinaryOp::Mod,
            Self::Ampersand => BinaryOp::Concat,
            Self::Eq => BinaryOp::Eq,
            Self::NotEq => BinaryOp::Ne,
            Self::Gt => BinaryOp::Gt,
            Self::Ge => BinaryOp::Ge,
            Self::Lt => BinaryOp::Lt,
            Self::Le => BinaryOp::Le,
            Self::And => BinaryOp::And,
            Self::Or => BinaryOp::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '&' => Token::Ampersand,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '=' => Token::Eq,
            '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(syntax_error(input, i, "expected '!=' but found single '!'"));
                }
                i += 1;
                Token::NotEq
            }
            '>' | '<' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                if or_equal {
                    i += 1;
                }
                match (c, or_equal) {
                    ('>', false) => Token::Gt,
                    ('>', true) => Token::Ge,
                    (_, false) => Token::Lt,
                    (_, true) => Token::Le,
                }
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(syntax_error(input, start, "unterminated string literal"));
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => break,
                        Some(&other) => {
                            value.push(other);
                            i += 1;
                        }
                    }
                }
                Token::Str(value)
            }
            '{' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(syntax_error(input, start, "unterminated column reference"));
                        }
                        Some('\\') if chars.get(i + 1) == Some(&'}') => {
                            name.push('}');
                            i += 2;
                        }
                        Some('}') => break,
                        Some(&other) => {
                            name.push(other);
                            i += 1;
                        }
                    }
                }
                Token::Column(name)
            }
            _ if c.is_ascii_digit() => {
                while chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                if chars.get(i + 1) == Some(&'.') {
                    i += 1;
                    while chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                        i += 1;
                    }
                }
                Token::Number(chars[start..=i].iter().collect())
            }
            _ if c.is_alphabetic() || c == '_' => {
                while chars
                    .get(i + 1)
                    .is_some_and(|next| next.is_alphanumeric() || *next == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => {
                        return Err(syntax_error(
                            input,
                            start,
                            format!("unknown bareword {word:?}; column names go in braces"),
                        ));
                    }
                }
            }
            _ => {
                return Err(syntax_error(input, i, format!("unexpected character {c:?}")));
            }
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
        i += 1;
    }
    Ok(tokens)
}

/// Deepest expression tree the parser builds. Evaluation, printing and
/// dropping all walk the tree recursively, so the bound keeps them on the
/// stack.
pub const MAX_EXPR_DEPTH: usize = 128;

/// Parentheses plus prefix operators open at once. The canonical form of a
/// tree at [`MAX_EXPR_DEPTH`] needs up to twice that.
const MAX_NESTING: usize = 2 * MAX_EXPR_DEPTH;

struct Parser<'a> {
    input: &'a str,
    end: usize,
    tokens: Vec<Spanned>,
    pos: usize,
    nesting: usize,
}

/// A parsed subtree and its height. Leaves are height 0.
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Self { expr, depth: 0 }
    }
}

type Level<'a> = fn(&mut Parser<'a>) -> Result<Node, ExprError>;

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn error_here(&self, message: impl Into<String>) -> ExprError {
        let position = self
            .tokens
            .get(self.pos)
            .map_or(self.end, |spanned| spanned.position);
        syntax_error(self.input, position, message)
    }

    fn check_depth(&self, depth: usize) -> Result<usize, ExprError> {
        if depth > MAX_EXPR_DEPTH {
            return Err(self.error_here(format!(
                "expression nests more than {MAX_EXPR_DEPTH} operators deep"
            )));
        }
        Ok(depth)
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_here(format!(
                "more than {MAX_NESTING} nested parentheses or prefix operators"
            )));
        }
        self.nesting += 1;
        Ok(())
    }

    /// One left-associative precedence level.
    fn binary_level(&mut self, operand: Level<'a>, ops: &[BinaryOp]) -> Result<Node, ExprError> {
        let mut left = operand(self)?;
        while let Some(op) = self
            .peek()
            .and_then(Token::binary_op)
            .filter(|op| ops.contains(op))
        {
            self.pos += 1;
            let right = operand(self)?;
            let depth = self.check_depth(left.depth.max(right.depth) + 1)?;
            left = Node {
                expr: Expr::Binary {
                    left: Box::new(left.expr),
                    op,
                    right: Box::new(right.expr),
                },
                depth,
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        self.binary_level(Self::parse_and, &[BinaryOp::Or])
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        self.binary_level(Self::parse_equality, &[BinaryOp::And])
    }

    fn parse_equality(&mut self) -> Result<Node, ExprError> {
        self.binary_level(Self::parse_ordering, &[BinaryOp::Eq, BinaryOp::Ne])
    }

    fn parse_ordering(&mut self) -> Result<Node, ExprError> {
        self.binary_level(
            Self::parse_concat,
            &[BinaryOp::Gt, BinaryOp::Ge, BinaryOp::Lt, BinaryOp::Le],
        )
    }

    fn parse_concat(&mut self) -> Result<Node, ExprError> {
        self.binary_level(Self::parse_additive, &[BinaryOp::Concat])
    }

    fn parse_additive(&mut self) -> Result<Node, ExprError> {
        self.binary_level(Self::parse_multiplicative, &[BinaryOp::Add, BinaryOp::Sub])
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ExprError> {
        self.binary_level(
            Self::parse_prefix,
            &[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod],
        )
    }

    fn parse_prefix(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek() {
            Some(Token::Minus) => PrefixOp::Neg,
            Some(Token::Not) => PrefixOp::Not,
            _ => return self.parse_atom(),
        };
        self.enter()?;
        self.pos += 1;
        let operand = self.parse_prefix()?;
        self.nesting -= 1;
        let depth = self.check_depth(operand.depth + 1)?;
        Ok(Node {
            expr: Expr::Prefix {
                op,
                operand: Box::new(operand.expr),
            },
            depth,
        })
    }

    fn parse_atom(&mut self) -> Result<Node, ExprError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        let node = match token {
            Token::Number(text) => Node::leaf(Expr::NumberLiteral { text }),
            Token::Str(value) => Node::leaf(Expr::StringLiteral { value }),
            Token::Column(name) => Node::leaf(Expr::ColumnReference { name }),
            Token::LParen => {
                self.enter()?;
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error_here("expected closing ')'"));
                }
                self.nesting -= 1;
                inner
            }
            other => {
                return Err(self.error_here(format!("unexpected {}", other.describe())));
            }
        };
        self.pos += 1;
        Ok(node)
    }
}
