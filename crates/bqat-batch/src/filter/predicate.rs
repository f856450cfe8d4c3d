//! Row predicates
//!
//! A query such as `sharpness > 40 and file != "x.png"` is parsed as the
//! WHERE clause of a SQL select, then compiled to a small expression tree
//! bound to column positions. `==`, `&` and `|` are accepted alongside `=`,
//! `and` and `or`, with the precedence of the latter. Column names with
//! spaces go in backticks; a double quoted name that is not a column is read
//! as text.

use bqat_common::{BqatError, Result};
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, SetExpr, Statement, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A typed table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Type a raw CSV cell: empty is null, then number, then boolean
    pub fn from_cell(cell: &str) -> Self {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return Scalar::Null;
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            if !n.is_nan() {
                return Scalar::Number(n);
            }
        }
        match trimmed {
            "true" | "True" | "TRUE" => Scalar::Bool(true),
            "false" | "False" | "FALSE" => Scalar::Bool(false),
            _ => Scalar::Text(cell.to_string()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0,
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Ordering between two non-null values of comparable type
    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Null, _) | (_, Scalar::Null) => None,
            (Scalar::Text(_), _) | (_, Scalar::Text(_)) => None,
            (a, b) => a.as_number()?.partial_cmp(&b.as_number()?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Column(usize),
    Literal(Scalar),
    Not(Box<Node>),
    Neg(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(Box<Node>, CmpOp, Box<Node>),
    Arith(Box<Node>, ArithOp, Box<Node>),
    IsNull {
        expr: Box<Node>,
        negated: bool,
    },
    Between {
        expr: Box<Node>,
        low: Box<Node>,
        high: Box<Node>,
        negated: bool,
    },
    InList {
        expr: Box<Node>,
        list: Vec<Node>,
        negated: bool,
    },
}

/// A compiled boolean row expression
#[derive(Debug, Clone)]
pub struct RowPredicate {
    root: Node,
}

impl RowPredicate {
    /// Parse `query` against the columns of `header`
    pub fn parse(query: &str, header: &[String]) -> Result<Self> {
        let columns: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let normalized = normalize_operators(query);
        let expr = parse_where(&normalized).map_err(|e| BqatError::invalid_predicate(query, e))?;
        let root = Compiler {
            query,
            columns: &columns,
        }
        .compile(&expr)?;

        Ok(Self { root })
    }

    /// Evaluate against one typed row
    pub fn matches(&self, row: &[Scalar]) -> bool {
        eval(&self.root, row).truthy()
    }
}

fn parse_where(query: &str) -> std::result::Result<Expr, String> {
    let sql = format!("SELECT * FROM t WHERE {query}");
    let mut statements = Parser::parse_sql(&GenericDialect {}, &sql).map_err(|e| e.to_string())?;
    if statements.len() != 1 {
        return Err("expected a single expression".to_string());
    }

    let Some(Statement::Query(query)) = statements.pop() else {
        return Err("expected a single expression".to_string());
    };
    let query = *query;
    match *query.body {
        SetExpr::Select(select) => {
            let select = *select;
            select
                .selection
                .ok_or_else(|| "empty expression".to_string())
        }
        _ => Err("expected a single expression".to_string()),
    }
}

/// Rewrite `==`, `&` and `|` to `=`, `and` and `or` outside quoted spans
fn normalize_operators(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' || c == '`' => quote = Some(c),
            None if c == '=' && chars.peek() == Some(&'=') => {
                chars.next();
            }
            None if c == '&' => {
                out.push_str(" and ");
                continue;
            }
            None if c == '|' => {
                out.push_str(" or ");
                continue;
            }
            None => {}
        }
        out.push(c);
    }
    out
}

struct Compiler<'a> {
    query: &'a str,
    columns: &'a HashMap<&'a str, usize>,
}

impl Compiler<'_> {
    fn compile(&self, expr: &Expr) -> Result<Node> {
        let node = match expr {
            Expr::Identifier(ident) => self.identifier(ident)?,
            Expr::CompoundIdentifier(parts) => {
                let name = parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                self.column(&name)?
            }
            Expr::Value(value) => Node::Literal(literal(value)),
            Expr::Nested(inner) => self.compile(inner)?,
            Expr::UnaryOp { op, expr } => {
                let inner = Box::new(self.compile(expr)?);
                match op {
                    UnaryOperator::Not => Node::Not(inner),
                    UnaryOperator::Minus => Node::Neg(inner),
                    UnaryOperator::Plus => *inner,
                    other => return Err(self.unsupported(format!("operator {other}"))),
                }
            }
            Expr::BinaryOp { left, op, right } => {
                let l = Box::new(self.compile(left)?);
                let r = Box::new(self.compile(right)?);
                match op {
                    BinaryOperator::And => Node::And(l, r),
                    BinaryOperator::Or => Node::Or(l, r),
                    BinaryOperator::Eq => Node::Compare(l, CmpOp::Eq, r),
                    BinaryOperator::NotEq => Node::Compare(l, CmpOp::NotEq, r),
                    BinaryOperator::Lt => Node::Compare(l, CmpOp::Lt, r),
                    BinaryOperator::LtEq => Node::Compare(l, CmpOp::LtEq, r),
                    BinaryOperator::Gt => Node::Compare(l, CmpOp::Gt, r),
                    BinaryOperator::GtEq => Node::Compare(l, CmpOp::GtEq, r),
                    BinaryOperator::Plus => Node::Arith(l, ArithOp::Add, r),
                    BinaryOperator::Minus => Node::Arith(l, ArithOp::Sub, r),
                    BinaryOperator::Multiply => Node::Arith(l, ArithOp::Mul, r),
                    BinaryOperator::Divide => Node::Arith(l, ArithOp::Div, r),
                    BinaryOperator::Modulo => Node::Arith(l, ArithOp::Mod, r),
                    other => return Err(self.unsupported(format!("operator {other}"))),
                }
            }
            Expr::IsNull(inner) => Node::IsNull {
                expr: Box::new(self.compile(inner)?),
                negated: false,
            },
            Expr::IsNotNull(inner) => Node::IsNull {
                expr: Box::new(self.compile(inner)?),
                negated: true,
            },
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Node::Between {
                expr: Box::new(self.compile(expr)?),
                low: Box::new(self.compile(low)?),
                high: Box::new(self.compile(high)?),
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Node::InList {
                expr: Box::new(self.compile(expr)?),
                list: list
                    .iter()
                    .map(|e| self.compile(e))
                    .collect::<Result<Vec<_>>>()?,
                negated: *negated,
            },
            other => return Err(self.unsupported(format!("expression `{other}`"))),
        };
        Ok(node)
    }

    fn identifier(&self, ident: &Ident) -> Result<Node> {
        match (self.columns.get(ident.value.as_str()), ident.quote_style) {
            (Some(&i), _) => Ok(Node::Column(i)),
            (None, Some('"')) => Ok(Node::Literal(Scalar::Text(ident.value.clone()))),
            (None, _) => Err(BqatError::UnknownColumn(ident.value.clone())),
        }
    }

    fn unsupported(&self, what: String) -> BqatError {
        BqatError::invalid_predicate(self.query, format!("unsupported {what}"))
    }

    fn column(&self, name: &str) -> Result<Node> {
        self.columns
            .get(name)
            .map(|&i| Node::Column(i))
            .ok_or_else(|| BqatError::UnknownColumn(name.to_string()))
    }
}

fn literal(value: &SqlValue) -> Scalar {
    match value {
        SqlValue::Number(n, _) => n
            .parse::<f64>()
            .map(Scalar::Number)
            .unwrap_or_else(|_| Scalar::Text(n.clone())),
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Scalar::Text(s.clone())
        }
        SqlValue::Boolean(b) => Scalar::Bool(*b),
        SqlValue::Null => Scalar::Null,
        other => Scalar::Text(other.to_string()),
    }
}

fn eval(node: &Node, row: &[Scalar]) -> Scalar {
    match node {
        Node::Column(i) => row.get(*i).cloned().unwrap_or(Scalar::Null),
        Node::Literal(value) => value.clone(),
        Node::Not(inner) => Scalar::Bool(!eval(inner, row).truthy()),
        Node::Neg(inner) => match eval(inner, row).as_number() {
            Some(n) => Scalar::Number(-n),
            None => Scalar::Null,
        },
        Node::And(l, r) => Scalar::Bool(eval(l, row).truthy() && eval(r, row).truthy()),
        Node::Or(l, r) => Scalar::Bool(eval(l, row).truthy() || eval(r, row).truthy()),
        Node::Compare(l, op, r) => Scalar::Bool(compare(&eval(l, row), *op, &eval(r, row))),
        Node::Arith(l, op, r) => arith(&eval(l, row), *op, &eval(r, row)),
        Node::IsNull { expr, negated } => {
            Scalar::Bool((eval(expr, row) == Scalar::Null) != *negated)
        }
        Node::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = eval(expr, row);
            let inside = compare(&value, CmpOp::GtEq, &eval(low, row))
                && compare(&value, CmpOp::LtEq, &eval(high, row));
            Scalar::Bool(inside != *negated)
        }
        Node::InList {
            expr,
            list,
            negated,
        } => {
            let value = eval(expr, row);
            let found = list
                .iter()
                .any(|item| compare(&value, CmpOp::Eq, &eval(item, row)));
            Scalar::Bool(found != *negated)
        }
    }
}

/// Comparisons with a null, or across incompatible types, are false; `!=` is
/// their negation.
fn compare(left: &Scalar, op: CmpOp, right: &Scalar) -> bool {
    let ordering = left.compare(right);
    match op {
        CmpOp::Eq => ordering == Some(Ordering::Equal),
        CmpOp::NotEq => ordering != Some(Ordering::Equal),
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::LtEq => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::GtEq => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

fn arith(left: &Scalar, op: ArithOp, right: &Scalar) -> Scalar {
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Scalar::Null;
    };
    let value = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return Scalar::Null,
        ArithOp::Div => a / b,
        ArithOp::Mod if b == 0.0 => return Scalar::Null,
        ArithOp::Mod => a % b,
    };
    Scalar::Number(value)
}
