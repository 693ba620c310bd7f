//! PostgREST-style predicates and orderings.
//!
//! A [`Filter`] is a conjunction of conditions; each condition is either a
//! `field=op.value` predicate or an `or(...)` group. Encoding produces the
//! query pairs PostgREST expects, so `Filter::new().eq("id", 1)` becomes
//! `id=eq.1`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    In,
    Is,
    ILike,
    Lt,
    Gt,
    Gte,
    Lte,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::In => "in",
            Op::Is => "is",
            Op::ILike => "ilike",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lte => "lte",
        }
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    List(Vec<String>),
    Null,
    Bool(bool),
}

impl Operand {
    /// Scalars are only quoted inside `or(...)` groups; list items always are
    /// when they carry reserved characters.
    fn render(&self, nested: bool) -> String {
        match self {
            Operand::Text(value) if nested => quote(value),
            Operand::Text(value) => value.clone(),
            Operand::List(values) => {
                let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
                format!("({})", items.join(","))
            }
            Operand::Null => "null".to_string(),
            Operand::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field {
        field: String,
        op: Op,
        operand: Operand,
    },
    Or(Vec<Condition>),
}

impl Condition {
    pub fn field(field: &str, op: Op, operand: Operand) -> Self {
        Condition::Field {
            field: field.to_string(),
            op,
            operand,
        }
    }

    /// Inline form used inside `or(...)`: `field.op.value`.
    fn inline(&self) -> String {
        match self {
            Condition::Field { field, op, operand } => {
                format!("{}.{}.{}", field, op.as_str(), operand.render(true))
            }
            Condition::Or(inner) => {
                let parts: Vec<String> = inner.iter().map(Condition::inline).collect();
                format!("or({})", parts.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: &str, value: impl ToString) -> Self {
        self.push(Condition::field(field, Op::Eq, Operand::Text(value.to_string())))
    }

    pub fn in_list<I, T>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let values = values.into_iter().map(|v| v.to_string()).collect();
        self.push(Condition::field(field, Op::In, Operand::List(values)))
    }

    pub fn is_null(self, field: &str) -> Self {
        self.push(Condition::field(field, Op::Is, Operand::Null))
    }

    pub fn is_bool(self, field: &str, value: bool) -> Self {
        self.push(Condition::field(field, Op::Is, Operand::Bool(value)))
    }

    pub fn ilike(self, field: &str, pattern: &str) -> Self {
        self.push(Condition::field(field, Op::ILike, Operand::Text(pattern.to_string())))
    }

    pub fn lt(self, field: &str, value: impl ToString) -> Self {
        self.push(Condition::field(field, Op::Lt, Operand::Text(value.to_string())))
    }

    pub fn gt(self, field: &str, value: impl ToString) -> Self {
        self.push(Condition::field(field, Op::Gt, Operand::Text(value.to_string())))
    }

    pub fn gte(self, field: &str, value: impl ToString) -> Self {
        self.push(Condition::field(field, Op::Gte, Operand::Text(value.to_string())))
    }

    pub fn lte(self, field: &str, value: impl ToString) -> Self {
        self.push(Condition::field(field, Op::Lte, Operand::Text(value.to_string())))
    }

    pub fn or(self, any_of: Vec<Condition>) -> Self {
        self.push(Condition::Or(any_of))
    }

    /// Query-string pairs in PostgREST syntax.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.conditions
            .iter()
            .map(|c| match c {
                Condition::Field { field, op, operand } => {
                    (field.clone(), format!("{}.{}", op.as_str(), operand))
                }
                Condition::Or(inner) => {
                    let parts: Vec<String> = inner.iter().map(Condition::inline).collect();
                    ("or".to_string(), format!("({})", parts.join(",")))
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }
}

pub fn encode_order(order: &[Order]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let parts: Vec<String> = order
        .iter()
        .map(|o| match o.direction {
            Direction::Asc => format!("{}.asc", o.field),
            Direction::Desc => format!("{}.desc", o.field),
        })
        .collect();
    Some(parts.join(","))
}

/// Values with PostgREST-reserved characters must be double quoted.
fn quote(value: &str) -> String {
    let reserved = value
        .chars()
        .any(|c| matches!(c, ',' | '(' | ')' | '"' | ':') || c.is_whitespace());
    if reserved {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Reverses [`quote`] for a single list item or scalar.
pub fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}
