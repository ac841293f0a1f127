//! Metadata and content filter language understood by the document store.
//!
//! The JSON form follows the usual vector-store convention: a field maps either
//! to a bare value (equality) or to an operator mapping (`{"$in": [...]}`), and
//! `$and` / `$or` combine lists of sub-filters.

use crate::document::{Metadata, scalar_to_string};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Every comparison operator a condition mapping may carry.
pub const CONDITION_OPERATORS: [&str; 8] =
    ["$in", "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$nin"];

/// Errors from parsing a filter's JSON form.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FilterError {
    #[error("filter must be a mapping, found {0}")]
    NotAMapping(String),
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("operator '{0}' expects a list")]
    ExpectedList(String),
    #[error("'{0}' expects a list of sub-filters")]
    ExpectedBranches(String),
}

/// True when `value` is a mapping carrying at least one comparison operator.
pub fn is_operator_mapping(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.keys().any(|k| CONDITION_OPERATORS.contains(&k.as_str())))
}

/// A single comparison against one metadata field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
}

impl Condition {
    fn parse(op: &str, arg: &Value) -> Result<Self, FilterError> {
        let list = || {
            arg.as_array()
                .cloned()
                .ok_or_else(|| FilterError::ExpectedList(op.to_string()))
        };
        Ok(match op {
            "$eq" => Self::Eq(arg.clone()),
            "$ne" => Self::Ne(arg.clone()),
            "$in" => Self::In(list()?),
            "$nin" => Self::Nin(list()?),
            "$gt" => Self::Gt(arg.clone()),
            "$gte" => Self::Gte(arg.clone()),
            "$lt" => Self::Lt(arg.clone()),
            "$lte" => Self::Lte(arg.clone()),
            other => return Err(FilterError::UnknownOperator(other.to_string())),
        })
    }

    fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::In(_) => "$in",
            Self::Nin(_) => "$nin",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
        }
    }

    fn argument(&self) -> Value {
        match self {
            Self::In(vs) | Self::Nin(vs) => Value::Array(vs.clone()),
            Self::Eq(v) | Self::Ne(v) | Self::Gt(v) | Self::Gte(v) | Self::Lt(v) | Self::Lte(v) => {
                v.clone()
            }
        }
    }

    /// Evaluate against a field value; `None` means the field is absent.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (Self::Eq(v), Some(a)) => loose_eq(a, v),
            (Self::Ne(v), Some(a)) => !loose_eq(a, v),
            (Self::Ne(_) | Self::Nin(_), None) => true,
            (Self::In(vs), Some(a)) => vs.iter().any(|v| loose_eq(a, v)),
            (Self::Nin(vs), Some(a)) => !vs.iter().any(|v| loose_eq(a, v)),
            (Self::Gt(v), Some(a)) => compare(a, v) == Some(Ordering::Greater),
            (Self::Gte(v), Some(a)) => matches!(
                compare(a, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (Self::Lt(v), Some(a)) => compare(a, v) == Some(Ordering::Less),
            (Self::Lte(v), Some(a)) => {
                matches!(compare(a, v), Some(Ordering::Less | Ordering::Equal))
            }
            (_, None) => false,
        }
    }
}

/// A metadata filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// All conditions must hold for `field`.
    Field {
        field: String,
        conditions: Vec<Condition>,
    },
}

impl Filter {
    pub fn field(field: impl Into<String>, condition: Condition) -> Self {
        Self::Field {
            field: field.into(),
            conditions: vec![condition],
        }
    }

    /// Parse a condition value (bare scalar or operator mapping) for one field.
    pub fn field_from_value(field: &str, value: &Value) -> Result<Self, FilterError> {
        let conditions = match value.as_object() {
            Some(ops) if is_operator_mapping(value) => ops
                .iter()
                .map(|(op, arg)| Condition::parse(op, arg))
                .collect::<Result<Vec<_>, _>>()?,
            _ => vec![Condition::Eq(value.clone())],
        };
        Ok(Self::Field {
            field: field.to_string(),
            conditions,
        })
    }

    /// Parse the JSON form of a filter.
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let map = value
            .as_object()
            .ok_or_else(|| FilterError::NotAMapping(value.to_string()))?;
        let mut parts = Vec::with_capacity(map.len());
        for (key, arg) in map {
            let part = match key.as_str() {
                "$and" | "$or" => {
                    let branches = arg
                        .as_array()
                        .ok_or_else(|| FilterError::ExpectedBranches(key.clone()))?
                        .iter()
                        .map(Self::from_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    if key == "$and" {
                        Self::And(branches)
                    } else {
                        Self::Or(branches)
                    }
                }
                op if op.starts_with('$') => {
                    return Err(FilterError::UnknownOperator(op.to_string()));
                }
                field => Self::field_from_value(field, arg)?,
            };
            parts.push(part);
        }
        Ok(combine_and(parts).unwrap_or(Self::And(Vec::new())))
    }

    /// Serialize back into the JSON form.
    pub fn to_value(&self) -> Value {
        match self {
            Self::And(branches) => {
                serde_json::json!({"$and": branches.iter().map(Self::to_value).collect::<Vec<_>>()})
            }
            Self::Or(branches) => {
                serde_json::json!({"$or": branches.iter().map(Self::to_value).collect::<Vec<_>>()})
            }
            Self::Field { field, conditions } => {
                let ops: Map<String, Value> = conditions
                    .iter()
                    .map(|c| (c.operator().to_string(), c.argument()))
                    .collect();
                let mut outer = Map::new();
                outer.insert(field.clone(), Value::Object(ops));
                Value::Object(outer)
            }
        }
    }

    /// Evaluate against a document's metadata. An empty `$and` matches everything,
    /// an empty `$or` matches nothing.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::And(branches) => branches.iter().all(|b| b.matches(metadata)),
            Self::Or(branches) => branches.iter().any(|b| b.matches(metadata)),
            Self::Field { field, conditions } => {
                let actual = metadata.get(field);
                conditions.iter().all(|c| c.matches(actual))
            }
        }
    }
}

/// Combine parts with `$and`, collapsing the single-part case.
pub fn combine_and(mut parts: Vec<Filter>) -> Option<Filter> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Filter::And(parts)),
    }
}

/// Combine parts with `$or`, collapsing the single-part case.
pub fn combine_or(mut parts: Vec<Filter>) -> Option<Filter> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Filter::Or(parts)),
    }
}

/// Substring filter over document content (`document_filter`).
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFilter {
    Contains(String),
    NotContains(String),
    And(Vec<ContentFilter>),
    Or(Vec<ContentFilter>),
}

impl ContentFilter {
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let map = value
            .as_object()
            .ok_or_else(|| FilterError::NotAMapping(value.to_string()))?;
        let mut parts = Vec::with_capacity(map.len());
        for (key, arg) in map {
            let part = match key.as_str() {
                "$contains" => Self::Contains(text_arg(arg)),
                "$not_contains" => Self::NotContains(text_arg(arg)),
                "$and" | "$or" => {
                    let branches = arg
                        .as_array()
                        .ok_or_else(|| FilterError::ExpectedBranches(key.clone()))?
                        .iter()
                        .map(Self::from_value)
                        .collect::<Result<Vec<_>, _>>()?;
                    if key == "$and" {
                        Self::And(branches)
                    } else {
                        Self::Or(branches)
                    }
                }
                other => return Err(FilterError::UnknownOperator(other.to_string())),
            };
            parts.push(part);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::And(parts)
        })
    }

    /// Case-insensitive evaluation against document content.
    pub fn matches(&self, content: &str) -> bool {
        match self {
            Self::Contains(needle) => content.to_lowercase().contains(&needle.to_lowercase()),
            Self::NotContains(needle) => !content.to_lowercase().contains(&needle.to_lowercase()),
            Self::And(branches) => branches.iter().all(|b| b.matches(content)),
            Self::Or(branches) => branches.iter().any(|b| b.matches(content)),
        }
    }
}

fn text_arg(arg: &Value) -> String {
    scalar_to_string(arg).unwrap_or_else(|| arg.to_string())
}

/// Equality that treats `2` and `"2"` as the same value.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_to_string(a), scalar_to_string(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Numeric comparison when both sides parse as numbers, else lexical.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let (x, y) = (scalar_to_string(a)?, scalar_to_string(b)?);
    match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
        (Ok(nx), Ok(ny)) => nx.partial_cmp(&ny),
        _ => Some(x.cmp(&y)),
    }
}
