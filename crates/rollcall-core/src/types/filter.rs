//! Filter expressions
//!
//! A filter is an immutable tree of field comparisons joined by AND/OR
//! groups. The fluent builders flatten chains of the same connective, so
//! `a.or(b).or(c)` is one OR group with three operands while
//! `a.and(b).or(c)` is an OR group whose first operand is the AND group.
//! Backends translate the tree into their own query language.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use super::user::{fields, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::Contains => "contains",
            Self::StartsWith => "starts-with",
            Self::EndsWith => "ends-with",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a comparison; the variant drives value encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    /// Reference to another field of the same entry
    Field(String),
}

impl FilterValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::UInt(_) => "unsigned integer",
            Self::Float(_) => "floating point",
            Self::Guid(_) => "guid",
            Self::DateTime(_) => "date-time",
            Self::Field(_) => "field reference",
        }
    }

    /// The identifier carried by this value, if it denotes one.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Self::Guid(id) => Some(*id),
            Self::Text(s) => Uuid::parse_str(s.trim()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Guid(g) => write!(f, "{{{}}}", g),
            Self::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Field(name) => write!(f, "[{}]", name),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for FilterValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Uuid> for FilterValue {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

/// A single `field <op> value` comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Criterion {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// `Id == <guid>` criteria yield their identifier.
    pub fn id_equality(&self) -> Option<Uuid> {
        if self.operator == FilterOperator::Equals && fields::is(&self.field, fields::ID) {
            self.value.as_guid()
        } else {
            None
        }
    }

    /// Evaluate against a user, comparing text case-insensitively.
    pub fn matches(&self, user: &User) -> bool {
        let left = user.field_values(&self.field);
        if left.is_empty() {
            return self.operator == FilterOperator::NotEquals;
        }
        let right = match &self.value {
            FilterValue::Field(other) => match user.field_value(other) {
                Some(v) => FilterValue::Text(v),
                None => return self.operator == FilterOperator::NotEquals,
            },
            // Braced, simple and urn spellings all name the same id
            other if !self.operator.is_pattern() && fields::is(&self.field, fields::ID) => {
                other.as_guid().map_or_else(|| other.clone(), FilterValue::Guid)
            }
            other => other.clone(),
        };
        if self.operator == FilterOperator::NotEquals {
            return !left.iter().any(|l| compare_scalar(l, &right) == Some(Ordering::Equal));
        }
        left.iter().any(|l| self.matches_one(l, &right))
    }

    fn matches_one(&self, left: &str, right: &FilterValue) -> bool {
        if self.operator.is_pattern() {
            let FilterValue::Text(needle) = right else {
                return false;
            };
            let haystack = left.to_lowercase();
            let needle = needle.to_lowercase();
            return match self.operator {
                FilterOperator::Contains => haystack.contains(&needle),
                FilterOperator::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            };
        }
        let Some(ordering) = compare_scalar(left, right) else {
            return false;
        };
        match self.operator {
            FilterOperator::Equals => ordering == Ordering::Equal,
            FilterOperator::GreaterThan => ordering == Ordering::Greater,
            FilterOperator::GreaterThanOrEqual => ordering != Ordering::Less,
            FilterOperator::LessThan => ordering == Ordering::Less,
            FilterOperator::LessThanOrEqual => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

/// Order a stored string value against a typed filter value.
fn compare_scalar(left: &str, right: &FilterValue) -> Option<Ordering> {
    match right {
        FilterValue::Text(r) | FilterValue::Field(r) => {
            Some(left.to_lowercase().cmp(&r.to_lowercase()))
        }
        FilterValue::Bool(r) => left.parse::<bool>().ok().map(|l| l.cmp(r)),
        FilterValue::Int(r) => left.trim().parse::<i128>().ok().map(|l| l.cmp(&(*r as i128))),
        FilterValue::UInt(r) => left.trim().parse::<i128>().ok().map(|l| l.cmp(&(*r as i128))),
        FilterValue::Float(r) => left.trim().parse::<f64>().ok().and_then(|l| l.partial_cmp(r)),
        FilterValue::Guid(r) => Uuid::parse_str(left).ok().map(|l| l.cmp(r)),
        FilterValue::DateTime(r) => DateTime::parse_from_rfc3339(left)
            .ok()
            .map(|l| l.with_timezone(&Utc).cmp(r)),
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpression {
    Comparison(Criterion),
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
}

/// Result of splitting an oversized filter into bounded parts.
///
/// With `Some(Or)` the part results are united, with `Some(And)` they are
/// intersected; `None` means the filter was small enough and `parts` holds
/// it unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSplit {
    pub connective: Option<Connective>,
    pub parts: Vec<FilterExpression>,
}

impl FilterExpression {
    pub fn compare(field: impl Into<String>, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self::Comparison(Criterion::new(field, operator, value))
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, FilterOperator::Equals, value)
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, FilterOperator::NotEquals, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, FilterOperator::Contains, FilterValue::Text(value.into()))
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, FilterOperator::StartsWith, FilterValue::Text(value.into()))
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, FilterOperator::EndsWith, FilterValue::Text(value.into()))
    }

    pub fn id_equals(id: Uuid) -> Self {
        Self::equals(fields::ID, FilterValue::Guid(id))
    }

    /// `Id == a OR Id == b OR ...`; `None` for an empty id list.
    pub fn any_id(ids: impl IntoIterator<Item = Uuid>) -> Option<Self> {
        ids.into_iter()
            .map(Self::id_equals)
            .reduce(|acc, next| acc.or(next))
    }

    pub fn and(self, other: FilterExpression) -> Self {
        match self {
            Self::And(mut operands) => {
                operands.push(other);
                Self::And(operands)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: FilterExpression) -> Self {
        match self {
            Self::Or(mut operands) => {
                operands.push(other);
                Self::Or(operands)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn connective(&self) -> Option<Connective> {
        match self {
            Self::Comparison(_) => None,
            Self::And(_) => Some(Connective::And),
            Self::Or(_) => Some(Connective::Or),
        }
    }

    /// Number of links in the top-level chain.
    pub fn chain_len(&self) -> usize {
        match self {
            Self::Comparison(_) => 1,
            Self::And(operands) | Self::Or(operands) => operands.len(),
        }
    }

    /// Nesting depth; a bare comparison has depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Self::Comparison(_) => 0,
            Self::And(operands) | Self::Or(operands) => {
                1 + operands.iter().map(Self::depth).max().unwrap_or(0)
            }
        }
    }

    /// Total number of comparisons in the tree.
    pub fn criteria_count(&self) -> usize {
        match self {
            Self::Comparison(_) => 1,
            Self::And(operands) | Self::Or(operands) => {
                operands.iter().map(Self::criteria_count).sum()
            }
        }
    }

    /// Copy with every field name (including field references) renamed.
    pub fn translate_fields<F>(&self, rename: &F) -> Self
    where
        F: Fn(&str) -> String,
    {
        match self {
            Self::Comparison(c) => Self::Comparison(Criterion {
                field: rename(&c.field),
                operator: c.operator,
                value: match &c.value {
                    FilterValue::Field(other) => FilterValue::Field(rename(other)),
                    v => v.clone(),
                },
            }),
            Self::And(operands) => {
                Self::And(operands.iter().map(|o| o.translate_fields(rename)).collect())
            }
            Self::Or(operands) => {
                Self::Or(operands.iter().map(|o| o.translate_fields(rename)).collect())
            }
        }
    }

    /// Split the top-level chain into parts of at most `max_len` links.
    pub fn split(&self, max_len: usize) -> FilterSplit {
        let max_len = max_len.max(1);
        match self {
            Self::And(operands) if operands.len() > max_len => FilterSplit {
                connective: Some(Connective::And),
                parts: chunk(operands, max_len, Self::And),
            },
            Self::Or(operands) if operands.len() > max_len => FilterSplit {
                connective: Some(Connective::Or),
                parts: chunk(operands, max_len, Self::Or),
            },
            other => FilterSplit {
                connective: None,
                parts: vec![other.clone()],
            },
        }
    }

    /// Identifiers of a filter that is purely `Id == x` joined by OR.
    ///
    /// Returns `None` as soon as any node is something else, which makes the
    /// filter ineligible for cache lookups.
    pub fn id_only_values(&self) -> Option<Vec<Uuid>> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids)?;
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(*id));
        Some(ids)
    }

    fn collect_ids(&self, ids: &mut Vec<Uuid>) -> Option<()> {
        match self {
            Self::Comparison(c) => {
                ids.push(c.id_equality()?);
                Some(())
            }
            Self::Or(operands) if !operands.is_empty() => {
                for operand in operands {
                    operand.collect_ids(ids)?;
                }
                Some(())
            }
            // A single-operand AND is just a parenthesized comparison
            Self::And(operands) if operands.len() == 1 => operands[0].collect_ids(ids),
            _ => None,
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        match self {
            Self::Comparison(c) => c.matches(user),
            Self::And(operands) => operands.iter().all(|o| o.matches(user)),
            Self::Or(operands) => operands.iter().any(|o| o.matches(user)),
        }
    }
}

fn chunk(
    operands: &[FilterExpression],
    max_len: usize,
    wrap: fn(Vec<FilterExpression>) -> FilterExpression,
) -> Vec<FilterExpression> {
    operands
        .chunks(max_len)
        .map(|part| {
            if part.len() == 1 {
                part[0].clone()
            } else {
                wrap(part.to_vec())
            }
        })
        .collect()
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison(c) => write!(f, "{}", c),
            Self::And(operands) | Self::Or(operands) => {
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{}", operand)?;
                }
                f.write_str(")")
            }
        }
    }
}
