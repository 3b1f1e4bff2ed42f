//! Filter and sort compilation to SQLite
//!
//! Text comparisons are case-insensitive and a missing value only satisfies
//! `NotEquals`, so a compiled filter selects the same users as
//! `FilterExpression::matches`.

use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::types::{
    fields, Criterion, FilterExpression, FilterOperator, FilterValue, SortCriterion, SortDirection,
};
use rollcall_core::{Error, FilterError, Result};
use sqlx::{QueryBuilder, Sqlite};

/// Column list matching [`crate::users::UserRow`]
pub const USER_COLUMNS: &str =
    "id, user_name, email, display_name, first_name, last_name, phone, created_at, modified_at";

/// Storage format of timestamps; fixed width so text order is time order.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::DatabaseError(format!("bad timestamp '{}': {}", text, e)))
}

/// Where a field lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Users(&'static str),
    Groups,
}

pub fn column_for(field: &str) -> Result<Column> {
    let column = match fields::canonical(field) {
        Some(fields::ID) => "id",
        Some(fields::USER_NAME) => "user_name",
        Some(fields::EMAIL) => "email",
        Some(fields::DISPLAY_NAME) => "display_name",
        Some(fields::FIRST_NAME) => "first_name",
        Some(fields::LAST_NAME) => "last_name",
        Some(fields::PHONE) => "phone",
        Some(fields::CREATED_AT) => "created_at",
        Some(fields::MODIFIED_AT) => "modified_at",
        Some(fields::GROUPS) => return Ok(Column::Groups),
        _ => return Err(Error::InvalidArgument(format!("unknown field '{}'", field))),
    };
    Ok(Column::Users(column))
}

/// Append `filter` as a boolean SQL expression.
pub fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FilterExpression) -> Result<()> {
    match filter {
        FilterExpression::Comparison(criterion) => push_criterion(qb, criterion),
        FilterExpression::And(children) => push_group(qb, children, " AND ", "And"),
        FilterExpression::Or(children) => push_group(qb, children, " OR ", "Or"),
    }
}

fn push_group(
    qb: &mut QueryBuilder<'_, Sqlite>,
    children: &[FilterExpression],
    separator: &str,
    name: &'static str,
) -> Result<()> {
    if children.is_empty() {
        return Err(FilterError::EmptyGroup(name).into());
    }
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, child)?;
    }
    qb.push(")");
    Ok(())
}

/// A filter value in the shape it is bound with.
enum Bound {
    Text(String),
    Number(f64),
}

fn bound_value(criterion: &Criterion) -> Result<Bound> {
    let unsupported = || FilterError::UnsupportedOperator {
        field: criterion.field.clone(),
        operator: criterion.operator.to_string(),
        value: criterion.value.kind().to_string(),
    };
    if criterion.operator.is_pattern() && !matches!(criterion.value, FilterValue::Text(_)) {
        return Err(unsupported().into());
    }
    let bound = match &criterion.value {
        FilterValue::Field(other) => {
            return Err(FilterError::FieldComparison {
                field: criterion.field.clone(),
                other: other.clone(),
            }
            .into())
        }
        FilterValue::Text(s) => Bound::Text(s.clone()),
        FilterValue::Bool(b) => {
            if criterion.operator.is_range() {
                return Err(unsupported().into());
            }
            Bound::Text(b.to_string())
        }
        FilterValue::Int(v) => Bound::Number(*v as f64),
        FilterValue::UInt(v) => Bound::Number(*v as f64),
        FilterValue::Float(v) => Bound::Number(*v),
        FilterValue::Guid(g) => Bound::Text(g.to_string()),
        FilterValue::DateTime(ts) => Bound::Text(encode_timestamp(ts)),
    };
    Ok(bound)
}

fn like_pattern(operator: FilterOperator, needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    match operator {
        FilterOperator::Contains => format!("%{}%", escaped),
        FilterOperator::StartsWith => format!("{}%", escaped),
        _ => format!("%{}", escaped),
    }
}

fn sql_operator(operator: FilterOperator) -> &'static str {
    match operator {
        FilterOperator::Equals | FilterOperator::NotEquals => "=",
        FilterOperator::GreaterThan => ">",
        FilterOperator::GreaterThanOrEqual => ">=",
        FilterOperator::LessThan => "<",
        FilterOperator::LessThanOrEqual => "<=",
        _ => "LIKE",
    }
}

/// `<column> <op> ?`, without the negation of `NotEquals`.
fn push_predicate(
    qb: &mut QueryBuilder<'_, Sqlite>,
    column: &str,
    operator: FilterOperator,
    value: Bound,
) {
    match value {
        Bound::Text(text) if operator.is_pattern() => {
            qb.push(column);
            qb.push(" LIKE ");
            qb.push_bind(like_pattern(operator, &text));
            qb.push(" ESCAPE '\\'");
        }
        Bound::Text(text) => {
            qb.push(column);
            qb.push(" ");
            qb.push(sql_operator(operator));
            qb.push(" ");
            qb.push_bind(text);
            qb.push(" COLLATE NOCASE");
        }
        Bound::Number(number) => {
            qb.push("CAST(");
            qb.push(column);
            qb.push(" AS REAL) ");
            qb.push(sql_operator(operator));
            qb.push(" ");
            qb.push_bind(number);
        }
    }
}

fn push_criterion(qb: &mut QueryBuilder<'_, Sqlite>, criterion: &Criterion) -> Result<()> {
    let column = column_for(&criterion.field)?;
    let value = bound_value(criterion)?;
    let negated = criterion.operator == FilterOperator::NotEquals;

    match column {
        Column::Users(column) => {
            if negated {
                qb.push("(");
                qb.push(column);
                qb.push(" IS NULL OR NOT (");
                push_predicate(qb, column, criterion.operator, value);
                qb.push("))");
            } else {
                qb.push("(");
                push_predicate(qb, column, criterion.operator, value);
                qb.push(")");
            }
        }
        Column::Groups => {
            qb.push(if negated { "NOT EXISTS" } else { "EXISTS" });
            qb.push(" (SELECT 1 FROM user_groups g WHERE g.user_id = users.id AND ");
            push_predicate(qb, "g.group_name", criterion.operator, value);
            qb.push(")");
        }
    }
    Ok(())
}

/// `ORDER BY` clause for one criterion, or `None` when the field has no
/// sortable column and the caller must sort in memory.
pub fn order_by(criterion: &SortCriterion) -> Option<String> {
    let direction = match criterion.direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    };
    let clause = match column_for(&criterion.field).ok()? {
        Column::Groups => return None,
        Column::Users(column @ ("id" | "created_at" | "modified_at")) => {
            format!(" ORDER BY {} {}, id ASC", column, direction)
        }
        Column::Users(column) => format!(
            " ORDER BY lower({col}) {dir}, {col} {dir}, id ASC",
            col = column,
            dir = direction
        ),
    };
    Some(clause)
}
