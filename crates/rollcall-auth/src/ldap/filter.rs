//! Filter expression to RFC 4515 search filter translation
//!
//! Strict inequalities are not part of LDAP filter syntax. Numeric, float
//! and timestamp values are moved one step past the bound and emitted as
//! `>=`/`<=`; text bounds become `(&(a>=v)(!(a=v)))`.

use chrono::{DateTime, Duration, Timelike, Utc};
use ldap3::ldap_escape;
use rollcall_core::types::{Criterion, FilterExpression, FilterOperator, FilterValue};
use rollcall_core::utils::format_generalized_time;
use rollcall_core::FilterError;
use uuid::Uuid;

use super::types::{AttributeMappings, OBJECT_GUID};

pub struct FilterBuilder<'a> {
    mappings: &'a AttributeMappings,
    object_classes: &'a [String],
    max_depth: usize,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(mappings: &'a AttributeMappings, object_classes: &'a [String], max_depth: usize) -> Self {
        Self {
            mappings,
            object_classes,
            max_depth,
        }
    }

    /// Full search filter: the object class guard plus the translated condition.
    pub fn search_filter(&self, filter: Option<&FilterExpression>) -> Result<String, FilterError> {
        let mut out = String::from("(&");
        for class in self.object_classes {
            out.push_str(&format!("(objectClass={})", ldap_escape(class)));
        }
        if let Some(filter) = filter {
            self.write(filter, 0, &mut out)?;
        }
        out.push(')');
        Ok(out)
    }

    /// Translated condition only.
    pub fn translate(&self, filter: &FilterExpression) -> Result<String, FilterError> {
        let mut out = String::new();
        self.write(filter, 0, &mut out)?;
        Ok(out)
    }

    fn write(&self, expr: &FilterExpression, depth: usize, out: &mut String) -> Result<(), FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::TooDeep(self.max_depth));
        }
        match expr {
            FilterExpression::Comparison(criterion) => self.write_criterion(criterion, out),
            FilterExpression::And(operands) => self.write_group('&', "And", operands, depth, out),
            FilterExpression::Or(operands) => self.write_group('|', "Or", operands, depth, out),
        }
    }

    fn write_group(
        &self,
        op: char,
        name: &'static str,
        operands: &[FilterExpression],
        depth: usize,
        out: &mut String,
    ) -> Result<(), FilterError> {
        match operands {
            [] => Err(FilterError::EmptyGroup(name)),
            [single] => self.write(single, depth + 1, out),
            _ => {
                out.push('(');
                out.push(op);
                for operand in operands {
                    self.write(operand, depth + 1, out)?;
                }
                out.push(')');
                Ok(())
            }
        }
    }

    fn write_criterion(&self, criterion: &Criterion, out: &mut String) -> Result<(), FilterError> {
        let attr = self.mappings.attribute_for(&criterion.field);
        let value = &criterion.value;

        if let FilterValue::Field(other) = value {
            return Err(FilterError::FieldComparison {
                field: criterion.field.clone(),
                other: other.clone(),
            });
        }

        let unsupported = || FilterError::UnsupportedOperator {
            field: criterion.field.clone(),
            operator: criterion.operator.to_string(),
            value: value.kind().to_string(),
        };

        match criterion.operator {
            FilterOperator::Equals => {
                out.push_str(&format!("({}={})", attr, encode_value(attr, value)));
            }
            FilterOperator::NotEquals => {
                out.push_str(&format!("(!({}={}))", attr, encode_value(attr, value)));
            }
            FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
                let FilterValue::Text(text) = value else {
                    return Err(unsupported());
                };
                let escaped = ldap_escape(text);
                let pattern = match criterion.operator {
                    FilterOperator::Contains => format!("*{}*", escaped),
                    FilterOperator::StartsWith => format!("{}*", escaped),
                    _ => format!("*{}", escaped),
                };
                out.push_str(&format!("({}={})", attr, pattern));
            }
            op => {
                let bound = range_bound(op, value).ok_or_else(unsupported)?;
                match bound {
                    RangeBound::Inclusive(cmp, encoded) => {
                        out.push_str(&format!("({}{}={})", attr, cmp, encoded));
                    }
                    RangeBound::ExcludingEqual(cmp, encoded) => {
                        out.push_str(&format!(
                            "(&({attr}{cmp}={v})(!({attr}={v})))",
                            attr = attr,
                            cmp = cmp,
                            v = encoded
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

enum RangeBound {
    /// `(attr<cmp>=value)`
    Inclusive(char, String),
    /// Inclusive bound minus the bound itself, for values without a successor
    ExcludingEqual(char, String),
}

fn range_bound(op: FilterOperator, value: &FilterValue) -> Option<RangeBound> {
    let (cmp, strict) = match op {
        FilterOperator::GreaterThan => ('>', true),
        FilterOperator::GreaterThanOrEqual => ('>', false),
        FilterOperator::LessThan => ('<', true),
        FilterOperator::LessThanOrEqual => ('<', false),
        _ => return None,
    };
    let up = cmp == '>';

    let encoded = match value {
        FilterValue::Int(v) => step_integer(*v as i128, strict, up),
        FilterValue::UInt(v) => step_integer(*v as i128, strict, up),
        FilterValue::Float(v) => {
            let v = match (strict, up) {
                (false, _) => *v,
                (true, true) => next_up(*v),
                (true, false) => next_down(*v),
            };
            v.to_string()
        }
        FilterValue::DateTime(ts) => format_generalized_time(&timestamp_bound(ts, strict, up)),
        FilterValue::Text(text) => {
            let escaped = ldap_escape(text).into_owned();
            return Some(if strict {
                RangeBound::ExcludingEqual(cmp, escaped)
            } else {
                RangeBound::Inclusive(cmp, escaped)
            });
        }
        FilterValue::Bool(_) | FilterValue::Guid(_) | FilterValue::Field(_) => return None,
    };
    Some(RangeBound::Inclusive(cmp, encoded))
}

/// Widened so that `u64::MAX + 1` and `0 - 1` stay representable.
fn step_integer(v: i128, strict: bool, up: bool) -> String {
    match (strict, up) {
        (false, _) => v.to_string(),
        (true, true) => (v + 1).to_string(),
        (true, false) => (v - 1).to_string(),
    }
}

fn next_up(v: f64) -> f64 {
    if v.is_nan() || v == f64::INFINITY {
        return v;
    }
    if v == 0.0 {
        return f64::from_bits(1);
    }
    let bits = v.to_bits();
    if v > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

fn next_down(v: f64) -> f64 {
    -next_up(-v)
}

/// Generalized time carries whole seconds, so bounds are snapped to the
/// nearest second that keeps the comparison exact.
fn timestamp_bound(ts: &DateTime<Utc>, strict: bool, up: bool) -> DateTime<Utc> {
    let truncated = ts.with_nanosecond(0).unwrap_or(*ts);
    let fractional = truncated != *ts;
    let second = Duration::seconds(1);
    match (up, strict) {
        (true, true) => truncated + second,
        (true, false) if fractional => truncated + second,
        (true, false) => truncated,
        (false, true) if fractional => truncated,
        (false, true) => truncated - second,
        (false, false) => truncated,
    }
}

/// objectGUID octets in Microsoft byte order, each as `\xx`.
pub fn encode_guid(id: &Uuid) -> String {
    id.to_bytes_le()
        .iter()
        .map(|b| format!("\\{:02x}", b))
        .collect()
}

pub fn decode_guid(bytes: &[u8]) -> Option<Uuid> {
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes_le(bytes))
}

/// Text compared against objectGUID is parsed as a GUID first.
fn encode_value(attr: &str, value: &FilterValue) -> String {
    match value {
        FilterValue::Text(text) if attr.eq_ignore_ascii_case(OBJECT_GUID) => {
            match Uuid::parse_str(text) {
                Ok(id) => encode_guid(&id),
                Err(_) => ldap_escape(text).into_owned(),
            }
        }
        FilterValue::Text(text) => ldap_escape(text).into_owned(),
        FilterValue::Guid(id) => encode_guid(id),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Int(v) => v.to_string(),
        FilterValue::UInt(v) => v.to_string(),
        FilterValue::Float(v) => v.to_string(),
        FilterValue::DateTime(ts) => format_generalized_time(ts),
        FilterValue::Field(name) => ldap_escape(name).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::types::fields;

    fn build(filter: &FilterExpression) -> Result<String, FilterError> {
        let mappings = AttributeMappings::default();
        let classes = vec!["user".to_string(), "person".to_string()];
        FilterBuilder::new(&mappings, &classes, 8).search_filter(Some(filter))
    }

    #[test]
    fn test_object_class_guard() {
        let mappings = AttributeMappings::default();
        let classes = vec!["user".to_string(), "person".to_string()];
        let builder = FilterBuilder::new(&mappings, &classes, 8);
        assert_eq!(
            builder.search_filter(None).unwrap(),
            "(&(objectClass=user)(objectClass=person))"
        );
    }

    #[test]
    fn test_equality_and_or() {
        let filter = FilterExpression::equals(fields::USER_NAME, "alice")
            .or(FilterExpression::equals(fields::EMAIL, "a@x.io"));
        assert_eq!(
            build(&filter).unwrap(),
            "(&(objectClass=user)(objectClass=person)(|(sAMAccountName=alice)(mail=a@x.io)))"
        );
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let filter = FilterExpression::contains(fields::DISPLAY_NAME, "a*(b)\\");
        assert_eq!(
            build(&filter).unwrap(),
            "(&(objectClass=user)(objectClass=person)(displayName=*a\\2a\\28b\\29\\5c*))"
        );
    }

    #[test]
    fn test_not_equals_and_bool() {
        let filter = FilterExpression::not_equals("enabled", true);
        assert!(build(&filter).unwrap().contains("(!(enabled=true))"));
    }

    #[test]
    fn test_guid_octets() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let filter = FilterExpression::id_equals(id);
        let out = build(&filter).unwrap();
        assert!(out.contains(
            "(objectGUID=\\33\\22\\11\\00\\55\\44\\77\\66\\88\\99\\aa\\bb\\cc\\dd\\ee\\ff)"
        ));
        assert_eq!(encode_guid(&id).len(), 48);
        assert_eq!(decode_guid(&id.to_bytes_le()), Some(id));
    }

    #[test]
    fn test_strict_integer_bounds() {
        let gt = FilterExpression::compare("logonCount", FilterOperator::GreaterThan, u64::MAX);
        assert!(build(&gt).unwrap().contains("(logonCount>=18446744073709551616)"));

        let lt = FilterExpression::compare("logonCount", FilterOperator::LessThan, 0u64);
        assert!(build(&lt).unwrap().contains("(logonCount<=-1)"));

        let ge = FilterExpression::compare("logonCount", FilterOperator::GreaterThanOrEqual, 5i64);
        assert!(build(&ge).unwrap().contains("(logonCount>=5)"));

        let gt_zero = FilterExpression::compare("logonCount", FilterOperator::GreaterThan, 0u64);
        assert!(build(&gt_zero).unwrap().contains("(logonCount>=1)"));
    }

    #[test]
    fn test_nested_filter_is_balanced() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let filter = FilterExpression::And(vec![
            FilterExpression::Or(vec![
                FilterExpression::compare(fields::USER_NAME, FilterOperator::GreaterThan, "m"),
                FilterExpression::contains(fields::DISPLAY_NAME, "(x)"),
            ]),
            FilterExpression::not_equals(fields::EMAIL, "a@x.io"),
            FilterExpression::Or(vec![
                FilterExpression::compare(fields::CREATED_AT, FilterOperator::LessThan, ts),
                FilterExpression::And(vec![
                    FilterExpression::compare("logonCount", FilterOperator::GreaterThan, 0u64),
                    FilterExpression::equals("enabled", true),
                ]),
            ]),
        ]);
        let out = build(&filter).unwrap();

        let mut depth = 0i32;
        for c in out.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            assert!(depth >= 0, "closed too early: {}", out);
        }
        assert_eq!(depth, 0, "unbalanced: {}", out);
        assert!(out.contains("(displayName=*\\28x\\29*)"));
        assert!(out.contains("(&(logonCount>=1)(enabled=true))"));
    }

    #[test]
    fn test_strict_text_bound() {
        let gt = FilterExpression::compare(fields::USER_NAME, FilterOperator::GreaterThan, "m");
        assert!(build(&gt)
            .unwrap()
            .contains("(&(sAMAccountName>=m)(!(sAMAccountName=m)))"));
    }

    #[test]
    fn test_float_and_timestamp_bounds() {
        assert!(next_up(1.0) > 1.0);
        assert!(next_down(1.0) < 1.0);
        assert_eq!(next_up(0.0), f64::from_bits(1));

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let gt = FilterExpression::compare(fields::CREATED_AT, FilterOperator::GreaterThan, ts);
        assert!(build(&gt).unwrap().contains("(whenCreated>=20240102030406.0Z)"));
        let lt = FilterExpression::compare(fields::CREATED_AT, FilterOperator::LessThan, ts);
        assert!(build(&lt).unwrap().contains("(whenCreated<=20240102030404.0Z)"));
    }

    #[test]
    fn test_unsupported_inputs() {
        let cross = FilterExpression::compare(
            fields::EMAIL,
            FilterOperator::Equals,
            FilterValue::Field(fields::USER_NAME.into()),
        );
        assert!(matches!(build(&cross), Err(FilterError::FieldComparison { .. })));

        let range_bool = FilterExpression::compare("enabled", FilterOperator::GreaterThan, true);
        assert!(matches!(
            build(&range_bool),
            Err(FilterError::UnsupportedOperator { .. })
        ));

        assert_eq!(
            build(&FilterExpression::Or(vec![])),
            Err(FilterError::EmptyGroup("Or"))
        );
    }

    #[test]
    fn test_depth_limit() {
        let mut filter = FilterExpression::equals(fields::USER_NAME, "x");
        for i in 0..10 {
            let other = FilterExpression::equals(fields::EMAIL, format!("{}@x", i));
            filter = if i % 2 == 0 {
                FilterExpression::And(vec![filter, other])
            } else {
                FilterExpression::Or(vec![filter, other])
            };
        }
        assert_eq!(build(&filter), Err(FilterError::TooDeep(8)));
    }
}
