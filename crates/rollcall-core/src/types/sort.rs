//! Sort criteria

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::user::{fields, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: String,
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }

    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        let ordering = compare_field(&self.field, a, b);
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Ordered sort keys: the first criterion is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortCriteria(Vec<SortCriterion>);

impl SortCriteria {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        Self(vec![SortCriterion::new(field, direction)])
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.0.push(SortCriterion::new(field, direction));
        self
    }

    pub fn push(&mut self, criterion: SortCriterion) {
        self.0.push(criterion);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&SortCriterion> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SortCriterion> {
        self.0.iter()
    }

    /// Composite comparison, short-circuiting on the first non-equal key.
    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        self.0
            .iter()
            .map(|criterion| criterion.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Sort in place. Ties on every key fall back to the user id so that
    /// repeated windowed reads of the same set line up.
    pub fn sort_users(&self, users: &mut [User]) {
        users.sort_by(|a, b| self.compare(a, b).then_with(|| a.id.cmp(&b.id)));
    }
}

impl From<Vec<SortCriterion>> for SortCriteria {
    fn from(criteria: Vec<SortCriterion>) -> Self {
        Self(criteria)
    }
}

impl FromIterator<SortCriterion> for SortCriteria {
    fn from_iter<I: IntoIterator<Item = SortCriterion>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Ids and timestamps compare natively; everything else compares by its
/// string form, case-insensitively, with missing values first.
fn compare_field(field: &str, a: &User, b: &User) -> Ordering {
    match fields::canonical(field) {
        Some(fields::ID) => a.id.cmp(&b.id),
        Some(fields::CREATED_AT) => a.created_at.cmp(&b.created_at),
        Some(fields::MODIFIED_AT) => a.modified_at.cmp(&b.modified_at),
        _ => match (a.field_value(field), b.field_value(field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x
                .to_lowercase()
                .cmp(&y.to_lowercase())
                .then_with(|| x.cmp(&y)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, email: Option<&str>) -> User {
        let mut u = User::new(name);
        u.email = email.map(String::from);
        u
    }

    #[test]
    fn test_nulls_sort_first() {
        let mut users = vec![user("a", Some("z@x")), user("b", None), user("c", Some("a@x"))];
        SortCriteria::by(fields::EMAIL, SortDirection::Ascending).sort_users(&mut users);
        let names: Vec<_> = users.iter().map(|u| u.user_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_secondary_key_breaks_ties() {
        let mut users = vec![
            user("carol", Some("same@x")),
            user("alice", Some("same@x")),
            user("bob", Some("other@x")),
        ];
        let sort = SortCriteria::by(fields::EMAIL, SortDirection::Descending)
            .then(fields::USER_NAME, SortDirection::Ascending);
        sort.sort_users(&mut users);
        let names: Vec<_> = users.iter().map(|u| u.user_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol", "bob"]);
    }

    #[test]
    fn test_string_comparison_ignores_case() {
        let a = user("Alpha", None);
        let b = user("beta", None);
        let sort = SortCriteria::by(fields::USER_NAME, SortDirection::Ascending);
        assert_eq!(sort.compare(&a, &b), Ordering::Less);
    }
}
