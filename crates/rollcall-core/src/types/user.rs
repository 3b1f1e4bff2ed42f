//! User types

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known field names used by filters, sort criteria and backends.
pub mod fields {
    pub const ID: &str = "Id";
    pub const USER_NAME: &str = "UserName";
    pub const EMAIL: &str = "Email";
    pub const DISPLAY_NAME: &str = "DisplayName";
    pub const FIRST_NAME: &str = "FirstName";
    pub const LAST_NAME: &str = "LastName";
    pub const PHONE: &str = "Phone";
    pub const GROUPS: &str = "Groups";
    pub const CREATED_AT: &str = "CreatedAt";
    pub const MODIFIED_AT: &str = "ModifiedAt";

    pub const ALL: &[&str] = &[
        ID,
        USER_NAME,
        EMAIL,
        DISPLAY_NAME,
        FIRST_NAME,
        LAST_NAME,
        PHONE,
        GROUPS,
        CREATED_AT,
        MODIFIED_AT,
    ];

    /// Resolve a field name case-insensitively to its canonical spelling
    pub fn canonical(name: &str) -> Option<&'static str> {
        ALL.iter().copied().find(|f| f.eq_ignore_ascii_case(name))
    }

    pub fn is(name: &str, field: &str) -> bool {
        name.eq_ignore_ascii_case(field)
    }
}

/// Name reported by the anonymous sentinel user
pub const ANONYMOUS_USER_NAME: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    /// Persisted in a writable backend
    #[default]
    Stored,
    /// Statically configured, read-only
    InMemory,
    /// Unauthenticated sentinel
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub user_name: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Encoded credential (`$0$<salt><hash>`), absent for directory-verified users
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub kind: UserKind,
}

impl User {
    pub fn new(user_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_name: user_name.into(),
            email: None,
            display_name: None,
            first_name: None,
            last_name: None,
            phone: None,
            groups: Vec::new(),
            password_hash: None,
            created_at: now,
            modified_at: now,
            kind: UserKind::Stored,
        }
    }

    /// The sentinel every failed authentication resolves to
    pub fn anonymous() -> Self {
        let epoch = DateTime::<Utc>::default();
        Self {
            id: Uuid::nil(),
            user_name: ANONYMOUS_USER_NAME.to_string(),
            email: None,
            display_name: None,
            first_name: None,
            last_name: None,
            phone: None,
            groups: Vec::new(),
            password_hash: None,
            created_at: epoch,
            modified_at: epoch,
            kind: UserKind::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == UserKind::Anonymous
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.kind, UserKind::Anonymous | UserKind::InMemory)
    }

    /// Fails with `NotSupported` for synthetic or configured users.
    pub fn ensure_writable(&self, operation: &str) -> crate::Result<()> {
        if self.is_read_only() {
            return Err(crate::Error::NotSupported(format!(
                "{} on {:?} user '{}'",
                operation, self.kind, self.user_name
            )));
        }
        Ok(())
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    /// String form of a field, `None` when unset or unknown.
    ///
    /// Multi-valued fields (groups) are joined with `;`.
    pub fn field_value(&self, field: &str) -> Option<String> {
        match fields::canonical(field)? {
            fields::ID => Some(self.id.to_string()),
            fields::USER_NAME => Some(self.user_name.clone()),
            fields::EMAIL => self.email.clone(),
            fields::DISPLAY_NAME => self.display_name.clone(),
            fields::FIRST_NAME => self.first_name.clone(),
            fields::LAST_NAME => self.last_name.clone(),
            fields::PHONE => self.phone.clone(),
            fields::GROUPS => {
                if self.groups.is_empty() {
                    None
                } else {
                    Some(self.groups.join(";"))
                }
            }
            fields::CREATED_AT => Some(format_timestamp(&self.created_at)),
            fields::MODIFIED_AT => Some(format_timestamp(&self.modified_at)),
            _ => None,
        }
    }

    /// Every value of a field; one entry per group for `Groups`.
    pub fn field_values(&self, field: &str) -> Vec<String> {
        if fields::is(field, fields::GROUPS) {
            return self.groups.clone();
        }
        self.field_value(field).into_iter().collect()
    }

    /// Copy with the credential stripped, suitable for handing to callers.
    pub fn without_secret(&self) -> Self {
        Self {
            password_hash: None,
            ..self.clone()
        }
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Attributes for a user about to be created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub user_name: String,
    pub password: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl NewUser {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.user_name.trim().is_empty() {
            return Err(crate::Error::InvalidArgument(
                "User name must not be empty".into(),
            ));
        }
        if self.user_name.eq_ignore_ascii_case(ANONYMOUS_USER_NAME) {
            return Err(crate::Error::InvalidArgument(format!(
                "'{}' is reserved",
                ANONYMOUS_USER_NAME
            )));
        }
        Ok(())
    }

    /// Materialize into a stored user; the caller supplies the encoded credential.
    pub fn into_user(self, password_hash: Option<String>) -> User {
        let mut user = User::new(self.user_name);
        user.email = self.email;
        user.display_name = self.display_name;
        user.first_name = self.first_name;
        user.last_name = self.last_name;
        user.phone = self.phone;
        user.groups = self.groups;
        user.password_hash = password_hash;
        user
    }
}
