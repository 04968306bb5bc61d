//! Core domain records for MailFlow
//!
//! `User` and `Email` are the two records that flow through the platform.
//! Identifiers are ULIDs (128-bit, lexicographically sortable) and all
//! timestamps are UTC.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::proto;

/// Delivery status of an email
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    /// Accepted, waiting for dispatch (or queued for retry)
    Pending,
    /// Delivered downstream
    Sent,
    /// Terminally failed (retry queue rejected it)
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with a fresh identifier; creation and modification
    /// times start out equal.
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            email: email.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An email accepted for delivery
///
/// `sent_at` is set exactly when the status transitions to [`EmailStatus::Sent`];
/// pending and failed emails never carry a delivery time.
#[derive(Debug, Clone)]
pub struct Email {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub status: EmailStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Email {
    /// Create a new pending email with a fresh identifier.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            status: EmailStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
        }
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl From<&User> for proto::User {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.name.clone(),
            created_at: format_time(user.created_at),
            updated_at: format_time(user.updated_at),
        }
    }
}

impl From<&Email> for proto::Email {
    fn from(email: &Email) -> Self {
        Self {
            id: email.id.clone(),
            to: email.to.clone(),
            subject: email.subject.clone(),
            body: email.body.clone(),
            status: email.status.to_string(),
            created_at: format_time(email.created_at),
            sent_at: email.sent_at.map(format_time).unwrap_or_default(),
        }
    }
}
