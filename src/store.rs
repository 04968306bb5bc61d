//! In-memory stores for users and emails
//!
//! Keyed maps with creation-time ordering for list operations. Page tokens
//! are the identifier of the last record of the previous page; a token that
//! no longer matches any record restarts the listing from the beginning.
//! Nothing survives a process restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::{Email, EmailStatus, User};
use crate::error::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 10;

/// Listing order for stored records
trait Keyed {
    fn created_at(&self) -> DateTime<Utc>;
    fn id(&self) -> &str;
}

impl Keyed for User {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Keyed for Email {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Sort by creation time ascending, ties broken by identifier, then slice
/// out the page following `page_token`.
fn paginate<T: Keyed>(
    mut records: Vec<T>,
    page_size: usize,
    page_token: &str,
) -> (Vec<T>, Option<String>) {
    let page_size = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };

    records.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });

    // Unknown tokens fall through to index 0 (soft restart).
    let start = if page_token.is_empty() {
        0
    } else {
        records
            .iter()
            .position(|r| r.id() == page_token)
            .map(|i| i + 1)
            .unwrap_or(0)
    };

    if start >= records.len() {
        return (Vec::new(), None);
    }

    let end = (start + page_size).min(records.len());
    let next_token = if end < records.len() {
        Some(records[end - 1].id().to_string())
    } else {
        None
    };

    records.truncate(end);
    (records.split_off(start), next_token)
}

/// In-memory user store
#[derive(Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        if users.contains_key(&user.id) {
            return Err(Error::AlreadyExists(format!("user {}", user.id)));
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<User> {
        self.users
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    pub fn list(&self, page_size: usize, page_token: &str) -> (Vec<User>, Option<String>) {
        let users: Vec<User> = self.users.read().values().cloned().collect();
        paginate(users, page_size, page_token)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

/// In-memory email store
///
/// The email record is owned here; the sender core and its drain worker are
/// the only writers.
#[derive(Default)]
pub struct EmailStore {
    emails: RwLock<HashMap<String, Email>>,
}

impl EmailStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: Email) -> Result<()> {
        let mut emails = self.emails.write();
        if emails.contains_key(&email.id) {
            return Err(Error::AlreadyExists(format!("email {}", email.id)));
        }
        emails.insert(email.id.clone(), email);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Email> {
        self.emails
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("email {id}")))
    }

    /// Update status and delivery time in one critical section.
    pub fn update_status(
        &self,
        id: &str,
        status: EmailStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut emails = self.emails.write();
        let email = emails
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("email {id}")))?;
        email.status = status;
        email.sent_at = sent_at;
        Ok(())
    }

    pub fn list(&self, page_size: usize, page_token: &str) -> (Vec<Email>, Option<String>) {
        let emails: Vec<Email> = self.emails.read().values().cloned().collect();
        paginate(emails, page_size, page_token)
    }

    /// Identifiers of all terminally failed emails.
    pub fn failed_ids(&self) -> Vec<String> {
        self.emails
            .read()
            .values()
            .filter(|e| e.status == EmailStatus::Failed)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.emails.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seed_emails(store: &EmailStore, n: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..n {
            let email = Email::new(format!("user-{i}@example.com"), "subject", "body");
            ids.push(email.id.clone());
            store.insert(email).unwrap();
        }
        ids
    }

    #[test]
    fn test_insert_and_get() {
        let store = EmailStore::new();
        let email = Email::new("a@example.com", "s", "b");
        let id = email.id.clone();
        store.insert(email).unwrap();

        let found = store.get(&id).unwrap();
        assert_eq!(found.to, "a@example.com");
        assert!(matches!(store.get("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_double_insert_is_rejected() {
        let store = UserStore::new();
        let user = User::new("a@example.com", "Alice");
        store.insert(user.clone()).unwrap();
        assert!(matches!(store.insert(user), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_update_status_sets_delivery_time() {
        let store = EmailStore::new();
        let email = Email::new("a@example.com", "s", "b");
        let id = email.id.clone();
        store.insert(email).unwrap();

        let now = Utc::now();
        store.update_status(&id, EmailStatus::Sent, Some(now)).unwrap();
        let found = store.get(&id).unwrap();
        assert_eq!(found.status, EmailStatus::Sent);
        assert_eq!(found.sent_at, Some(now));
    }

    #[test]
    fn test_list_orders_by_creation_then_id() {
        let store = EmailStore::new();
        seed_emails(&store, 5);

        let (page, _) = store.list(10, "");
        for pair in page.windows(2) {
            assert!(
                (pair[0].created_at, &pair[0].id) <= (pair[1].created_at, &pair[1].id),
                "listing must be ordered"
            );
        }
    }

    #[test]
    fn test_pagination_visits_each_record_exactly_once() {
        let store = EmailStore::new();
        seed_emails(&store, 7);

        let mut seen = HashSet::new();
        let mut token = String::new();
        loop {
            let (page, next) = store.list(3, &token);
            for email in &page {
                assert!(seen.insert(email.id.clone()), "record visited twice");
            }
            match next {
                Some(t) => token = t,
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn test_unknown_token_restarts_listing() {
        let store = EmailStore::new();
        seed_emails(&store, 3);

        let (from_start, _) = store.list(2, "");
        let (from_bogus, _) = store.list(2, "no-such-id");
        let start_ids: Vec<_> = from_start.iter().map(|e| &e.id).collect();
        let bogus_ids: Vec<_> = from_bogus.iter().map(|e| &e.id).collect();
        assert_eq!(start_ids, bogus_ids);
    }

    #[test]
    fn test_zero_page_size_uses_default() {
        let store = EmailStore::new();
        seed_emails(&store, 15);
        let (page, next) = store.list(0, "");
        assert_eq!(page.len(), 10);
        assert!(next.is_some());
    }

    #[test]
    fn test_failed_ids() {
        let store = EmailStore::new();
        let ids = seed_emails(&store, 3);
        store
            .update_status(&ids[1], EmailStatus::Failed, None)
            .unwrap();

        let failed = store.failed_ids();
        assert_eq!(failed, vec![ids[1].clone()]);
    }
}
