//! User producer
//!
//! Creating a user is the primary effect; the welcome email is a
//! best-effort side effect fired through the resilient client. A
//! persistently unavailable email service shows up as a queued email,
//! never as a failed user creation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::ResilientEmailClient;
use crate::domain::User;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::store::UserStore;

const WELCOME_SUBJECT: &str = "Welcome to our service!";

/// User operations backed by the in-memory store
pub struct UserService {
    store: Arc<UserStore>,
    email: Arc<ResilientEmailClient>,
}

impl UserService {
    pub fn new(store: Arc<UserStore>, email: Arc<ResilientEmailClient>) -> Self {
        Self { store, email }
    }

    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    /// Persist a new user, then fire exactly one welcome email.
    pub async fn create_user(&self, shutdown: &Shutdown, email: &str, name: &str) -> Result<User> {
        let user = User::new(email, name);
        self.store.insert(user.clone())?;
        info!(user_id = %user.id, email = %user.email, "user created");

        let body = format!(
            "Hello {},\n\nWelcome to our service! We're glad to have you here.",
            user.name
        );
        if let Err(err) = self
            .email
            .send(shutdown, &user.email, WELCOME_SUBJECT, &body)
            .await
        {
            // The user record stands regardless of email trouble.
            warn!(user_id = %user.id, error = %err, "failed to send welcome email");
        }

        Ok(user)
    }

    pub fn get(&self, id: &str) -> Result<User> {
        self.store.get(id)
    }

    pub fn list(&self, page_size: usize, page_token: &str) -> (Vec<User>, Option<String>) {
        self.store.list(page_size, page_token)
    }
}
