//! HTTP mirror of the user surface
//!
//! JSON over the same operations the gRPC service exposes, with field
//! names mirroring the RPC fields in snake_case. Errors map onto the
//! gateway table: 400/404/409 for domain faults, 429 and 503 with
//! `Retry-After` for saturation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::domain::User;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::shutdown::Shutdown;
use crate::user::UserService;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub users: Arc<UserService>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Shutdown,
}

/// Build the user-facing router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/users", post(create_user).get(list_users))
        .route("/api/v1/users/:id", get(get_user))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateUserBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Serialize)]
struct UserBody {
    id: String,
    email: String,
    username: String,
    created_at: String,
    updated_at: String,
}

impl From<&User> for UserBody {
    fn from(user: &User) -> Self {
        let proto: crate::proto::User = user.into();
        Self {
            id: proto.id,
            email: proto.email,
            username: proto.username,
            created_at: proto.created_at,
            updated_at: proto.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    page_size: usize,
    #[serde(default)]
    page_token: String,
}

#[derive(Debug, Serialize)]
struct ListUsersBody {
    users: Vec<UserBody>,
    next_page_token: String,
}

async fn create_user(
    State(state): State<HttpState>,
    Json(body): Json<CreateUserBody>,
) -> Result<Json<UserBody>> {
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(Error::InvalidArgument("email is not a valid address".into()));
    }
    if body.username.is_empty() {
        return Err(Error::InvalidArgument("username is required".into()));
    }

    let start = std::time::Instant::now();
    let result = state
        .users
        .create_user(&state.shutdown, &body.email, &body.username)
        .await;
    state.metrics.record_request(
        "http_create_user",
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );

    let user = result?;
    Ok(Json(UserBody::from(&user)))
}

async fn get_user(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<UserBody>> {
    let start = std::time::Instant::now();
    let result = state.users.get(&id);
    state.metrics.record_request(
        "http_get_user",
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );

    let user = result?;
    Ok(Json(UserBody::from(&user)))
}

async fn list_users(
    State(state): State<HttpState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListUsersBody>> {
    let start = std::time::Instant::now();
    let (users, next_page_token) = state.users.list(params.page_size, &params.page_token);
    state
        .metrics
        .record_request("http_list_users", start.elapsed().as_secs_f64(), true);

    Ok(Json(ListUsersBody {
        users: users.iter().map(UserBody::from).collect(),
        next_page_token: next_page_token.unwrap_or_default(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::client::{EmailDispatch, ResilientEmailClient};
    use crate::retry::Backoff;
    use crate::shutdown;
    use crate::store::UserStore;
    use async_trait::async_trait;
    use axum::response::IntoResponse;

    struct OkDispatch;

    #[async_trait]
    impl EmailDispatch for OkDispatch {
        async fn dispatch(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn make_state() -> (HttpState, shutdown::ShutdownGuard) {
        let (guard, shut) = shutdown::channel();
        let metrics = Arc::new(Metrics::new("test_http").unwrap());
        let client = Arc::new(ResilientEmailClient::new(
            Arc::new(OkDispatch),
            Backoff::default(),
            BreakerConfig::default(),
            10,
            Arc::clone(&metrics),
        ));
        let users = Arc::new(UserService::new(Arc::new(UserStore::new()), client));
        (
            HttpState {
                users,
                metrics,
                shutdown: shut,
            },
            guard,
        )
    }

    #[tokio::test]
    async fn test_create_user_returns_record() {
        let (state, _guard) = make_state();

        let Json(response) = create_user(
            State(state),
            Json(CreateUserBody {
                email: "a@example.com".into(),
                username: "Alice".into(),
            }),
        )
        .await
        .unwrap();

        assert!(!response.id.is_empty());
        assert_eq!(response.email, "a@example.com");
        assert_eq!(response.username, "Alice");
        assert!(!response.created_at.is_empty());
    }

    #[tokio::test]
    async fn test_create_user_rejects_bad_email() {
        let (state, _guard) = make_state();

        let result = create_user(
            State(state),
            Json(CreateUserBody {
                email: "nope".into(),
                username: "Alice".into(),
            }),
        )
        .await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_user_not_found_maps_to_404() {
        let (state, _guard) = make_state();

        let result = get_user(State(state), Path("missing".to_string())).await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_users_round_trip() {
        let (state, _guard) = make_state();

        for i in 0..5 {
            create_user(
                State(state.clone()),
                Json(CreateUserBody {
                    email: format!("u{i}@example.com"),
                    username: "User".into(),
                }),
            )
            .await
            .unwrap();
        }

        let mut token = String::new();
        let mut seen = 0;
        loop {
            let Json(page) = list_users(
                State(state.clone()),
                Query(ListParams {
                    page_size: 2,
                    page_token: token.clone(),
                }),
            )
            .await
            .unwrap();

            seen += page.users.len();
            if page.next_page_token.is_empty() {
                break;
            }
            token = page.next_page_token;
        }
        assert_eq!(seen, 5);
    }
}
