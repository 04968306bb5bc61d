//! gRPC server for the user service

use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};

use crate::metrics::Metrics;
use crate::proto::user_service_server::{UserService as UserServiceApi, UserServiceServer};
use crate::proto::{
    CreateUserRequest, CreateUserResponse, GetUserRequest, GetUserResponse, ListUsersRequest,
    ListUsersResponse,
};
use crate::shutdown::Shutdown;
use crate::user::UserService;

/// User gRPC service implementation
pub struct UserGrpcService {
    service: Arc<UserService>,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
}

impl UserGrpcService {
    pub fn new(service: Arc<UserService>, metrics: Arc<Metrics>, shutdown: Shutdown) -> Self {
        Self {
            service,
            metrics,
            shutdown,
        }
    }

    /// Create a tonic server from this service
    pub fn into_server(self) -> UserServiceServer<Self> {
        UserServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl UserServiceApi for UserGrpcService {
    async fn create_user(
        &self,
        request: Request<CreateUserRequest>,
    ) -> Result<Response<CreateUserResponse>, Status> {
        let req = request.into_inner();
        validate_create_user(&req)?;

        let start = Instant::now();
        let result = self
            .service
            .create_user(&self.shutdown, &req.email, &req.username)
            .await;
        self.metrics
            .record_request("create_user", start.elapsed().as_secs_f64(), result.is_ok());

        let user = result.map_err(Status::from)?;
        Ok(Response::new(CreateUserResponse {
            id: user.id.clone(),
            user: Some((&user).into()),
        }))
    }

    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Status::invalid_argument("user id is required"));
        }

        let start = Instant::now();
        let result = self.service.get(&req.id);
        self.metrics
            .record_request("get_user", start.elapsed().as_secs_f64(), result.is_ok());

        let user = result.map_err(Status::from)?;
        Ok(Response::new(GetUserResponse {
            user: Some((&user).into()),
        }))
    }

    async fn list_users(
        &self,
        request: Request<ListUsersRequest>,
    ) -> Result<Response<ListUsersResponse>, Status> {
        let req = request.into_inner();
        let page_size = req.page_size.max(0) as usize;

        let start = Instant::now();
        let (users, next_page_token) = self.service.list(page_size, &req.page_token);
        self.metrics
            .record_request("list_users", start.elapsed().as_secs_f64(), true);

        Ok(Response::new(ListUsersResponse {
            users: users.iter().map(Into::into).collect(),
            next_page_token: next_page_token.unwrap_or_default(),
        }))
    }
}

fn validate_create_user(req: &CreateUserRequest) -> Result<(), Status> {
    if req.email.is_empty() {
        return Err(Status::invalid_argument("email is required"));
    }
    if !req.email.contains('@') {
        return Err(Status::invalid_argument("email is not a valid address"));
    }
    if req.username.is_empty() {
        return Err(Status::invalid_argument("username is required"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::client::{EmailDispatch, ResilientEmailClient};
    use crate::error::Result as MailflowResult;
    use crate::retry::Backoff;
    use crate::shutdown;
    use crate::store::UserStore;
    use async_trait::async_trait;

    struct OkDispatch;

    #[async_trait]
    impl EmailDispatch for OkDispatch {
        async fn dispatch(&self, _to: &str, _subject: &str, _body: &str) -> MailflowResult<()> {
            Ok(())
        }
    }

    fn make_service() -> (UserGrpcService, shutdown::ShutdownGuard) {
        let (guard, shut) = shutdown::channel();
        let metrics = Arc::new(Metrics::new("test_user_grpc").unwrap());
        let client = Arc::new(ResilientEmailClient::new(
            Arc::new(OkDispatch),
            Backoff::default(),
            BreakerConfig::default(),
            10,
            Arc::clone(&metrics),
        ));
        let service = Arc::new(UserService::new(Arc::new(UserStore::new()), client));
        (UserGrpcService::new(service, metrics, shut), guard)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let (svc, _guard) = make_service();

        let created = svc
            .create_user(Request::new(CreateUserRequest {
                email: "a@example.com".into(),
                username: "Alice".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!created.id.is_empty());
        let user = created.user.unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(user.username, "Alice");

        let fetched = svc
            .get_user(Request::new(GetUserRequest { id: created.id }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched.user.unwrap().email, "a@example.com");
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let (svc, _guard) = make_service();

        for (email, username) in [("", "Alice"), ("not-an-address", "Alice"), ("a@x", "")] {
            let err = svc
                .create_user(Request::new(CreateUserRequest {
                    email: email.into(),
                    username: username.into(),
                }))
                .await
                .unwrap_err();
            assert_eq!(err.code(), tonic::Code::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let (svc, _guard) = make_service();

        let err = svc
            .get_user(Request::new(GetUserRequest { id: "missing".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_list_users() {
        let (svc, _guard) = make_service();

        for i in 0..4 {
            svc.create_user(Request::new(CreateUserRequest {
                email: format!("u{i}@example.com"),
                username: "User".into(),
            }))
            .await
            .unwrap();
        }

        let page = svc
            .list_users(Request::new(ListUsersRequest {
                page_size: 3,
                page_token: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(page.users.len(), 3);
        assert!(!page.next_page_token.is_empty());
    }
}
