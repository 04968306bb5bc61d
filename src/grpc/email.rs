//! gRPC server for the email service
//!
//! Admission order matters: the downtime flag is checked first with a
//! single atomic load, before validation, the rate limiter, or the store
//! are touched.

use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};

use crate::maintenance::AvailabilityFlag;
use crate::metrics::Metrics;
use crate::proto::email_service_server::{EmailService as EmailServiceApi, EmailServiceServer};
use crate::proto::{
    GetEmailStatusRequest, GetEmailStatusResponse, ListEmailsRequest, ListEmailsResponse,
    ResendFailedEmailsRequest, ResendFailedEmailsResponse, SendEmailRequest, SendEmailResponse,
};
use crate::sender::EmailService;
use crate::shutdown::Shutdown;

/// Email gRPC service implementation
pub struct EmailGrpcService {
    service: Arc<EmailService>,
    availability: AvailabilityFlag,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
}

impl EmailGrpcService {
    pub fn new(
        service: Arc<EmailService>,
        availability: AvailabilityFlag,
        metrics: Arc<Metrics>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            service,
            availability,
            metrics,
            shutdown,
        }
    }

    /// Create a tonic server from this service
    pub fn into_server(self) -> EmailServiceServer<Self> {
        EmailServiceServer::new(self)
    }

    fn check_availability(&self) -> Result<(), Status> {
        if self.availability.is_down() {
            return Err(Status::unavailable("service is in maintenance mode"));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl EmailServiceApi for EmailGrpcService {
    async fn send_email(
        &self,
        request: Request<SendEmailRequest>,
    ) -> Result<Response<SendEmailResponse>, Status> {
        self.check_availability()?;

        let req = request.into_inner();
        validate_send_email(&req)?;

        let start = Instant::now();
        let result = self
            .service
            .send(&self.shutdown, &req.to, &req.subject, &req.body)
            .await;
        self.metrics
            .record_request("send_email", start.elapsed().as_secs_f64(), result.is_ok());

        let email = result.map_err(Status::from)?;
        Ok(Response::new(SendEmailResponse {
            id: email.id,
            status: email.status.to_string(),
        }))
    }

    async fn get_email_status(
        &self,
        request: Request<GetEmailStatusRequest>,
    ) -> Result<Response<GetEmailStatusResponse>, Status> {
        self.check_availability()?;

        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Status::invalid_argument("email id is required"));
        }

        let start = Instant::now();
        let result = self.service.get_status(&req.id);
        self.metrics.record_request(
            "get_email_status",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );

        let email = result.map_err(Status::from)?;
        let proto: crate::proto::Email = (&email).into();
        Ok(Response::new(GetEmailStatusResponse {
            id: proto.id,
            status: proto.status,
            sent_at: proto.sent_at,
        }))
    }

    async fn list_emails(
        &self,
        request: Request<ListEmailsRequest>,
    ) -> Result<Response<ListEmailsResponse>, Status> {
        self.check_availability()?;

        let req = request.into_inner();
        let page_size = req.page_size.max(0) as usize;

        let start = Instant::now();
        let (emails, next_page_token) = self.service.list(page_size, &req.page_token);
        self.metrics
            .record_request("list_emails", start.elapsed().as_secs_f64(), true);

        Ok(Response::new(ListEmailsResponse {
            emails: emails.iter().map(Into::into).collect(),
            next_page_token: next_page_token.unwrap_or_default(),
        }))
    }

    async fn resend_failed_emails(
        &self,
        _request: Request<ResendFailedEmailsRequest>,
    ) -> Result<Response<ResendFailedEmailsResponse>, Status> {
        self.check_availability()?;

        let start = Instant::now();
        let requeued = self.service.resend_failed();
        self.metrics.record_request(
            "resend_failed_emails",
            start.elapsed().as_secs_f64(),
            true,
        );

        Ok(Response::new(ResendFailedEmailsResponse {
            requeued: requeued as i32,
        }))
    }
}

fn validate_send_email(req: &SendEmailRequest) -> Result<(), Status> {
    if req.to.is_empty() {
        return Err(Status::invalid_argument("recipient email is required"));
    }
    if req.subject.is_empty() {
        return Err(Status::invalid_argument("subject is required"));
    }
    if req.body.is_empty() {
        return Err(Status::invalid_argument("body is required"));
    }
    Ok(())
}
