//! gRPC services for MailFlow
//!
//! Thin adapters between the generated `mailflow.v1` surface and the core
//! services. Request validation and the maintenance-mode gate live here;
//! everything else is delegated.

pub mod email;
pub mod user;

pub use email::EmailGrpcService;
pub use user::UserGrpcService;
