//! Gateway: HTTP relay in front of the upstream text-generation API.
//!
//! The relay does no validation of upstream responses: successes are passed through as-is,
//! upstream error statuses are propagated with the raw body attached.

mod protocol;
mod server;
mod upstream;

pub use protocol::{
    ChatRequest, ChatRole, ChatTurn, ErrorBody, GenerationParameters, HealthResponse,
    ProbeResponse,
};
pub use server::{router, run_gateway, GatewayState};
pub use upstream::{UpstreamClient, UpstreamError};
