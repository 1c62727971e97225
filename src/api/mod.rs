//! Control endpoint consumed by the agent and tool layer

mod http;
mod response;

pub use http::{create_router, serve, ApiState, CallOptions, CALLER_HEADER};
pub use response::ControlResponse;
