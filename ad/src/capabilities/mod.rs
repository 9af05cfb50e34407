//! Capability seams consumed by task actions
//!
//! Everything a service task touches in the outside world goes through one of
//! these traits: the backend HTTP API, the report publisher, the local agent
//! control socket, and external processes. The scheduler itself never sees
//! them; actions capture exactly the capabilities they need, and tests swap in
//! hand mocks.

mod agent;
mod http;
mod process;
mod publish;

pub use agent::AgentRpc;
pub use http::{HttpApi, ReqwestApi};
pub use process::{ProcessRunner, RunOutput, TokioRunner, split_command};
pub use publish::{HttpPublisher, Publisher};
