//! Concurrent TCP load generation: many virtual clients, each running a
//! sequence of connect→write→read→close exchanges against one endpoint.

pub mod config;
pub mod echo;
pub mod error;
pub mod exchange;
pub mod orchestrator;
pub mod pacing;
pub mod payload;
pub mod session;
pub mod transport;

pub use config::{Config, LoadPlan};
pub use error::{ConfigError, ExchangeError, ExchangeErrorKind};
pub use exchange::{exchange, ExchangeOptions};
pub use orchestrator::{run_load, Orchestrator, RunSummary};
pub use pacing::Pacing;
pub use payload::PayloadSource;
pub use session::{run_session, Session, SessionOutcome};
pub use transport::{Endpoint, TcpTransport, Transport};
