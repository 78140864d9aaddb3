pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod transform;
pub mod transport;

pub use error::IngestError;
pub use pipeline::{CycleOptions, CycleOutcome, IngestionPipeline};
pub use providers::UtilityProvider;
pub use session::{AuthState, Session};
