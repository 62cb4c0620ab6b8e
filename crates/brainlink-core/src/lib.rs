// brainlink-core: keeps a brain controller connected and mirrors its values
// as host entities.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod infer;
pub mod observable;
pub mod registry;
pub mod supervisor;
pub mod verify;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SessionConfig;
pub use controller::SupervisorHandle;
pub use dispatch::{Disposition, Dispatcher};
pub use error::CoreError;
pub use host::{EntityHost, EntitySpec, HostError, HostHandle, MemoryHost};
pub use observable::{EntityKind, MeasurementClass, Observable, ObservableState};
pub use registry::{Entity, Registry};
pub use supervisor::{BACKOFF_TABLE_SECS, ConnectionState, Supervisor, backoff_delay};
pub use verify::verify_credentials;

pub use brainlink_api::Key;
