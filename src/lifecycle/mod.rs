//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! startup.rs:  config → logging/metrics → Consul client → Router
//! router.rs:   Created → Registering → AwaitingMeshReady → Serving → Draining → Stopped
//! signals.rs:  SIGINT/SIGTERM → Router::stop(drain deadline)
//! shutdown.rs: stop → accept loop exits → drain → force-close at deadline
//! ```

pub mod router;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use router::{Router, RouterError, RouterState};
pub use shutdown::{Shutdown, ShutdownSignal};
