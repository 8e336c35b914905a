//! Remote provisioning adapter
//!
//! Translates OS-independent provisioning primitives into the right command
//! lines for a node and executes them over a [`RemoteTransport`].
//!
//! # Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               dirfleet-pipeline               │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │  NodeSession  (ensure_package, ensure_path,   │
//! │                write_file, control_service)   │
//! │  Dialect      (apt / yum sysv / yum systemd)  │
//! │  RemoteHost   (run + stderr classification)   │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────┐
//! │  trait RemoteTransport  (ssh, fake)           │
//! └──────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod classify;
pub mod dialect;
pub mod error;
pub mod probe;
pub mod ssh;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapter::{NodeSession, RemoteHost};
pub use classify::{AllowRule, StderrAllowList};
pub use dialect::{Dialect, PackageManager, ServiceAction};
pub use error::{RemoteError, Result, TransportError};
pub use probe::{PRODUCT_PORTS, PortProbe};
pub use ssh::{SshTransport, SshTransportFactory};
pub use transport::{CommandOutput, HostTarget, RemoteTransport, TransportFactory};
