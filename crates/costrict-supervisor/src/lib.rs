//! The supervisor loop: ties component and service management together
//! into the daemon's background behavior (startup reattachment, periodic
//! recovery, optional metrics/log cadences, the once-daily upgrade
//! check, and the aggregate health check the HTTP control surface
//! exposes).

mod error;
mod supervisor;
mod types;

pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::{HealthState, HealthSummary};
