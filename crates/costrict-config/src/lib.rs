//! `AppConfig`, `SystemSpecification`, and auth identity loading for the
//! costrict keeper.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod app_config;
pub mod auth;
pub mod error;
pub mod system_spec;

pub use app_config::{AppConfig, IntervalsConfig, LogConfig, LogFormat, MidnightWindow, PortRange};
pub use auth::{AuthIdentity, AuthStore};
pub use error::{ConfigError, ConfigResult};
pub use system_spec::{
    Accessible, ComponentSpecification, ManagerSpecification, ServiceSpecification,
    Startup, SystemSpecLoader, SystemSpecification,
};
