//! Core types shared across the costrict keeper workspace: version
//! numbers, the TCP port pool, directory layout, and the process-listing
//! capability boundary.

#![deny(unsafe_code)]
#![cfg_attr(test, allow(unsafe_code))]
#![warn(clippy::all)]

pub mod dirs;
pub mod error;
pub mod port_pool;
pub mod process_lister;
pub mod version;

pub use dirs::CostrictDir;
pub use error::{CoreError, CoreResult};
pub use port_pool::PortPool;
pub use process_lister::{OsProcess, ProcessLister};
pub use version::VersionNumber;
