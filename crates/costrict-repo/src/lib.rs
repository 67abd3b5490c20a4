//! HTTPS client for the costrict package repository: catalog, platform
//! metadata, and binary payload fetches.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod types;

pub use client::RepoClient;
pub use error::{RepoError, RepoResult};
pub use types::{
    PackageList, PackageMetadata, PackageType, PlatformInfo, PlatformList, PlatformTuple,
    VersionAddr,
};
