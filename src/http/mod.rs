//! HTTP client module
//!
//! Management endpoint probes and package downloads.

mod client;

pub use client::{endpoint_url, ManagementClient};
