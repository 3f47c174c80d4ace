//! # Data Retrieval Module
//!
//! Generic HTTP retrieval used by polling sources and by init-time capability
//! queries against devices.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff and optional basic authentication.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions, Credentials};
