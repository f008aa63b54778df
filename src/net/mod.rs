//! Shared networking infrastructure.

pub mod api;
pub mod client;

pub use api::{ApiClient, ApiClientBuilder, ApiResponse, ExpiryHook, REFRESH_PATH};
pub use client::{HttpClient, HttpClientBuilder};
