//! Paginated HTTP client for the source LMS API

pub mod client;
pub mod endpoints;
pub mod pagination;

pub use client::ApiClient;
