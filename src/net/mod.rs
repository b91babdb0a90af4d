//! Shared networking infrastructure.

pub mod client;
pub mod traits;

pub use client::{HttpClient, HttpClientBuilder};
pub use traits::{HttpRequest, HttpResponse, HttpTransport};
