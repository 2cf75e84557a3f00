//! Backend HTTP surface: request/response types and the reqwest client.

mod client;
mod types;

pub use client::{BackendClient, MUTATION_ID_HEADER};
pub use types::{Fetch, Request, Response};
