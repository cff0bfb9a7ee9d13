//! Network access and the request/response values shared with the cache.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Headers, Request, Response};
