//! Network and archive I/O: source fetching and the binary cache client.

pub mod cache;
pub mod fetch;
