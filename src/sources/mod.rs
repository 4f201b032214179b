//! Reference source adapters
//!
//! - [`json`] -> bindings into a `serde_json::Value` document
//! - [`map`] -> flat string maps
//! - [`request`] -> HTTP-style requests (headers, cookies, query, JSON body)

pub mod json;
pub mod map;
pub mod request;

pub use json::JsonManager;
pub use map::MapManager;
pub use request::{Request, RequestCache, RequestManager};
