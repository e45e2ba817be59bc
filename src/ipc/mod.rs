//! JSON-lines sidecar protocol. One request per line on stdin, one response per line on
//! stdout. Methods are namespaced `core`, `setup.*` and `grading.*`; see `router`.

mod error;
mod handlers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
