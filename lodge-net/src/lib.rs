// lodge-net/src/lib.rs
pub mod confirm;
pub mod fetch;
pub mod http;
pub mod validation;

pub use fetch::{Fetcher, Transport};
pub use http::{build_http_client, strategy_url, HttpTransport};
pub use validation::{validate, validate_url};
