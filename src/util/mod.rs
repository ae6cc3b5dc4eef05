//! Shared helpers.
//!
//! - **URL validation**: scheme checks and SSRF protection for feed and page URLs
//! - **HTTP dates**: formatting and parsing of `Last-Modified` style timestamps

mod http_date;
mod url_validator;

pub use http_date::{format_http_date, parse_http_date};
pub use url_validator::{validate_url, validate_url_with, UrlValidationError};
