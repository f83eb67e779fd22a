//! Security checks for outbound fetches.

mod url_validation;

pub use url_validation::validate_download_url;
