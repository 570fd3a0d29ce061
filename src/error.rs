use thiserror::Error;

/// Failures surfaced by the flag service client and the local collaborators.
///
/// The public evaluation API of [crate::GeoFeatures] never returns these; it converts them into
/// conservative defaults. They are visible when using [crate::FlagSource] or the settings stores
/// directly.
#[derive(Error, Debug)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("server returned an empty body")]
    EmptyBody,
    #[error("could not decode response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("settings store error: {0}")]
    Settings(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn server_error_message_includes_status() {
        let error = Error::Server {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_that!(error.to_string()).is_equal_to("error: 503 - Service Unavailable".to_string());
        assert_that!(error.is_not_found()).is_false();
    }

    #[test]
    fn not_found_is_recognised() {
        let error = Error::NotFound("feature 'dark_mode'".to_string());
        assert_that!(error.is_not_found()).is_true();
        assert_that!(error.to_string()).is_equal_to("feature 'dark_mode' not found".to_string());
    }
}
