#![forbid(unsafe_code)]

use serde::Serialize;
use thiserror::Error;

/// Error enumerates the errors returned by this application.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("prompt_server input parameters:\n{}", .0)]
    InputParms(String),

    /// Inaccessible logger configuration file.
    #[error("Unable to access the Log4rs configuration file: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    #[error("Invalid configuration: {}", .0)]
    InvalidConfig(String),
}

// ***************************************************************************
//                             HTTP Error Payload
// ***************************************************************************
/// The json body of every non-2xx response.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HttpResult {
    pub error: String,
}

impl HttpResult {
    pub fn new(error: String) -> Self {
        Self { error }
    }
}
