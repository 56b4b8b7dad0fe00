use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid host entry: {0}")]
    Validation(String),

    #[error("{message}")]
    Transport {
        message: String,
        output: Option<String>,
    },

    #[error("Script exited successfully but {path} was not created")]
    ExportMissing { path: String },

    #[error("Identity probe failed: {source}")]
    IdentityProbe {
        #[source]
        source: Box<FleetError>,
    },

    #[error("Unexpected error: {0}")]
    Unclassified(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a failure, used by the reporter and JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Validation,
    Transport,
    ExportMissing,
    IdentityProbe,
    Unclassified,
}

impl FleetError {
    pub fn transport(message: impl Into<String>) -> Self {
        FleetError::Transport {
            message: message.into(),
            output: None,
        }
    }

    pub fn transport_with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        FleetError::Transport {
            message: message.into(),
            output: if output.trim().is_empty() {
                None
            } else {
                Some(output)
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FleetError::Configuration(_) => FailureKind::Configuration,
            FleetError::Validation(_) => FailureKind::Validation,
            FleetError::Transport { .. } => FailureKind::Transport,
            FleetError::ExportMissing { .. } => FailureKind::ExportMissing,
            FleetError::IdentityProbe { .. } => FailureKind::IdentityProbe,
            FleetError::Unclassified(_) | FleetError::Io(_) => FailureKind::Unclassified,
        }
    }

    /// Full multi-line detail: the message plus any captured remote output.
    pub fn detail(&self) -> String {
        match self {
            FleetError::Transport {
                message,
                output: Some(output),
            } => format!("{}\noutput:\n{}", message, output.trim_end()),
            FleetError::IdentityProbe { source } => {
                format!("Identity probe failed: {}", source.detail())
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Validation => "validation",
            FailureKind::Transport => "transport",
            FailureKind::ExportMissing => "export-missing",
            FailureKind::IdentityProbe => "identity-probe",
            FailureKind::Unclassified => "unclassified",
        };
        write!(f, "{}", name)
    }
}

pub type Error = FleetError;
pub type Result<T> = std::result::Result<T, Error>;
