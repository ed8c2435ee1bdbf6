//! Error module for the SED/LEMS execution library.
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Broad category of a [`SedError`], useful to tell data errors from capability gaps.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// The task, model or document is malformed.
    Validation,
    /// The request is outside of the capabilities of the engine.
    Unsupported,
    /// No acceptable algorithm exists under the active substitution policy.
    Algorithm,
    /// An algorithm parameter could not be applied.
    Parameter,
    /// The native engine failed.
    Execution,
    /// The engine outputs are missing or unreadable.
    Output,
    /// Underlying I/O or XML failure.
    Io,
}

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum SedError {
    /// Error for an invalid task, model, simulation or variable.
    InvalidTask(String),
    /// Error for an invalid native (LEMS) configuration document.
    InvalidDocument(String),
    /// Error for a feature which is not supported by the engine.
    NotSupported(String),
    /// Error for an algorithm which cannot be substituted under the active policy.
    AlgorithmNotSubstitutable {
        requested: String,
        policy: String,
        candidates: Vec<String>,
    },
    /// Error for a malformed algorithm parameter value.
    InvalidParameterValue(String),
    /// Error for an unknown algorithm parameter or an unsupported enumerated value.
    UnsupportedParameter(String),
    /// Error for a failed run of a native engine.
    EngineExecution {
        engine: String,
        file: Option<PathBuf>,
        output: Option<String>,
    },
    /// Error for an output file which was declared but not produced.
    MissingOutputFile(PathBuf),
    /// Error for an output file which could not be interpreted.
    MalformedOutput(String),
    /// Error for XML parsing or serialization.
    Xml(String),
    /// Error for I/O operations.
    IOError(String),
}

impl SedError {
    /// Returns the category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SedError::InvalidTask(_) | SedError::InvalidDocument(_) => ErrorKind::Validation,
            SedError::NotSupported(_) => ErrorKind::Unsupported,
            SedError::AlgorithmNotSubstitutable { .. } => ErrorKind::Algorithm,
            SedError::InvalidParameterValue(_) | SedError::UnsupportedParameter(_) => {
                ErrorKind::Parameter
            }
            SedError::EngineExecution { .. } => ErrorKind::Execution,
            SedError::MissingOutputFile(_) | SedError::MalformedOutput(_) => ErrorKind::Output,
            SedError::Xml(_) | SedError::IOError(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for SedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SedError::InvalidTask(e) => write!(f, "{}", e),
            SedError::InvalidDocument(e) => write!(f, "Invalid LEMS document: {}", e),
            SedError::NotSupported(e) => write!(f, "{}", e),
            SedError::AlgorithmNotSubstitutable {
                requested,
                policy,
                candidates,
            } => {
                write!(
                    f,
                    "No algorithm can be substituted for `{}` at substitution policy `{}`.",
                    requested, policy
                )?;
                if !candidates.is_empty() {
                    write!(f, " Algorithm must be one of the following:")?;
                    for candidate in candidates {
                        write!(f, "\n  - {}", candidate)?;
                    }
                }
                Ok(())
            }
            SedError::InvalidParameterValue(e) => write!(f, "{}", e),
            SedError::UnsupportedParameter(e) => write!(f, "{}", e),
            SedError::EngineExecution {
                engine,
                file,
                output,
            } => {
                match file {
                    Some(file) => write!(
                        f,
                        "`{}` was not able to execute `{}`",
                        engine,
                        file.display()
                    )?,
                    None => write!(f, "`{}` was not able to execute the LEMS document", engine)?,
                }
                if let Some(output) = output.as_ref().filter(|o| !o.trim().is_empty()) {
                    write!(f, "\n\n  {}", output.trim_end().replace('\n', "\n  "))?;
                }
                Ok(())
            }
            SedError::MissingOutputFile(path) => {
                write!(f, "Output file {} does not exist", path.display())
            }
            SedError::MalformedOutput(e) => write!(f, "Malformed output: {}", e),
            SedError::Xml(e) => write!(f, "XML error: {}", e),
            SedError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SedError {}

impl From<std::io::Error> for SedError {
    fn from(e: std::io::Error) -> Self {
        SedError::IOError(e.to_string())
    }
}

impl From<quick_xml::Error> for SedError {
    fn from(e: quick_xml::Error) -> Self {
        SedError::Xml(e.to_string())
    }
}

impl From<csv::Error> for SedError {
    fn from(e: csv::Error) -> Self {
        SedError::MalformedOutput(e.to_string())
    }
}

impl From<serde_json::Error> for SedError {
    fn from(e: serde_json::Error) -> Self {
        SedError::IOError(e.to_string())
    }
}

/// Result type of the library.
pub type Result<T> = std::result::Result<T, SedError>;
