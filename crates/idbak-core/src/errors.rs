//! Failures of the external deduplication utility.
//!
//! Every variant is fatal for the call that produced it: the adapter never
//! retries and never tries to recover partial output beyond the documented
//! preamble and line filtering.

use std::fmt;
use std::process::ExitStatus;

#[derive(Debug)]
pub enum UtilError {
    /// The utility exited unsuccessfully.
    Status { operation: String, status: ExitStatus },
    /// The utility wrote bytes that are not UTF-8.
    Utf8 { operation: String },
    /// A single-document response lacked its `<tree` root.
    MissingTree { operation: String },
    /// Structured output could not be decoded.
    Parse {
        operation: String,
        record: String,
        message: String,
    },
    /// A response was well formed but lacked a required value.
    Missing { operation: String, what: String },
}

impl UtilError {
    pub fn operation(&self) -> &str {
        match self {
            UtilError::Status { operation, .. }
            | UtilError::Utf8 { operation }
            | UtilError::MissingTree { operation }
            | UtilError::Parse { operation, .. }
            | UtilError::Missing { operation, .. } => operation,
        }
    }
}

impl fmt::Display for UtilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilError::Status { operation, status } => {
                write!(f, "idevsutil_dedup {operation} failed with {status}")
            }
            UtilError::Utf8 { operation } => {
                write!(f, "idevsutil_dedup {operation} produced non UTF-8 output")
            }
            UtilError::MissingTree { operation } => {
                write!(f, "did not find expected tree in {operation} output")
            }
            UtilError::Parse {
                operation,
                record,
                message,
            } => write!(f, "malformed {operation} record {record:?}: {message}"),
            UtilError::Missing { operation, what } => {
                write!(f, "{operation} output did not contain {what}")
            }
        }
    }
}

impl std::error::Error for UtilError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_operation() {
        let err = UtilError::MissingTree {
            operation: "--get-quota".to_string(),
        };
        assert_eq!(err.operation(), "--get-quota");
        assert_eq!(
            err.to_string(),
            "did not find expected tree in --get-quota output"
        );
    }

    #[test]
    fn parse_error_quotes_the_record() {
        let err = UtilError::Parse {
            operation: "upload".to_string(),
            record: "<item per=".to_string(),
            message: "unexpected end".to_string(),
        };
        assert!(err.to_string().contains("\"<item per=\""));
    }
}
