// Error types shared by the library. Row-level problems live in
// `RowError` and never leave the submitter; everything else is an
// `ImportError` that travels up to the pipeline's top-level handler.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop the pipeline.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("A CSV file must be selected")]
    NoFileSelected,

    #[error("Invalid group ID: {}", display_group(.0))]
    InvalidGroup(Option<i64>),

    #[error("{path:?} is missing required columns: {}", .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    #[error("Failed to read CSV {path:?}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to connect to the OMERO server at {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("{operation} failed: {status} - {body}")]
    Server {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Prompt failed: {0}")]
    Prompt(#[source] std::io::Error),
}

fn display_group(id: &Option<i64>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "none entered".into(),
    }
}

/// Coarse classification used to pick the notice shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Connection,
    Fault,
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::MissingField(_)
            | ImportError::NoFileSelected
            | ImportError::InvalidGroup(_)
            | ImportError::MissingColumns { .. } => ErrorKind::Input,
            ImportError::Connection { .. } => ErrorKind::Connection,
            _ => ErrorKind::Fault,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// Failure confined to a single CSV row.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("column {column} value {value:?} is not an integer")]
    Coerce { column: &'static str, value: String },

    #[error(transparent)]
    Submit(#[from] ImportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified_as_input() {
        assert_eq!(ImportError::MissingField("Host").kind(), ErrorKind::Input);
        assert_eq!(ImportError::NoFileSelected.kind(), ErrorKind::Input);
        assert_eq!(ImportError::InvalidGroup(Some(99)).kind(), ErrorKind::Input);
    }

    #[test]
    fn connection_and_fault_kinds() {
        let conn = ImportError::Connection {
            host: "omero.example.org".into(),
            reason: "bad credentials".into(),
        };
        assert_eq!(conn.kind(), ErrorKind::Connection);

        let server = ImportError::Server {
            operation: "List groups",
            status: 500,
            body: String::new(),
        };
        assert_eq!(server.kind(), ErrorKind::Fault);
    }

    #[test]
    fn invalid_group_message_names_the_id() {
        assert_eq!(
            ImportError::InvalidGroup(Some(99)).to_string(),
            "Invalid group ID: 99"
        );
        assert_eq!(
            ImportError::InvalidGroup(None).to_string(),
            "Invalid group ID: none entered"
        );
    }
}
