// Library root
// -----------
// Imports rectangular regions from a CSV file into an OMERO server.
// The binary (`main.rs`) wires these modules together.
//
// Module responsibilities:
// - `session`: the contract the pipeline uses to talk to the server, plus
//   the guard that closes a session exactly once.
// - `api`: OMERO.web implementation of that contract over HTTPS.
// - `groups`, `regions`, `submit`: the group selection, CSV reading and
//   region submission steps.
// - `pipeline`: runs the steps in order and reports failures.
// - `ui`: terminal prompts and notices.
pub mod api;
pub mod config;
pub mod error;
pub mod groups;
pub mod pipeline;
pub mod regions;
pub mod session;
pub mod submit;
pub mod ui;

pub use error::{ErrorKind, ImportError, Result, RowError};
