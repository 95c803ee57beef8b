// The import flow: authenticate, pick a group, read the CSV, submit the
// regions. `run` is the single top-level handler: every failure ends up
// there as a notice, and the session is closed on every path.

use crate::config::Config;
use crate::error::{ErrorKind, ImportError, Result};
use crate::groups::GroupDirectory;
use crate::regions::{read_rows, REQUIRED_COLUMNS};
use crate::session::{Connector, Credentials, SessionGuard};
use crate::submit::{submit_rows, BatchSummary, RowOutcome};
use std::path::PathBuf;
use tracing::{error, info};

/// Interactive collaborator: prompts and notices.
///
/// `Ok(None)` from a prompt means the user left it empty or cancelled it.
pub trait Console {
    fn ask_text(&mut self, title: &str, prompt: &str, initial: Option<&str>)
        -> Result<Option<String>>;

    /// Masked input.
    fn ask_password(&mut self, title: &str, prompt: &str) -> Result<Option<String>>;

    fn ask_integer(&mut self, title: &str, prompt: &str) -> Result<Option<i64>>;

    /// Pick an existing file, offering only `extensions`.
    fn ask_open_file(
        &mut self,
        title: &str,
        filter_name: &str,
        extensions: &[&str],
    ) -> Result<Option<PathBuf>>;

    fn info(&mut self, title: &str, message: &str);
    fn warning(&mut self, title: &str, message: &str);
    fn error(&mut self, title: &str, message: &str);

    fn begin_batch(&mut self, _total: usize) {}

    /// Called once per row, in file order.
    fn row_finished(&mut self, outcome: &RowOutcome) {
        if let Some(line) = outcome.message() {
            println!("{}", line);
        }
    }

    fn end_batch(&mut self) {}
}

/// Forward-only progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unauthenticated,
    Authenticated,
    GroupSelected,
    Processing,
    Done,
    Aborted,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// `Done` or `Aborted`.
    pub stage: Stage,
    /// Last stage reached before finishing or aborting.
    pub reached: Stage,
    pub summary: Option<BatchSummary>,
    pub error: Option<ErrorKind>,
}

/// Text shown before the file prompt.
pub fn csv_requirements() -> String {
    let columns = REQUIRED_COLUMNS
        .iter()
        .map(|c| match *c {
            "type" => "- type ('rectangle')".to_string(),
            other => format!("- {}", other),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The CSV file must contain the following columns:\n\n{}\n\n\
         Ensure your CSV file is formatted correctly before proceeding.",
        columns
    )
}

/// Run the whole import against `connector`, talking to the user through
/// `console`. Never returns an error: failures are shown as notices and
/// reflected in the report.
pub fn run<C, K>(connector: &C, console: &mut K, config: &Config) -> RunReport
where
    C: Connector,
    K: Console + ?Sized,
{
    let mut reached = Stage::Unauthenticated;
    match execute(connector, console, config, &mut reached) {
        Ok(summary) => {
            notify_summary(console, &summary);
            RunReport {
                stage: Stage::Done,
                reached,
                summary: Some(summary),
                error: None,
            }
        }
        Err(e) => {
            error!(stage = ?reached, error = %e, "import aborted");
            notify_error(console, &e);
            RunReport {
                stage: Stage::Aborted,
                reached,
                summary: None,
                error: Some(e.kind()),
            }
        }
    }
}

fn advance(reached: &mut Stage, next: Stage) {
    info!(from = ?*reached, to = ?next, "stage");
    *reached = next;
}

fn execute<C, K>(
    connector: &C,
    console: &mut K,
    config: &Config,
    reached: &mut Stage,
) -> Result<BatchSummary>
where
    C: Connector,
    K: Console + ?Sized,
{
    let host = console.ask_text("Host", "Host", Some(&config.default_host))?;
    let username = console.ask_text("Username", "Username", None)?;
    let password = console.ask_password("Password", "Password")?;
    let credentials = Credentials::new(host, username, password)?;

    // From here on the guard closes the session on any early return.
    let mut session = SessionGuard::new(connector.open_session(&credentials)?);
    advance(reached, Stage::Authenticated);

    let groups = GroupDirectory::fetch(&*session)?;
    let prompt = format!(
        "Available groups:\n{}\n\nEnter the ID of the group you want to switch to",
        groups.listing()
    );
    let selected = console.ask_integer("Select Group", &prompt)?;
    groups.switch(&mut *session, selected)?;
    advance(reached, Stage::GroupSelected);

    console.info("CSV Requirements", &csv_requirements());
    let path = console
        .ask_open_file("Select CSV File", "CSV Files", &["csv"])?
        .ok_or(ImportError::NoFileSelected)?;
    let rows = read_rows(&path)?;
    advance(reached, Stage::Processing);

    console.begin_batch(rows.len());
    let summary = submit_rows(&*session, &rows, |outcome| console.row_finished(outcome));
    console.end_batch();

    session.close();
    Ok(summary)
}

fn notify_summary<K: Console + ?Sized>(console: &mut K, summary: &BatchSummary) {
    let counts = format!(
        "Submitted: {}\nSkipped (unsupported type): {}\nFailed: {}",
        summary.submitted, summary.skipped, summary.failed
    );
    if summary.failed == 0 {
        console.info(
            "Success",
            &format!("ROIs successfully added across all Z layers.\n\n{}", counts),
        );
    } else {
        console.warning(
            "Finished with errors",
            &format!("Some ROIs could not be added.\n\n{}", counts),
        );
    }
}

fn notify_error<K: Console + ?Sized>(console: &mut K, e: &ImportError) {
    match e.kind() {
        ErrorKind::Input => console.warning("Input Error", &e.to_string()),
        ErrorKind::Connection => console.error("Connection Error", &e.to_string()),
        ErrorKind::Fault => console.error("Error", &format!("An error occurred: {}", e)),
    }
}
