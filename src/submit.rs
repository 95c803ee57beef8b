// Region submission: one request per row, in file order. A failing row is
// reported and the batch moves on.

use crate::error::RowError;
use crate::regions::{ParsedRow, RegionRow};
use crate::session::{Rectangle, RemoteSession};
use tracing::{debug, info, warn};

/// What happened to one row.
#[derive(Debug)]
pub enum RowOutcome {
    Submitted {
        line: u64,
        image_id: i64,
        rect: Rectangle,
    },
    Skipped {
        line: u64,
        kind: String,
    },
    Failed {
        line: u64,
        image_id: Option<i64>,
        error: RowError,
    },
}

impl RowOutcome {
    /// Line printed to standard output for this row. Skipped rows print
    /// nothing.
    pub fn message(&self) -> Option<String> {
        match self {
            RowOutcome::Submitted { image_id, rect, .. } => Some(format!(
                "ROI added to image {}: Rect({}, {}, {}, {}) across all Z layers",
                image_id, rect.x, rect.y, rect.width, rect.height
            )),
            RowOutcome::Failed {
                image_id: Some(id),
                error,
                ..
            } => Some(format!("Error adding ROI to image {}: {}", id, error)),
            RowOutcome::Failed { line, error, .. } => {
                Some(format!("Error in CSV line {}: {}", line, error))
            }
            RowOutcome::Skipped { .. } => None,
        }
    }
}

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub submitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Submitted { .. } => self.submitted += 1,
            RowOutcome::Skipped { .. } => self.skipped += 1,
            RowOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Submit a single row against `session`.
pub fn submit_row<S: RemoteSession + ?Sized>(session: &S, row: &RegionRow) -> RowOutcome {
    let line = row.line;
    match row.coerce() {
        Ok(ParsedRow::Unsupported { kind }) => {
            debug!(line, kind = %kind, "skipping unsupported region type");
            RowOutcome::Skipped { line, kind }
        }
        Ok(ParsedRow::Rectangle { image_id, rect }) => {
            match session.submit_rectangle(image_id, &rect) {
                Ok(()) => RowOutcome::Submitted {
                    line,
                    image_id,
                    rect,
                },
                Err(e) => {
                    warn!(line, image_id, error = %e, "region submission failed");
                    RowOutcome::Failed {
                        line,
                        image_id: Some(image_id),
                        error: RowError::Submit(e),
                    }
                }
            }
        }
        Err(error) => {
            warn!(line, error = %error, "row could not be coerced");
            RowOutcome::Failed {
                line,
                image_id: None,
                error,
            }
        }
    }
}

/// Submit every row in order, handing each outcome to `report` as soon as
/// it is known.
pub fn submit_rows<S, F>(session: &S, rows: &[RegionRow], mut report: F) -> BatchSummary
where
    S: RemoteSession + ?Sized,
    F: FnMut(&RowOutcome),
{
    let mut summary = BatchSummary::default();
    for row in rows {
        let outcome = submit_row(session, row);
        summary.record(&outcome);
        report(&outcome);
    }
    info!(
        submitted = summary.submitted,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ImportError, Result};
    use crate::session::Group;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Records calls and fails for image ids listed in `missing`.
    #[derive(Default)]
    struct RecordingSession {
        missing: Vec<i64>,
        calls: RefCell<Vec<(i64, Rectangle)>>,
    }

    impl RemoteSession for RecordingSession {
        fn list_groups(&self) -> Result<Vec<Group>> {
            Ok(Vec::new())
        }
        fn active_group(&self) -> Option<i64> {
            None
        }
        fn set_active_group(&mut self, _group_id: i64) -> Result<()> {
            Ok(())
        }
        fn submit_rectangle(&self, image_id: i64, rect: &Rectangle) -> Result<()> {
            self.calls.borrow_mut().push((image_id, rect.clone()));
            if self.missing.contains(&image_id) {
                return Err(ImportError::Server {
                    operation: "Add ROI",
                    status: 404,
                    body: format!("Image:{} not found", image_id),
                });
            }
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn row(line: u64, image_id: &str, kind: &str, geometry: [&str; 4], segment: &str) -> RegionRow {
        RegionRow {
            line,
            image_id: image_id.into(),
            kind: kind.into(),
            x: geometry[0].into(),
            y: geometry[1].into(),
            width: geometry[2].into(),
            height: geometry[3].into(),
            segment_id: segment.into(),
        }
    }

    #[test]
    fn only_rectangles_are_submitted() {
        let session = RecordingSession::default();
        let rows = vec![
            row(2, "1", "rectangle", ["10", "20", "30", "40"], "5"),
            row(3, "2", "circle", ["1", "1", "1", "1"], "6"),
        ];
        let summary = submit_rows(&session, &rows, |_| {});

        assert_eq!(
            *session.calls.borrow(),
            vec![(1, Rectangle::all_layers(10, 20, 30, 40, "5"))]
        );
        assert_eq!(session.calls.borrow()[0].1.label, "Rectangle 5");
        assert_eq!(
            summary,
            BatchSummary {
                submitted: 1,
                skipped: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn failed_row_does_not_stop_the_batch() {
        let session = RecordingSession {
            missing: vec![404],
            ..Default::default()
        };
        let rows = vec![
            row(2, "404", "rectangle", ["0", "0", "5", "5"], "1"),
            row(3, "x", "rectangle", ["0", "0", "5", "5"], "2"),
            row(4, "3", "Rectangle ", ["1", "2", "3", "4"], "3"),
        ];
        let mut messages = Vec::new();
        let summary = submit_rows(&session, &rows, |o| messages.extend(o.message()));

        assert_eq!(session.calls.borrow().len(), 2);
        assert_eq!(session.calls.borrow()[1].0, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.submitted, 1);
        assert!(messages[0].starts_with("Error adding ROI to image 404:"));
        assert!(messages[1].starts_with("Error in CSV line 3:"));
        assert_eq!(
            messages[2],
            "ROI added to image 3: Rect(1, 2, 3, 4) across all Z layers"
        );
    }

    #[test]
    fn skipped_rows_print_nothing() {
        let outcome = RowOutcome::Skipped {
            line: 2,
            kind: "polygon".into(),
        };
        assert_eq!(outcome.message(), None);
    }
}
