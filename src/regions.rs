// CSV reader for region definitions.
//
// The whole file is loaded up front and only the presence of the required
// columns is checked here. Cells are kept as text: turning them into
// numbers happens per row in `RegionRow::coerce`, so one bad row never
// fails the file.

use crate::error::{ImportError, Result, RowError};
use crate::session::Rectangle;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;
use tracing::debug;

pub const IMAGE_ID: &str = "image_id";
pub const KIND: &str = "type";
pub const X: &str = "X";
pub const Y: &str = "Y";
pub const WIDTH: &str = "Width";
pub const HEIGHT: &str = "Height";
pub const SEGMENT_ID: &str = "segment_id";

/// Columns every input file must carry. Extra columns are ignored.
pub const REQUIRED_COLUMNS: [&str; 7] = [IMAGE_ID, KIND, X, Y, WIDTH, HEIGHT, SEGMENT_ID];

/// The only region kind currently submitted.
pub const RECTANGLE: &str = "rectangle";

/// One data row, cells as they appear in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionRow {
    /// 1-based line number in the file, header included.
    pub line: u64,
    pub image_id: String,
    pub kind: String,
    pub x: String,
    pub y: String,
    pub width: String,
    pub height: String,
    pub segment_id: String,
}

/// A row after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRow {
    Rectangle { image_id: i64, rect: Rectangle },
    /// Region kind other than rectangle, normalized.
    Unsupported { kind: String },
}

impl RegionRow {
    /// Region kind trimmed and lowercased.
    pub fn normalized_kind(&self) -> String {
        self.kind.trim().to_lowercase()
    }

    /// Coerce the image id and geometry to integers and build the region.
    /// The image id is coerced for every row; geometry only for rectangles.
    pub fn coerce(&self) -> std::result::Result<ParsedRow, RowError> {
        let image_id = coerce_int(IMAGE_ID, &self.image_id)?;
        let kind = self.normalized_kind();
        if kind != RECTANGLE {
            return Ok(ParsedRow::Unsupported { kind });
        }
        let rect = Rectangle::all_layers(
            coerce_int(X, &self.x)?,
            coerce_int(Y, &self.y)?,
            coerce_int(WIDTH, &self.width)?,
            coerce_int(HEIGHT, &self.height)?,
            self.segment_id.trim(),
        );
        Ok(ParsedRow::Rectangle { image_id, rect })
    }
}

/// Parse a cell as an integer. Decimal text is truncated toward zero
/// (`"10.9"` gives 10), which is how spreadsheet exports of float columns
/// are read back.
pub fn coerce_int(column: &'static str, raw: &str) -> std::result::Result<i64, RowError> {
    let value = raw.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.trunc().abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
        _ => Err(RowError::Coerce {
            column,
            value: raw.to_string(),
        }),
    }
}

/// Read every data row of a comma-delimited file with a header row.
pub fn read_rows(path: &Path) -> Result<Vec<RegionRow>> {
    let csv_err = |source| ImportError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let columns = ColumnIndex::locate(&headers).map_err(|missing| ImportError::MissingColumns {
        path: path.to_path_buf(),
        columns: missing,
    })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows.push(columns.row(&record));
    }
    debug!(path = %path.display(), rows = rows.len(), "read region rows");
    Ok(rows)
}

/// Position of each required column in the header.
struct ColumnIndex([usize; 7]);

impl ColumnIndex {
    fn locate(headers: &StringRecord) -> std::result::Result<Self, Vec<String>> {
        let mut index = [0usize; 7];
        let mut missing = Vec::new();
        for (slot, name) in index.iter_mut().zip(REQUIRED_COLUMNS) {
            match headers.iter().position(|h| h == name) {
                Some(pos) => *slot = pos,
                None => missing.push(name.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(ColumnIndex(index))
        } else {
            Err(missing)
        }
    }

    fn row(&self, record: &StringRecord) -> RegionRow {
        let cell = |i: usize| record.get(self.0[i]).unwrap_or_default().to_string();
        RegionRow {
            line: record.position().map(|p| p.line()).unwrap_or_default(),
            image_id: cell(0),
            kind: cell(1),
            x: cell(2),
            y: cell(3),
            width: cell(4),
            height: cell(5),
            segment_id: cell(6),
        }
    }
}
