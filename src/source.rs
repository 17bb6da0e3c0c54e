//! Named row tables a snapshot is built from.

use std::io::Read;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::error::{FeedError, Result};

/// One table row: column name to trimmed cell value.
pub type Row = FxHashMap<String, String>;

/// Something that can hand out the rows of a named table, such as `stops`
/// or `stop_times`.
pub trait TableSource {
    /// `Ok(None)` when the table does not exist.
    fn open_table(&mut self, name: &str) -> Result<Option<Vec<Row>>>;
}

/// Parses CSV with a header line. Short rows are allowed; missing cells read
/// as empty.
pub fn read_rows<R: Read>(table: &str, reader: R) -> Result<Vec<Row>> {
    let read_error = |source| FeedError::TableRead {
        table: table.to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(read_error)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record).map_err(read_error)? {
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(column, value)| (column.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// A directory of `<name>.txt` files, as in an unpacked GTFS feed.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl TableSource for DirectorySource {
    fn open_table(&mut self, name: &str) -> Result<Option<Vec<Row>>> {
        let path = self.root.join(format!("{name}.txt"));
        if !path.exists() {
            return Ok(None);
        }
        log::debug!("Reading {:?}", path);
        let file = std::fs::File::open(&path)?;
        read_rows(name, std::io::BufReader::new(file)).map(Some)
    }
}

/// Tables held in memory, keyed by name.
#[derive(Default)]
pub struct MemoryTables {
    tables: FxHashMap<String, Vec<Row>>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: &str, rows: Vec<Row>) {
        self.tables.insert(name.to_string(), rows);
    }

    pub fn add_csv(&mut self, name: &str, text: &str) -> Result<()> {
        let rows = read_rows(name, text.as_bytes())?;
        self.add_table(name, rows);
        Ok(())
    }

    pub fn with_csv(mut self, name: &str, text: &str) -> Result<Self> {
        self.add_csv(name, text)?;
        Ok(self)
    }

    pub fn remove_table(&mut self, name: &str) -> Option<Vec<Row>> {
        self.tables.remove(name)
    }
}

impl TableSource for MemoryTables {
    fn open_table(&mut self, name: &str) -> Result<Option<Vec<Row>>> {
        Ok(self.tables.get(name).cloned())
    }
}

/// Value of `column`, empty when the column is missing.
pub fn field<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).map_or("", String::as_str)
}

/// Like [`field`] but a missing or empty value is an error.
pub fn required<'a>(row: &'a Row, table: &str, column: &str) -> Result<&'a str> {
    match field(row, column) {
        "" => Err(FeedError::invalid_value(table, column, "")),
        value => Ok(value),
    }
}
