//! Hall records: one CSV table per hall with columns ID, Machine, Status,
//! Date.
//!
//! The table for a hall springs into existence (header row only) the first
//! time the hall is accessed, and every mutation rewrites the whole file.
//! Fields containing commas, quotes, or line breaks are quoted with embedded
//! quotes doubled; anything else is written verbatim. A quoted field may
//! span lines, so rows end at unquoted newlines only.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::saving;

const TABLE_HEADER: &str = "ID,Machine,Status,Date";

/// Machine states offered by the entry forms.
///
/// This is a form-boundary restriction only: the store keeps status as free
/// text, so a hand-edited table with some other status string loads and
/// round-trips untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Stopped,
    #[serde(rename = "Service Needed")]
    ServiceNeeded,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Running, Status::Stopped, Status::ServiceNeeded];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "Running",
            Status::Stopped => "Stopped",
            Status::ServiceNeeded => "Service Needed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a hall's table. IDs are free text and not required to be
/// unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub id: String,
    pub machine: String,
    pub status: String,
    pub date: NaiveDate,
}

/// A hall's rows, in file order.
pub type HallTable = Vec<MachineRecord>;

/// Append a record. ID uniqueness is not checked.
pub fn add_record(table: &mut HallTable, record: MachineRecord) {
    table.push(record);
}

/// Replace Machine/Status/Date on every row whose ID equals `id`.
///
/// Rows are matched by string comparison; if several rows share the ID they
/// are all updated identically. A nonexistent ID touches nothing. Returns
/// the number of rows updated.
pub fn update_record(
    table: &mut HallTable,
    id: &str,
    machine: &str,
    status: &str,
    date: NaiveDate,
) -> usize {
    let mut updated = 0;
    for row in table.iter_mut().filter(|row| row.id == id) {
        row.machine = machine.to_string();
        row.status = status.to_string();
        row.date = date;
        updated += 1;
    }
    updated
}

/// Remove every row whose ID equals `id`. Returns the number removed.
pub fn delete_record(table: &mut HallTable, id: &str) -> usize {
    let before = table.len();
    table.retain(|row| row.id != id);
    before - table.len()
}

/// Handle on the per-hall table files inside the data directory.
pub struct HallStore {
    data_dir: PathBuf,
}

impl HallStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        HallStore {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the table file for `hall`.
    pub fn table_path(&self, hall: &str) -> PathBuf {
        self.data_dir.join(format!("data_hall_{hall}.csv"))
    }

    /// Read a hall's table, creating an empty one first if none exists.
    ///
    /// The created file carries just the header row. A file that exists but
    /// cannot be parsed is fatal to the caller; there is no partial-data
    /// fallback.
    pub fn load_or_create(&self, hall: &str) -> Result<HallTable> {
        let path = self.table_path(hall);
        let contents = match saving::read_if_exists(&path)? {
            Some(contents) => contents,
            None => {
                let empty = render_table(&[]);
                saving::write_atomic(&path, &empty)?;
                debug!(hall, path = %path.display(), "created empty hall table");
                empty
            }
        };
        parse_table(&path, &contents)
    }

    /// Overwrite a hall's file with the full table, rows in the given order.
    pub fn persist(&self, hall: &str, table: &HallTable) -> Result<()> {
        let path = self.table_path(hall);
        saving::write_atomic(&path, &render_table(table))?;
        debug!(hall, rows = table.len(), "persisted hall table");
        Ok(())
    }
}

fn render_table(table: &[MachineRecord]) -> String {
    let mut out = String::new();
    out.push_str(TABLE_HEADER);
    out.push('\n');

    for record in table {
        push_field(&mut out, &record.id);
        out.push(',');
        push_field(&mut out, &record.machine);
        out.push(',');
        push_field(&mut out, &record.status);
        out.push(',');
        push_field(&mut out, &record.date.format("%Y-%m-%d").to_string());
        out.push('\n');
    }

    out
}

// Quote a field only when it needs it; embedded quotes are doubled.
fn push_field(out: &mut String, value: &str) {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        let escaped = value.replace('"', "\"\"");
        out.push('"');
        out.push_str(&escaped);
        out.push('"');
    } else {
        out.push_str(value);
    }
}

fn parse_table(path: &Path, contents: &str) -> Result<HallTable> {
    let malformed = |reason: String| AppError::MalformedTable {
        path: path.display().to_string(),
        reason,
    };

    if contents.is_empty() {
        return Err(malformed("missing header row".to_string()));
    }
    let (header, body) = contents.split_once('\n').unwrap_or((contents, ""));
    let header = header.strip_suffix('\r').unwrap_or(header);
    if header != TABLE_HEADER {
        return Err(malformed(format!("unexpected header row: {header:?}")));
    }

    let mut table = HallTable::new();
    for (idx, fields) in parse_rows(body).into_iter().enumerate() {
        let row_no = idx + 2;
        let [id, machine, status, date_raw]: [String; 4] =
            fields.try_into().map_err(|bad: Vec<String>| {
                malformed(format!("row {row_no} has {} fields, expected 4", bad.len()))
            })?;

        let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
            .map_err(|_| malformed(format!("row {row_no} has a bad date: {date_raw:?}")))?;

        table.push(MachineRecord {
            id,
            machine,
            status,
            date,
        });
    }

    Ok(table)
}

// Split the table body into rows of fields, honoring quoting and doubled
// quotes. A quoted field may contain commas and line breaks, so a row ends
// only at an unquoted newline; unquoted CRLF also terminates a row.
fn parse_rows(body: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if let Some(&next) = chars.peek() {
                    if next == '"' && in_quotes {
                        current_field.push('"');
                        chars.next();
                    } else {
                        in_quotes = !in_quotes;
                    }
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(current_field);
                current_field = String::new();
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                fields.push(current_field);
                current_field = String::new();
                rows.push(fields);
                fields = Vec::new();
            }
            _ => {
                current_field.push(c);
            }
        }
    }

    if !fields.is_empty() || !current_field.is_empty() {
        fields.push(current_field);
        rows.push(fields);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(id: &str, machine: &str, status: &str, day: &str) -> MachineRecord {
        MachineRecord {
            id: id.to_string(),
            machine: machine.to_string(),
            status: status.to_string(),
            date: date(day),
        }
    }

    fn store() -> (tempfile::TempDir, HallStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HallStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn first_access_creates_a_header_only_file() {
        let (dir, store) = store();
        let table = store.load_or_create("A").unwrap();

        assert!(table.is_empty());
        let raw = std::fs::read_to_string(dir.path().join("data_hall_A.csv")).unwrap();
        assert_eq!(raw, "ID,Machine,Status,Date\n");
    }

    #[test]
    fn add_then_reload_preserves_exact_fields() {
        let (_dir, store) = store();
        let mut table = store.load_or_create("A").unwrap();

        add_record(&mut table, record("1", "M1", "Running", "2024-01-01"));
        store.persist("A", &table).unwrap();

        let reloaded = store.load_or_create("A").unwrap();
        assert_eq!(reloaded, vec![record("1", "M1", "Running", "2024-01-01")]);
    }

    #[test]
    fn fields_with_commas_and_quotes_round_trip() {
        let (_dir, store) = store();
        let mut table = HallTable::new();
        add_record(
            &mut table,
            record("7", "Press, \"the big\" one", "Service Needed", "2024-06-30"),
        );
        store.persist("B", &table).unwrap();

        let reloaded = store.load_or_create("B").unwrap();
        assert_eq!(reloaded, table);
    }

    #[test]
    fn fields_with_newlines_round_trip() {
        let (dir, store) = store();
        let mut table = HallTable::new();
        add_record(&mut table, record("2", "Mill\nNorth", "Running", "2024-03-03"));
        store.persist("A", &table).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("data_hall_A.csv")).unwrap();
        assert!(raw.contains("\"Mill\nNorth\""));
        assert_eq!(store.load_or_create("A").unwrap(), table);
    }

    #[test]
    fn fields_with_carriage_returns_round_trip() {
        let (_dir, store) = store();
        let mut table = HallTable::new();
        add_record(&mut table, record("4", "Saw\r\nEast", "Stopped", "2024-03-04"));
        store.persist("A", &table).unwrap();

        assert_eq!(store.load_or_create("A").unwrap(), table);
    }

    #[test]
    fn crlf_row_endings_are_tolerated() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join("data_hall_A.csv"),
            "ID,Machine,Status,Date\r\n1,M1,Running,2024-01-01\r\n",
        )
        .unwrap();

        assert_eq!(
            store.load_or_create("A").unwrap(),
            vec![record("1", "M1", "Running", "2024-01-01")]
        );
    }

    #[test]
    fn nonstandard_status_text_survives_a_round_trip() {
        let (_dir, store) = store();
        let mut table = HallTable::new();
        add_record(&mut table, record("9", "M9", "Broken", "2024-02-02"));
        store.persist("A", &table).unwrap();

        let reloaded = store.load_or_create("A").unwrap();
        assert_eq!(reloaded[0].status, "Broken");
    }

    #[test]
    fn add_does_not_enforce_id_uniqueness() {
        let mut table = HallTable::new();
        add_record(&mut table, record("X", "M1", "Running", "2024-01-01"));
        add_record(&mut table, record("X", "M2", "Stopped", "2024-01-02"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn delete_removes_every_row_with_the_id() {
        let mut table = vec![
            record("X", "M1", "Running", "2024-01-01"),
            record("Y", "M2", "Stopped", "2024-01-02"),
            record("X", "M3", "Running", "2024-01-03"),
        ];

        let removed = delete_record(&mut table, "X");
        assert_eq!(removed, 2);
        assert_eq!(table, vec![record("Y", "M2", "Stopped", "2024-01-02")]);
    }

    #[test]
    fn update_touches_every_row_with_the_id() {
        let mut table = vec![
            record("X", "M1", "Running", "2024-01-01"),
            record("Y", "M2", "Stopped", "2024-01-02"),
            record("X", "M3", "Running", "2024-01-03"),
        ];

        let updated = update_record(&mut table, "X", "M9", "Service Needed", date("2024-05-05"));
        assert_eq!(updated, 2);
        assert_eq!(table[0], record("X", "M9", "Service Needed", "2024-05-05"));
        assert_eq!(table[1], record("Y", "M2", "Stopped", "2024-01-02"));
        assert_eq!(table[2], record("X", "M9", "Service Needed", "2024-05-05"));
    }

    #[test]
    fn update_on_a_nonexistent_id_changes_nothing() {
        let mut table = vec![record("X", "M1", "Running", "2024-01-01")];
        let before = table.clone();

        let updated = update_record(&mut table, "Z", "M9", "Stopped", date("2024-05-05"));
        assert_eq!(updated, 0);
        assert_eq!(table, before);
    }

    #[test]
    fn row_order_is_preserved() {
        let (_dir, store) = store();
        let table = vec![
            record("3", "C", "Running", "2024-01-03"),
            record("1", "A", "Stopped", "2024-01-01"),
            record("2", "B", "Running", "2024-01-02"),
        ];
        store.persist("A", &table).unwrap();

        assert_eq!(store.load_or_create("A").unwrap(), table);
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join("data_hall_A.csv"),
            "ID,Machine,Status,Date\n1,M1,Running\n",
        )
        .unwrap();

        assert!(matches!(
            store.load_or_create("A"),
            Err(AppError::MalformedTable { .. })
        ));
    }

    #[test]
    fn bad_date_is_malformed() {
        let (dir, store) = store();
        std::fs::write(
            dir.path().join("data_hall_A.csv"),
            "ID,Machine,Status,Date\n1,M1,Running,yesterday\n",
        )
        .unwrap();

        assert!(matches!(
            store.load_or_create("A"),
            Err(AppError::MalformedTable { .. })
        ));
    }

    #[test]
    fn unexpected_header_is_malformed() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("data_hall_A.csv"), "a,b,c,d\n").unwrap();

        assert!(matches!(
            store.load_or_create("A"),
            Err(AppError::MalformedTable { .. })
        ));
    }

    #[test]
    fn status_display_matches_the_form_labels() {
        assert_eq!(Status::Running.to_string(), "Running");
        assert_eq!(Status::Stopped.to_string(), "Stopped");
        assert_eq!(Status::ServiceNeeded.to_string(), "Service Needed");
    }

    #[test]
    fn status_deserializes_from_form_values() {
        assert_eq!(
            serde_json::from_str::<Status>("\"Service Needed\"").unwrap(),
            Status::ServiceNeeded
        );
        assert_eq!(
            serde_json::from_str::<Status>("\"Running\"").unwrap(),
            Status::Running
        );
    }
}
