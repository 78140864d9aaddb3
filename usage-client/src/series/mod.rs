//! File-backed interval series for one account.
//!
//! The store is a CSV file with a `timestamp` (RFC 3339) and a `value` column,
//! sorted ascending and unique by instant. Every write goes to a sibling temp
//! file first and is renamed over the store, so a failed write leaves the
//! previous file intact.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::domain::{Reading, ReadingsBatch};

#[derive(thiserror::Error, Debug)]
pub enum SeriesError {
    #[error("series io error: {0}")]
    Io(#[from] io::Error),
    #[error("series csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column '{0}' in series header")]
    MissingColumn(&'static str),
    #[error("invalid timestamp '{value}' on row {row}: {reason}")]
    Timestamp {
        row: usize,
        value: String,
        reason: String,
    },
    #[error("invalid value '{value}' on row {row}")]
    Value { row: usize, value: String },
}

/// Row accounting for one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Distinct instants on disk before the merge.
    pub existing: usize,
    /// Readings in the incoming batch.
    pub incoming: usize,
    /// Incoming instants not previously stored.
    pub added: usize,
    /// Stored instants overridden by the incoming batch.
    pub replaced: usize,
    /// Rows in the merged series.
    pub total: usize,
}

/// File name for an account's series: `{provider slug}_{sha256(username)[:12]}.csv`.
///
/// The slug is the provider display name with spaces removed, lowercased.
pub fn series_file_name(provider_name: &str, username: &str) -> String {
    let slug: String = provider_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    let digest = Sha256::digest(username.as_bytes());
    let hashed = hex::encode(digest);

    format!("{slug}_{}.csv", &hashed[..12])
}

/// Name for a one-off window export: `{local part}_{unix seconds}.csv`.
pub fn export_file_name(username: &str, at: OffsetDateTime) -> String {
    let local = username.split('@').next().unwrap_or(username);
    format!("{local}_{}.csv", at.unix_timestamp())
}

/// Combines stored readings with a newer batch.
///
/// Policy: at most one reading per instant; a batch reading replaces any
/// stored reading at the same instant. Stored rows that are themselves
/// duplicated keep their last occurrence.
pub fn merge(existing: &[Reading], batch: &ReadingsBatch) -> (Vec<Reading>, MergeSummary) {
    let mut by_instant: BTreeMap<i128, Reading> = BTreeMap::new();
    for reading in existing {
        by_instant.insert(reading.instant_key(), *reading);
    }

    let mut summary = MergeSummary {
        existing: by_instant.len(),
        incoming: batch.len(),
        ..MergeSummary::default()
    };

    for reading in batch {
        match by_instant.insert(reading.instant_key(), *reading) {
            Some(_) => summary.replaced += 1,
            None => summary.added += 1,
        }
    }

    let merged: Vec<Reading> = by_instant.into_values().collect();
    summary.total = merged.len();

    (merged, summary)
}

fn parse_timestamp(raw: &str, row: usize) -> Result<OffsetDateTime, SeriesError> {
    let trimmed = raw.trim();
    match OffsetDateTime::parse(trimmed, &Rfc3339) {
        Ok(ts) => Ok(ts),
        // Older exports used a space between date and time.
        Err(first) => {
            let normalized = trimmed.replacen(' ', "T", 1);
            OffsetDateTime::parse(&normalized, &Rfc3339).map_err(|_| SeriesError::Timestamp {
                row,
                value: raw.to_string(),
                reason: first.to_string(),
            })
        }
    }
}

/// Reads a series from CSV. Accepts `timestamp` or the legacy `datetime` header.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Reading>, SeriesError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let ts_idx = headers
        .iter()
        .position(|h| h == "timestamp")
        .or_else(|| headers.iter().position(|h| h == "datetime"))
        .ok_or(SeriesError::MissingColumn("timestamp"))?;
    let value_idx = headers
        .iter()
        .position(|h| h == "value")
        .ok_or(SeriesError::MissingColumn("value"))?;

    let mut readings = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let row = i + 1;

        let ts_raw = record.get(ts_idx).unwrap_or("");
        let ts = parse_timestamp(ts_raw, row)?;

        let value_raw = record.get(value_idx).unwrap_or("");
        let value: f64 = value_raw.trim().parse().map_err(|_| SeriesError::Value {
            row,
            value: value_raw.to_string(),
        })?;

        readings.push(Reading { ts, value });
    }

    Ok(readings)
}

/// Writes readings as CSV in the given order.
pub fn write_csv<W: Write>(writer: W, readings: &[Reading]) -> Result<(), SeriesError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["timestamp", "value"])?;

    for reading in readings {
        let ts = reading
            .ts
            .format(&Rfc3339)
            .map_err(|e| SeriesError::Timestamp {
                row: 0,
                value: reading.ts.to_string(),
                reason: e.to_string(),
            })?;
        wtr.write_record([ts, reading.value.to_string()])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes `readings` to `path` via a temp file in the same directory and a rename.
pub fn write_atomic(path: &Path, readings: &[Reading]) -> Result<(), SeriesError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("csv.tmp");
    let result = (|| {
        let file = File::create(&tmp_path)?;
        let mut buffered = io::BufWriter::new(file);
        write_csv(&mut buffered, readings)?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok::<(), SeriesError>(())
    })();

    if result.is_err() && tmp_path.is_file() {
        let _ = fs::remove_file(&tmp_path);
    }

    result
}

/// The persisted series for one account.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    path: PathBuf,
}

impl SeriesStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store under `data_dir` named after the provider and a hash of the username.
    pub fn for_account(data_dir: &Path, provider_name: &str, username: &str) -> Self {
        Self::new(data_dir.join(series_file_name(provider_name, username)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored series. A missing file is an empty series.
    pub fn load(&self) -> Result<Vec<Reading>, SeriesError> {
        match File::open(&self.path) {
            Ok(file) => read_csv(io::BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merges `batch` into the stored series and persists the result.
    pub fn merge_and_persist(&self, batch: &ReadingsBatch) -> Result<MergeSummary, SeriesError> {
        let existing = self.load()?;
        let (merged, summary) = merge(&existing, batch);

        write_atomic(&self.path, &merged)?;

        tracing::debug!(
            path = %self.path.display(),
            added = summary.added,
            replaced = summary.replaced,
            total = summary.total,
            "series persisted"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn batch(items: &[(OffsetDateTime, f64)]) -> ReadingsBatch {
        ReadingsBatch::from_readings(items.iter().map(|(ts, v)| Reading::new(*ts, *v)))
    }

    fn store_in(dir: &tempfile::TempDir) -> SeriesStore {
        SeriesStore::new(dir.path().join("store.csv"))
    }

    #[test]
    fn first_ingestion_writes_sorted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let summary = store
            .merge_and_persist(&batch(&[
                (datetime!(2024-01-01 01:00:00 UTC), 0.8),
                (datetime!(2024-01-01 00:00:00 UTC), 1.2),
            ]))
            .unwrap();

        assert_eq!(summary.existing, 0);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.total, 2);

        let stored = store.load().unwrap();
        assert_eq!(
            stored,
            vec![
                Reading::new(datetime!(2024-01-01 00:00:00 UTC), 1.2),
                Reading::new(datetime!(2024-01-01 01:00:00 UTC), 0.8),
            ]
        );

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            raw,
            "timestamp,value\n2024-01-01T00:00:00Z,1.2\n2024-01-01T01:00:00Z,0.8\n"
        );
    }

    #[test]
    fn batch_overrides_stored_reading() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let t = datetime!(2024-01-01 00:00:00 UTC);

        store.merge_and_persist(&batch(&[(t, 5.0)])).unwrap();
        let summary = store.merge_and_persist(&batch(&[(t, 7.5)])).unwrap();

        assert_eq!(summary.replaced, 1);
        assert_eq!(store.load().unwrap(), vec![Reading::new(t, 7.5)]);
    }

    #[test]
    fn merging_same_batch_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let b = batch(&[
            (datetime!(2024-01-01 00:00:00 UTC), 1.0),
            (datetime!(2024-01-01 00:15:00 UTC), 2.0),
        ]);

        store.merge_and_persist(&b).unwrap();
        let once = fs::read_to_string(store.path()).unwrap();
        store.merge_and_persist(&b).unwrap();
        let twice = fs::read_to_string(store.path()).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn disjoint_batches_commute() {
        let a = batch(&[
            (datetime!(2024-01-01 00:00:00 UTC), 1.0),
            (datetime!(2024-01-01 02:00:00 UTC), 3.0),
        ]);
        let b = batch(&[
            (datetime!(2024-01-01 01:00:00 UTC), 2.0),
            (datetime!(2024-01-01 03:00:00 UTC), 4.0),
        ]);

        let (ab, _) = merge(&merge(&[], &a).0, &b);
        let (ba, _) = merge(&merge(&[], &b).0, &a);

        assert_eq!(ab, ba);
    }

    #[test]
    fn repeated_merges_stay_unique_and_strictly_ascending() {
        let mut stored = Vec::new();
        let base = datetime!(2024-03-01 00:00:00 UTC);

        for round in 0..5i64 {
            let b = ReadingsBatch::from_readings((0..8i64).map(|i| {
                let ts = base + time::Duration::minutes(15 * (i + round * 3));
                Reading::new(ts, (round * 10 + i) as f64)
            }));
            stored = merge(&stored, &b).0;
        }

        assert!(stored.windows(2).all(|w| w[0].ts < w[1].ts));
        // 5 rounds of 8 readings shifted by 3 intervals each: 4 * 3 + 8 distinct slots.
        assert_eq!(stored.len(), 20);
    }

    #[test]
    fn stored_duplicates_collapse_on_merge() {
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let existing = vec![Reading::new(t, 1.0), Reading::new(t, 2.0)];

        let (merged, summary) = merge(&existing, &ReadingsBatch::empty());

        assert_eq!(merged, vec![Reading::new(t, 2.0)]);
        assert_eq!(summary.existing, 1);
    }

    #[test]
    fn legacy_datetime_header_and_space_separator_are_accepted() {
        let csv = "datetime,value\n2024-01-01 00:00:00-05:00,0.25\n";
        let readings = read_csv(csv.as_bytes()).unwrap();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].ts, datetime!(2024-01-01 05:00:00 UTC));
        assert_eq!(readings[0].value, 0.25);
    }

    #[test]
    fn bad_value_reports_row() {
        let csv = "timestamp,value\n2024-01-01T00:00:00Z,abc\n";
        let err = read_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, SeriesError::Value { row: 1, .. }));
    }

    #[test]
    fn failed_write_leaves_existing_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .merge_and_persist(&batch(&[(datetime!(2024-01-01 00:00:00 UTC), 1.0)]))
            .unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(store.path().with_extension("csv.tmp")).unwrap();

        let res = store.merge_and_persist(&batch(&[(datetime!(2024-01-01 00:15:00 UTC), 2.0)]));
        assert!(res.is_err());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn file_name_uses_provider_slug_and_hashed_username() {
        let name = series_file_name("Con Edison", "someone@example.com");

        assert!(name.starts_with("conedison_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "conedison_".len() + 12 + ".csv".len());
        assert_eq!(name, series_file_name("Con Edison", "someone@example.com"));
        assert_ne!(name, series_file_name("Con Edison", "other@example.com"));
    }

    #[test]
    fn export_name_uses_local_part_and_unix_seconds() {
        let at = datetime!(2024-01-01 00:00:00 UTC);

        assert_eq!(export_file_name("someone@example.com", at), "someone_1704067200.csv");
        assert_eq!(export_file_name("plain", at), "plain_1704067200.csv");
    }
}
