//! Durable success/failure ledger.
//!
//! Two append-only tab-separated stores keyed by work item id. An id lives in
//! at most one store, at most once, even when several processes share the
//! stores. Every append locks both stores (success first, then failure),
//! catches up on rows other handles wrote since it last looked, and only then
//! checks the id. Rows are written whole with a single `write_all` and synced
//! before the call returns, so a crash can never leave a half-written row
//! behind a successful `record_*`.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Metrics, StageName};

use super::tsv;

/// Columns of the success store
pub const SUCCESS_HEADER: [&str; 8] = [
    "id",
    "reference_lineage",
    "group_count",
    "complete_pct",
    "single_pct",
    "duplicated_pct",
    "fragmented_pct",
    "missing_pct",
];

/// Columns of the failure store
pub const FAILURE_HEADER: [&str; 3] = ["id", "failed_stage", "error_message"];

/// Longest error message kept in the failure store (in chars)
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Errors raised by ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("'{0}' is already recorded in the ledger")]
    DuplicateEntry(String),

    #[error("Ledger store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Locations of the two stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    /// Success store (one row per analyzed item)
    pub success: PathBuf,

    /// Failure store (one row per failed item)
    pub failure: PathBuf,
}

impl LedgerPaths {
    pub fn new(success: impl Into<PathBuf>, failure: impl Into<PathBuf>) -> Self {
        Self {
            success: success.into(),
            failure: failure.into(),
        }
    }
}

/// A row of the success store
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessRecord {
    pub id: String,
    pub metrics: Metrics,
}

/// A row of the failure store
///
/// The stage is kept as text so rows written by older tooling still load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub id: String,
    pub stage: String,
    pub message: String,
}

/// Counts from merging a fragment ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged_successes: usize,
    pub merged_failures: usize,
    pub skipped: usize,
}

/// An open store and how far into it this handle has read
struct StoreFile {
    file: File,
    offset: u64,
}

struct LedgerState {
    known: HashSet<String>,
    success: StoreFile,
    failure: StoreFile,
}

#[derive(Clone, Copy)]
enum Store {
    Success,
    Failure,
}

/// File-backed ledger of terminal outcomes
pub struct Ledger {
    paths: LedgerPaths,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open both stores, creating them with headers if needed, and load the
    /// skip-set.
    pub fn open(paths: LedgerPaths) -> Result<Self, LedgerError> {
        let mut success = StoreFile::new(open_store(&paths.success, &SUCCESS_HEADER)?);
        let mut failure = StoreFile::new(open_store(&paths.failure, &FAILURE_HEADER)?);

        let mut known = HashSet::new();
        success.read_new_ids(&paths.success, &mut known)?;
        failure.read_new_ids(&paths.failure, &mut known)?;

        info!(
            success_store = %paths.success.display(),
            failure_store = %paths.failure.display(),
            known = known.len(),
            "Opened ledger"
        );

        Ok(Self {
            paths,
            state: Mutex::new(LedgerState {
                known,
                success,
                failure,
            }),
        })
    }

    /// Store locations
    pub fn paths(&self) -> &LedgerPaths {
        &self.paths
    }

    /// The set of recorded ids, including rows other handles have appended
    /// since this one was opened
    pub fn load(&self) -> Result<HashSet<String>, LedgerError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.success.read_new_ids(&self.paths.success, &mut state.known)?;
        state.failure.read_new_ids(&self.paths.failure, &mut state.known)?;
        Ok(state.known.clone())
    }

    /// Check if an id is recorded in either store
    pub fn contains(&self, id: &str) -> bool {
        self.state().known.contains(id)
    }

    /// Number of distinct recorded ids
    pub fn len(&self) -> usize {
        self.state().known.len()
    }

    /// Check if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a success row
    pub fn record_success(&self, id: &str, metrics: &Metrics) -> Result<(), LedgerError> {
        let line = tsv::row(&[
            id.to_string(),
            metrics.reference_lineage.clone(),
            metrics.group_count.to_string(),
            format_pct(metrics.complete_pct),
            format_pct(metrics.single_pct),
            format_pct(metrics.duplicated_pct),
            format_pct(metrics.fragmented_pct),
            format_pct(metrics.missing_pct),
        ]);
        self.append(Store::Success, id, &line)
    }

    /// Append a failure row
    pub fn record_failure(
        &self,
        id: &str,
        stage: StageName,
        message: &str,
    ) -> Result<(), LedgerError> {
        self.append_failure(id, stage.as_str(), message)
    }

    fn append_failure(&self, id: &str, stage: &str, message: &str) -> Result<(), LedgerError> {
        let line = tsv::row(&[id, stage, truncate_chars(message, MAX_MESSAGE_CHARS)]);
        self.append(Store::Failure, id, &line)
    }

    fn append(&self, store: Store, id: &str, line: &str) -> Result<(), LedgerError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let paths = &self.paths;

        // Always success before failure, so two handles cannot deadlock
        lock_store(&state.success.file, &paths.success)?;
        if let Err(e) = lock_store(&state.failure.file, &paths.failure) {
            let _ = FileExt::unlock(&state.success.file);
            return Err(e);
        }

        let appended = append_locked(state, paths, store, id, line);

        let failure_unlocked = FileExt::unlock(&state.failure.file)
            .map_err(|e| LedgerError::io(&paths.failure, e));
        let success_unlocked = FileExt::unlock(&state.success.file)
            .map_err(|e| LedgerError::io(&paths.success, e));
        appended?;
        failure_unlocked?;
        success_unlocked?;

        debug!(item = %id, "Recorded ledger row");
        Ok(())
    }

    /// Read every row of the success store
    pub fn successes(&self) -> Result<Vec<SuccessRecord>, LedgerError> {
        read_successes(&self.paths.success)
    }

    /// Read every row of the failure store
    pub fn failures(&self) -> Result<Vec<FailureRecord>, LedgerError> {
        read_failures(&self.paths.failure)
    }

    /// Append the rows of another ledger whose ids are not yet recorded.
    ///
    /// Successes are merged before failures, so an id present in both
    /// fragments keeps its success row.
    pub fn merge_from(&self, fragment: &LedgerPaths) -> Result<MergeStats, LedgerError> {
        let mut stats = MergeStats::default();

        for record in read_successes(&fragment.success)? {
            match self.record_success(&record.id, &record.metrics) {
                Ok(()) => stats.merged_successes += 1,
                Err(LedgerError::DuplicateEntry(_)) => stats.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        for record in read_failures(&fragment.failure)? {
            match self.append_failure(&record.id, &record.stage, &record.message) {
                Ok(()) => stats.merged_failures += 1,
                Err(LedgerError::DuplicateEntry(_)) => stats.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // A panic while holding the lock cannot leave a partial row in the
        // set, so the data is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Check and write one row while both stores are exclusively locked.
///
/// The id is checked against every row in either store, whoever wrote it.
fn append_locked(
    state: &mut LedgerState,
    paths: &LedgerPaths,
    store: Store,
    id: &str,
    line: &str,
) -> Result<(), LedgerError> {
    for (handle, path) in [
        (&mut state.success, &paths.success),
        (&mut state.failure, &paths.failure),
    ] {
        let tail = handle.read_new_ids(path, &mut state.known)?;
        if tail > 0 {
            // No writer holds the lock, so this is a row torn by a crash
            warn!(store = %path.display(), bytes = tail, "Discarding unterminated trailing row");
            handle.file.set_len(handle.offset).map_err(|e| LedgerError::io(path, e))?;
        }
    }

    if state.known.contains(id) {
        return Err(LedgerError::DuplicateEntry(id.to_string()));
    }

    let (handle, path) = match store {
        Store::Success => (&mut state.success, &paths.success),
        Store::Failure => (&mut state.failure, &paths.failure),
    };
    write_unlocked(&mut handle.file, path, line)?;

    state.known.insert(id.to_string());
    Ok(())
}

impl StoreFile {
    fn new(file: File) -> Self {
        Self { file, offset: 0 }
    }

    /// Add the ids of complete rows past `offset` to `known` and advance
    /// past them. Returns the length of an unterminated tail, if any.
    fn read_new_ids(&mut self, path: &Path, known: &mut HashSet<String>) -> Result<u64, LedgerError> {
        let io = |e| LedgerError::io(path, e);

        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(self.offset)).map_err(io)?;
        self.file.read_to_end(&mut bytes).map_err(io)?;

        let complete = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        let content = String::from_utf8_lossy(&bytes[..complete]);

        for (n, line) in content.lines().enumerate() {
            if n == 0 && self.offset == 0 && tsv::is_header(line) {
                continue;
            }
            if let Some(id) = row_id(line) {
                known.insert(id);
            }
        }

        self.offset += complete as u64;
        Ok((bytes.len() - complete) as u64)
    }
}

fn lock_store(file: &File, path: &Path) -> Result<(), LedgerError> {
    FileExt::lock_exclusive(file).map_err(|e| LedgerError::io(path, e))
}

/// Open a store for appending, writing the header into a new or empty file
/// and cutting off an unterminated trailing row.
fn open_store(path: &Path, header: &[&str]) -> Result<File, LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| LedgerError::io(path, e))?;

    FileExt::lock_exclusive(&file).map_err(|e| LedgerError::io(path, e))?;
    let prepared = prepare_store(&mut file, path, header);
    FileExt::unlock(&file).map_err(|e| LedgerError::io(path, e))?;
    prepared?;

    Ok(file)
}

fn prepare_store(file: &mut File, path: &Path, header: &[&str]) -> Result<(), LedgerError> {
    let io = |e| LedgerError::io(path, e);

    let mut len = file.metadata().map_err(io)?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(io)?;
        file.read_exact(&mut last).map_err(io)?;

        if last[0] != b'\n' {
            let mut content = Vec::new();
            file.seek(SeekFrom::Start(0)).map_err(io)?;
            file.read_to_end(&mut content).map_err(io)?;

            let keep = content
                .iter()
                .rposition(|&b| b == b'\n')
                .map(|p| p + 1)
                .unwrap_or(0);
            warn!(
                store = %path.display(),
                fragment = %String::from_utf8_lossy(&content[keep..]),
                "Discarding unterminated trailing row"
            );
            file.set_len(keep as u64).map_err(io)?;
            len = keep as u64;
        }
    }

    if len == 0 {
        write_unlocked(file, path, &tsv::row(header))?;
    }

    Ok(())
}

fn write_unlocked(file: &mut File, path: &Path, line: &str) -> Result<(), LedgerError> {
    file.write_all(line.as_bytes())
        .and_then(|_| file.sync_data())
        .map_err(|e| LedgerError::io(path, e))
}

/// Read the complete data rows of a store (missing store = no rows)
fn read_rows(path: &Path) -> Result<Vec<String>, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    let content = String::from_utf8_lossy(&bytes);

    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.last().is_some_and(|l| !l.ends_with('\n')) {
        // Another writer is mid-row, or the file was torn; not a fact yet
        lines.pop();
    }
    if lines.first().is_some_and(|l| tsv::is_header(l)) {
        lines.remove(0);
    }

    Ok(lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
        .collect())
}

fn row_id(row: &str) -> Option<String> {
    tsv::fields(row)
        .first()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Read a success store without opening it for writing
pub fn read_successes(path: &Path) -> Result<Vec<SuccessRecord>, LedgerError> {
    let mut records = Vec::new();
    for row in read_rows(path)? {
        match parse_success(&row) {
            Some(record) => records.push(record),
            None => warn!(store = %path.display(), %row, "Skipping malformed success row"),
        }
    }
    Ok(records)
}

fn parse_success(row: &str) -> Option<SuccessRecord> {
    let f = tsv::fields(row);
    if f.len() < SUCCESS_HEADER.len() || f[0].trim().is_empty() {
        return None;
    }
    let pct = |i: usize| f[i].trim().parse::<f64>().ok();

    Some(SuccessRecord {
        id: f[0].trim().to_string(),
        metrics: Metrics {
            reference_lineage: f[1].trim().to_string(),
            group_count: f[2].trim().parse().ok()?,
            complete_pct: pct(3)?,
            single_pct: pct(4)?,
            duplicated_pct: pct(5)?,
            fragmented_pct: pct(6)?,
            missing_pct: pct(7)?,
        },
    })
}

/// Read a failure store without opening it for writing
pub fn read_failures(path: &Path) -> Result<Vec<FailureRecord>, LedgerError> {
    Ok(read_rows(path)?
        .iter()
        .filter_map(|row| {
            let f = tsv::fields(row);
            let id = f.first()?.trim();
            if id.is_empty() {
                return None;
            }
            Some(FailureRecord {
                id: id.to_string(),
                stage: f.get(1).map(|s| s.trim()).unwrap_or_default().to_string(),
                message: f.get(2).copied().unwrap_or_default().to_string(),
            })
        })
        .collect())
}

fn format_pct(value: f64) -> String {
    format!("{:.1}", value)
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics() -> Metrics {
        Metrics {
            reference_lineage: "eukaryota_odb12".to_string(),
            group_count: 129,
            complete_pct: 95.3,
            single_pct: 93.0,
            duplicated_pct: 2.3,
            fragmented_pct: 1.6,
            missing_pct: 3.1,
        }
    }

    fn paths(temp: &TempDir) -> LedgerPaths {
        LedgerPaths::new(
            temp.path().join("success.tsv"),
            temp.path().join("failure.tsv"),
        )
    }

    #[test]
    fn test_open_creates_stores_with_headers() {
        let temp = TempDir::new().unwrap();
        let paths = LedgerPaths::new(
            temp.path().join("nested/success.tsv"),
            temp.path().join("nested/failure.tsv"),
        );

        let ledger = Ledger::open(paths.clone()).unwrap();
        assert!(ledger.is_empty());

        assert_eq!(
            fs::read_to_string(&paths.success).unwrap(),
            SUCCESS_HEADER.join("\t") + "\n"
        );
        assert_eq!(
            fs::read_to_string(&paths.failure).unwrap(),
            "id\tfailed_stage\terror_message\n"
        );
    }

    #[test]
    fn test_record_and_reopen() {
        let temp = TempDir::new().unwrap();

        let ledger = Ledger::open(paths(&temp)).unwrap();
        ledger.record_success("A", &metrics()).unwrap();
        ledger
            .record_failure("B", StageName::Decompress, "bad format")
            .unwrap();
        assert!(ledger.contains("A"));
        assert!(ledger.contains("B"));
        drop(ledger);

        let reopened = Ledger::open(paths(&temp)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("A") && reopened.contains("B"));

        let successes = reopened.successes().unwrap();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].metrics, metrics());

        let failures = reopened.failures().unwrap();
        assert_eq!(
            failures,
            vec![FailureRecord {
                id: "B".to_string(),
                stage: "decompress".to_string(),
                message: "bad format".to_string(),
            }]
        );
    }

    #[test]
    fn test_duplicate_guard_spans_both_stores() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(paths(&temp)).unwrap();

        ledger.record_success("A", &metrics()).unwrap();
        assert!(matches!(
            ledger.record_failure("A", StageName::Analyze, "late failure"),
            Err(LedgerError::DuplicateEntry(id)) if id == "A"
        ));
        assert!(matches!(
            ledger.record_success("A", &metrics()),
            Err(LedgerError::DuplicateEntry(_))
        ));

        assert_eq!(ledger.successes().unwrap().len(), 1);
        assert!(ledger.failures().unwrap().is_empty());
    }

    #[test]
    fn test_load_tolerates_header_only_and_headerless_stores() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        fs::write(&paths.success, SUCCESS_HEADER.join("\t") + "\n").unwrap();
        // Headerless rows, as written by the oldest scripts
        fs::write(&paths.failure, "X\tdownload\tHTTP 404\nY\tanalyze\texit 1\n").unwrap();

        let ledger = Ledger::open(paths).unwrap();
        let ids = ledger.load().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("X") && ids.contains("Y"));
    }

    #[test]
    fn test_torn_tail_is_discarded_on_open() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        fs::write(&paths.failure, "id\tfailed_stage\terror_message\nA\tdownload\tHTTP 500\nB\tnorm").unwrap();

        let ledger = Ledger::open(paths.clone()).unwrap();
        assert!(ledger.contains("A"));
        assert!(!ledger.contains("B"));

        ledger.record_failure("B", StageName::Normalize, "exit 2").unwrap();
        assert_eq!(
            fs::read_to_string(&paths.failure).unwrap(),
            "id\tfailed_stage\terror_message\nA\tdownload\tHTTP 500\nB\tnormalize\texit 2\n"
        );
    }

    #[test]
    fn test_failure_message_is_sanitized_and_truncated() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(paths(&temp)).unwrap();

        let long = format!("line one\nline\ttwo {}", "é".repeat(3000));
        ledger.record_failure("A", StageName::Analyze, &long).unwrap();

        let failures = ledger.failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.starts_with("line one line two "));
        assert_eq!(failures[0].message.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_merge_skips_known_ids() {
        let temp = TempDir::new().unwrap();
        let main = Ledger::open(paths(&temp)).unwrap();
        main.record_success("A", &metrics()).unwrap();

        let fragment_dir = TempDir::new().unwrap();
        let fragment_paths = paths(&fragment_dir);
        let fragment = Ledger::open(fragment_paths.clone()).unwrap();
        fragment.record_success("A", &metrics()).unwrap();
        fragment.record_success("C", &metrics()).unwrap();
        fragment
            .record_failure("D", StageName::Download, "HTTP 404")
            .unwrap();

        let stats = main.merge_from(&fragment_paths).unwrap();
        assert_eq!(
            stats,
            MergeStats {
                merged_successes: 1,
                merged_failures: 1,
                skipped: 1,
            }
        );
        assert_eq!(main.len(), 3);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
