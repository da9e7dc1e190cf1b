//! # Run History Store
//!
//! Bounded per-cohort run history. One JSON document per output directory:
//!
//! ```text
//! { "<stage>:<item>": [ RunRecord, ... ] }
//! ```
//!
//! Each key keeps at most `max_runs_per_item` records, oldest first.
//!
//! Records are read one at a time: a record that does not parse is skipped
//! on load and carried through verbatim on save, so one bad entry never costs
//! the rest of the document.
//!
//! ## Concurrency
//! The read-modify-write in [`RunHistoryStore::try_save`] runs under an
//! advisory lock file (`<log>.lock`, created with `create_new`). The new
//! document is written to a temp file, synced, then renamed over the old one,
//! so readers never observe a torn write.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::GovernanceError;

/// Default history document name inside the output directory.
pub const DEFAULT_LOG_FILE: &str = "reproducibility_log.json";

/// Keys a metric may not shadow in a flattened record.
const RESERVED_KEYS: [&str; 4] = ["timestamp", "stage", "item_name", "additional_data"];

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// Configuration
// =============================================================================

/// History store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// History document name, relative to the output directory
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Records retained per (stage, item) key
    #[serde(default = "default_max_runs_per_item")]
    pub max_runs_per_item: usize,

    /// How long a writer waits for the lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Lock files older than this are assumed abandoned and broken
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_file_name() -> String {
    DEFAULT_LOG_FILE.to_string()
}
fn default_max_runs_per_item() -> usize {
    10
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_stale_lock_secs() -> u64 {
    300
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
            max_runs_per_item: default_max_runs_per_item(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Scalar metric value as stored in a flattened record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl MetricValue {
    /// Numeric view. Booleans count as 1/0; text and null have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(_) | MetricValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{}", b),
            MetricValue::Number(v) => write!(f, "{}", v),
            MetricValue::Text(s) => write!(f, "{:?}", s),
            MetricValue::Null => write!(f, "null"),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Metric summary of one run.
pub type Metrics = BTreeMap<String, MetricValue>;

/// One persisted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// RFC 3339 on write; naive ISO timestamps are read as UTC
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub item_name: String,

    /// Metrics, flattened into the record object
    #[serde(flatten)]
    pub metrics: Metrics,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<serde_json::Value>,
}

impl RunRecord {
    pub fn new(stage: &str, item_name: &str, metrics: &Metrics) -> Self {
        let metrics = metrics
            .iter()
            .filter(|(k, _)| {
                let reserved = RESERVED_KEYS.contains(&k.as_str());
                if reserved {
                    warn!(metric = %k, "Metric name collides with a record field, dropped");
                }
                !reserved
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            item_name: item_name.to_string(),
            metrics,
            additional_data: None,
        }
    }

    pub fn with_additional_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.additional_data = data;
        self
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    /// Numeric metric, 0.0 when absent or non-numeric.
    pub fn metric_or_zero(&self, name: &str) -> f64 {
        self.metric(name).and_then(MetricValue::as_f64).unwrap_or(0.0)
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp {:?}", raw)))
}

/// History key for a (stage, item) pair.
pub fn history_key(stage: &str, item_name: &str) -> String {
    format!("{}:{}", stage, item_name)
}

/// Ordered run history of one cohort, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortHistory {
    pub key: String,
    pub records: Vec<RunRecord>,
}

impl CohortHistory {
    pub fn new(key: impl Into<String>, records: Vec<RunRecord>) -> Self {
        Self {
            key: key.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&RunRecord> {
        self.records.last()
    }

    /// The last `n` records, oldest first.
    pub fn tail(&self, n: usize) -> &[RunRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    /// `true` if any record carries `metric`, null included.
    pub fn has_metric(&self, metric: &str) -> bool {
        self.records.iter().any(|r| r.metrics.contains_key(metric))
    }
}

// =============================================================================
// Store
// =============================================================================

/// History document as stored, records left unparsed.
type RawDocument = Map<String, Value>;

/// Parse the records of one key, skipping any that do not deserialize.
fn parse_runs(key: &str, runs: Value) -> Vec<RunRecord> {
    let Value::Array(runs) = runs else {
        warn!(key = %key, "History entry is not a list, skipped");
        return Vec::new();
    };
    runs.into_iter()
        .enumerate()
        .filter_map(|(index, run)| match serde_json::from_value(run) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %key, index, error = %e, "Skipping unreadable history record");
                None
            }
        })
        .collect()
}

/// Persistent run history rooted at one output directory.
#[derive(Debug, Clone)]
pub struct RunHistoryStore {
    log_file: PathBuf,
    max_runs_per_item: usize,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl RunHistoryStore {
    /// Store with default configuration.
    pub fn open(output_dir: impl AsRef<Path>) -> Self {
        Self::with_config(output_dir, &HistoryConfig::default())
    }

    pub fn with_config(output_dir: impl AsRef<Path>, config: &HistoryConfig) -> Self {
        if config.max_runs_per_item == 0 {
            warn!("max_runs_per_item = 0 would discard every run, keeping 1");
        }
        Self {
            log_file: output_dir.as_ref().join(&config.file_name),
            max_runs_per_item: config.max_runs_per_item.max(1),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            stale_lock_age: Duration::from_secs(config.stale_lock_secs),
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn max_runs_per_item(&self) -> usize {
        self.max_runs_per_item
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.log_file.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Read the document without interpreting its records.
    fn read_raw(&self) -> Result<RawDocument, GovernanceError> {
        match fs::read_to_string(&self.log_file) {
            Ok(content) if content.trim().is_empty() => Ok(RawDocument::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RawDocument::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the whole document. A missing file is an empty history; records
    /// that do not parse are skipped.
    pub fn try_load_all(&self) -> Result<BTreeMap<String, Vec<RunRecord>>, GovernanceError> {
        Ok(self
            .read_raw()?
            .into_iter()
            .map(|(key, runs)| {
                let records = parse_runs(&key, runs);
                (key, records)
            })
            .collect())
    }

    /// Read the whole document. Unreadable or corrupt history is treated as empty.
    pub fn load_all(&self) -> BTreeMap<String, Vec<RunRecord>> {
        self.try_load_all().unwrap_or_else(|e| {
            warn!(path = ?self.log_file, error = %e, "Run history unreadable, treating as empty");
            BTreeMap::new()
        })
    }

    /// Ordered history for one (stage, item) cohort.
    pub fn load_cohort(&self, stage: &str, item_name: &str) -> CohortHistory {
        let key = history_key(stage, item_name);
        let records = match self.read_raw() {
            Ok(mut document) => document
                .remove(&key)
                .map(|runs| parse_runs(&key, runs))
                .unwrap_or_default(),
            Err(e) => {
                warn!(
                    path = ?self.log_file,
                    error = %e,
                    "Run history unreadable, treating as empty"
                );
                Vec::new()
            }
        };
        CohortHistory::new(key, records)
    }

    /// Most recent record for (stage, item), if any.
    pub fn load_previous(&self, stage: &str, item_name: &str) -> Option<RunRecord> {
        self.load_cohort(stage, item_name).records.pop()
    }

    /// Append a run, truncate the key to the last `max_runs_per_item`, persist.
    ///
    /// Other keys, and records this version cannot parse, are written back
    /// unchanged.
    pub fn try_save(
        &self,
        stage: &str,
        item_name: &str,
        metrics: &Metrics,
        additional_data: Option<serde_json::Value>,
    ) -> Result<RunRecord, GovernanceError> {
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let _lock =
            HistoryLock::acquire(&self.lock_path(), self.lock_timeout, self.stale_lock_age)?;

        let mut document = match self.read_raw() {
            Ok(document) => document,
            Err(GovernanceError::Json(e)) => {
                warn!(path = ?self.log_file, error = %e, "Run history corrupt, starting a new one");
                RawDocument::new()
            }
            Err(e) => return Err(e),
        };

        let record =
            RunRecord::new(stage, item_name, metrics).with_additional_data(additional_data);
        let key = history_key(stage, item_name);
        let mut runs = match document.remove(&key) {
            Some(Value::Array(runs)) => runs,
            Some(_) => {
                warn!(key = %key, "History entry is not a list, replacing it");
                Vec::new()
            }
            None => Vec::new(),
        };
        runs.push(serde_json::to_value(&record)?);
        if runs.len() > self.max_runs_per_item {
            let excess = runs.len() - self.max_runs_per_item;
            runs.drain(..excess);
        }
        let retained = runs.len();
        document.insert(key.clone(), Value::Array(runs));

        let json = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.log_file, &json)?;

        debug!(key = %key, retained, path = ?self.log_file, "Run history saved");
        Ok(record)
    }

    /// Best-effort [`try_save`](Self::try_save): failures are logged, never raised.
    pub fn save(
        &self,
        stage: &str,
        item_name: &str,
        metrics: &Metrics,
        additional_data: Option<serde_json::Value>,
    ) -> Option<RunRecord> {
        match self.try_save(stage, item_name, metrics, additional_data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    stage = %stage,
                    item = %item_name,
                    path = ?self.log_file,
                    error = %e,
                    "Failed to persist run history"
                );
                None
            }
        }
    }
}

// =============================================================================
// Persistence helpers
// =============================================================================

/// Write bytes via temp file + fsync + rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(format!(".tmp-{}", std::process::id()));
    let temp_path = PathBuf::from(temp_name);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Advisory lock held for the duration of one read-modify-write.
///
/// The lock file carries an owner token. Only the owner removes it on drop,
/// and a stale lock is only broken if it still holds the token that was
/// judged stale.
struct HistoryLock {
    path: PathBuf,
    token: String,
}

impl HistoryLock {
    fn acquire(
        path: &Path,
        timeout: Duration,
        stale_age: Duration,
    ) -> Result<Self, GovernanceError> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let token = lock_token();
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = fs::remove_file(path);
                        return Err(e.into());
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_age(path).is_some_and(|age| age > stale_age) {
                        let broken = fs::read_to_string(path).is_ok_and(|stale| {
                            let removed = remove_if_owned(path, &stale);
                            if removed {
                                info!(path = ?path, holder = %stale.trim(), "Broke stale lock");
                            }
                            removed
                        });
                        if broken {
                            continue;
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(GovernanceError::LockTimeout(path.to_path_buf()));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        if !remove_if_owned(&self.path, &self.token) {
            warn!(path = ?self.path, "History lock changed hands, left in place");
        }
    }
}

fn lock_token() -> String {
    format!(
        "pid={} seq={} at={}",
        std::process::id(),
        LOCK_SEQ.fetch_add(1, Ordering::Relaxed),
        Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// Remove the lock file only if it still holds `token`.
fn remove_if_owned(path: &Path, token: &str) -> bool {
    match fs::read_to_string(path) {
        Ok(current) if current == token => fs::remove_file(path).is_ok(),
        _ => false,
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| (k.to_string(), MetricValue::from(*v))).collect()
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        assert!(store.load_all().is_empty());
        assert!(store.load_previous("stage", "item").is_none());
    }

    #[test]
    fn test_save_then_load_previous() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        let saved = store
            .try_save("ranking", "fwd_ret_60m", &metrics(&[("mean_score", 0.75)]), None)
            .unwrap();

        let previous = store.load_previous("ranking", "fwd_ret_60m").unwrap();
        assert_eq!(previous, saved);
        assert_eq!(previous.metric_or_zero("mean_score"), 0.75);
        assert!(store.load_previous("ranking", "other").is_none());
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_truncates_to_max_runs_oldest_first() {
        let dir = tempdir().unwrap();
        let config = HistoryConfig {
            max_runs_per_item: 10,
            ..Default::default()
        };
        let store = RunHistoryStore::with_config(dir.path(), &config);
        for i in 0..15 {
            store.try_save("s", "i", &metrics(&[("run", i as f64)]), None).unwrap();
        }

        let cohort = store.load_cohort("s", "i");
        let runs: Vec<f64> = cohort.records.iter().map(|r| r.metric_or_zero("run")).collect();
        assert_eq!(runs, (5..15).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_record_layout_is_flat() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        let mut m = metrics(&[("mean_score", 0.5)]);
        m.insert("route_changed".into(), true.into());
        m.insert("stage".into(), "shadow".into());
        store
            .try_save("s", "i", &m, Some(serde_json::json!({"n_features": 42})))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.log_file()).unwrap()).unwrap();
        let record = &raw["s:i"][0];
        assert_eq!(record["stage"], "s");
        assert_eq!(record["item_name"], "i");
        assert_eq!(record["mean_score"], 0.5);
        assert_eq!(record["route_changed"], true);
        assert_eq!(record["additional_data"]["n_features"], 42);
        assert!(record["timestamp"].is_string());
    }

    #[test]
    fn test_corrupt_history_treated_as_empty() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        fs::write(store.log_file(), "{not json").unwrap();

        assert!(store.try_load_all().is_err());
        assert!(store.load_all().is_empty());

        store.try_save("s", "i", &metrics(&[("x", 1.0)]), None).unwrap();
        assert_eq!(store.load_cohort("s", "i").len(), 1);
    }

    #[test]
    fn test_null_metrics_load() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        fs::write(
            store.log_file(),
            r#"{"s:i": [{
                "timestamp": "2025-01-01T00:00:00Z",
                "stage": "s",
                "item_name": "i",
                "jaccard_topK": null
            }]}"#,
        )
        .unwrap();
        let previous = store.load_previous("s", "i").unwrap();
        assert!(previous.metric("jaccard_topK").unwrap().is_null());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let utc = parse_timestamp("2025-01-01T00:00:00Z").unwrap();
        assert_eq!(parse_timestamp("2025-01-01T00:00:00").unwrap(), utc);
        assert_eq!(parse_timestamp("2025-01-01 00:00:00").unwrap(), utc);
        assert_eq!(parse_timestamp("2025-01-01T01:00:00+01:00").unwrap(), utc);
        let micros = parse_timestamp("2025-01-01T00:00:00.123456").unwrap();
        assert_eq!(micros.timestamp_subsec_micros(), 123_456);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_foreign_records_survive_save() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        fs::write(
            store.log_file(),
            r#"{
  "ranking:a": [
    {"timestamp": "2025-01-01T00:00:00.123456", "stage": "ranking", "item_name": "a",
     "mean_score": 0.7}
  ],
  "ranking:b": [
    {"stage": "ranking", "item_name": "b", "mean_score": 0.1},
    {"timestamp": "2025-01-02T00:00:00", "stage": "ranking", "item_name": "b", "mean_score": 0.2}
  ]
}"#,
        )
        .unwrap();

        // Naive timestamps load; the record without one is skipped.
        let previous = store.load_previous("ranking", "a").unwrap();
        assert_eq!(previous.metric_or_zero("mean_score"), 0.7);
        assert_eq!(store.load_cohort("ranking", "b").len(), 1);
        assert_eq!(store.try_load_all().unwrap().len(), 2);

        store
            .try_save("ranking", "c", &metrics(&[("mean_score", 0.5)]), None)
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.log_file()).unwrap()).unwrap();
        let keys: Vec<&str> = raw.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ranking:a", "ranking:b", "ranking:c"]);
        assert_eq!(raw["ranking:a"][0]["timestamp"], "2025-01-01T00:00:00.123456");
        assert_eq!(raw["ranking:b"].as_array().unwrap().len(), 2);
        assert!(raw["ranking:b"][0].get("timestamp").is_none());
        assert!(store.load_previous("ranking", "a").is_some());
    }

    #[test]
    fn test_save_keeps_unreadable_records_of_same_key() {
        let dir = tempdir().unwrap();
        let store = RunHistoryStore::open(dir.path());
        fs::write(
            store.log_file(),
            r#"{"s:i": [{"stage": "s", "item_name": "i", "x": 1.0}]}"#,
        )
        .unwrap();

        store.try_save("s", "i", &metrics(&[("x", 2.0)]), None).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.log_file()).unwrap()).unwrap();
        assert_eq!(raw["s:i"].as_array().unwrap().len(), 2);
        assert_eq!(store.load_cohort("s", "i").len(), 1);
    }

    #[test]
    fn test_lock_released_only_by_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.lock");
        let lock = HistoryLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(300))
            .unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("pid="));

        // Another writer has taken the lock over.
        fs::write(&path, "pid=0 seq=0 at=elsewhere").unwrap();
        drop(lock);
        assert!(path.exists());

        assert!(!remove_if_owned(&path, "pid=1 seq=1 at=other"));
        assert!(remove_if_owned(&path, "pid=0 seq=0 at=elsewhere"));
        assert!(!path.exists());
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = tempdir().unwrap();
        let config = HistoryConfig {
            lock_timeout_ms: 50,
            ..Default::default()
        };
        let store = RunHistoryStore::with_config(dir.path(), &config);
        fs::write(store.lock_path(), "held").unwrap();

        let result = store.try_save("s", "i", &metrics(&[("x", 1.0)]), None);
        assert!(matches!(result, Err(GovernanceError::LockTimeout(_))));
        assert!(store.save("s", "i", &metrics(&[("x", 1.0)]), None).is_none());
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempdir().unwrap();
        let config = HistoryConfig {
            lock_timeout_ms: 50,
            stale_lock_secs: 0,
            ..Default::default()
        };
        let store = RunHistoryStore::with_config(dir.path(), &config);
        fs::write(store.lock_path(), "abandoned").unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(store.try_save("s", "i", &metrics(&[("x", 1.0)]), None).is_ok());
        assert!(!store.lock_path().exists());
    }
}
