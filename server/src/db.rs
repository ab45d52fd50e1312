//! Config databases.
//!
//! A [`ConfigDb`] is a pluggable sink for accepted mutations that can be
//! replayed at startup to seed the router. It is a [`Handler`], so wiring
//! it into a router keeps it fed; because the db deduplicates through its
//! own store, replaying the router's notifications is idempotent.
//!
//! [`AofDb`] persists as an append-only file of framed JSON lines:
//!
//! ```text
//! <magic8><crc32-hex8><kind>{json}\n
//! ```
//!
//! where `kind` is `n` for a config and `t` for a tombstone, and the CRC32
//! covers the JSON body. Corrupted lines are skipped and reported; loading
//! continues past them.

use beacon_engine::{Config, Store, Tombstone};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::reporter::{LogReporter, Reporter};
use crate::router::Handler;

/// Leading tag of every AOF line.
pub const AOF_MAGIC: &str = "e74e1902";

// magic + crc + kind byte + "{}" + newline
const MIN_LINE_LEN: usize = AOF_MAGIC.len() + 8 + 1 + 2 + 1;

/// Errors from config databases.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted aof line {line}: {reason}")]
    CorruptLine { line: usize, reason: String },
}

/// Result of loading a database.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// The merged contents of the database
    pub store: Store,
    /// Whether any corrupted entries were skipped while loading
    pub corrupted: bool,
}

/// A persistence sink for config mutations.
pub trait ConfigDb: Handler {
    /// The current contents of the database.
    fn load(&self) -> Result<LoadReport, DbError>;

    /// Flush pending writes and release the database.
    fn close(&self) -> Result<(), DbError>;
}

/// A database that persists nothing.
#[derive(Debug, Default)]
pub struct NullDb;

impl Handler for NullDb {
    fn new_config(&self, _config: &Arc<Config>) {}
    fn dead_config(&self, _tombstone: &Arc<Tombstone>) {}
}

impl ConfigDb for NullDb {
    fn load(&self) -> Result<LoadReport, DbError> {
        Ok(LoadReport {
            store: Store::new(),
            corrupted: false,
        })
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// An in-memory database, not persisted anywhere.
#[derive(Debug, Default)]
pub struct MemoryDb {
    state: Mutex<Store>,
}

impl Handler for MemoryDb {
    fn new_config(&self, config: &Arc<Config>) {
        self.state.lock().unwrap().insert_config(Arc::clone(config));
    }

    fn dead_config(&self, tombstone: &Arc<Tombstone>) {
        self.state
            .lock()
            .unwrap()
            .insert_tombstone(Arc::clone(tombstone));
    }
}

impl ConfigDb for MemoryDb {
    fn load(&self) -> Result<LoadReport, DbError> {
        Ok(LoadReport {
            store: self.state.lock().unwrap().clone(),
            corrupted: false,
        })
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

struct AofInner {
    writer: BufWriter<File>,
    store: Store,
    corrupted: bool,
}

/// Append-only-file database.
pub struct AofDb {
    inner: Mutex<AofInner>,
    reporter: Arc<dyn Reporter>,
}

impl AofDb {
    /// Open or create the database at `path` and load its contents,
    /// reporting corruption through a [`LogReporter`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with_reporter(path, Arc::new(LogReporter))
    }

    /// Open or create the database at `path` and load its contents.
    pub fn open_with_reporter(
        path: impl AsRef<Path>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, DbError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut store = Store::new();
        let mut corrupted = false;

        let mut reader = BufReader::new(&file);
        let mut line = Vec::new();
        let mut line_no = 0usize;

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            // A partial trailing line (no newline) is an interrupted write;
            // it carries no accepted mutation, so drop it silently.
            if line.last() != Some(&b'\n') {
                break;
            }

            line_no += 1;
            match parse_line(&line) {
                Ok((b'n', body)) => match serde_json::from_slice::<Config>(body) {
                    Ok(config) => {
                        store.insert_config(Arc::new(config));
                    }
                    Err(err) => {
                        report_corrupt(reporter.as_ref(), line_no, err.to_string());
                        corrupted = true;
                    }
                },
                Ok((b't', body)) => match serde_json::from_slice::<Tombstone>(body) {
                    Ok(tombstone) => {
                        store.insert_tombstone(Arc::new(tombstone));
                    }
                    Err(err) => {
                        report_corrupt(reporter.as_ref(), line_no, err.to_string());
                        corrupted = true;
                    }
                },
                Ok((kind, _)) => {
                    report_corrupt(
                        reporter.as_ref(),
                        line_no,
                        format!("unknown record kind '{}'", kind as char),
                    );
                    corrupted = true;
                }
                Err(reason) => {
                    report_corrupt(reporter.as_ref(), line_no, reason);
                    corrupted = true;
                }
            }
        }

        drop(reader);

        Ok(Self {
            inner: Mutex::new(AofInner {
                writer: BufWriter::new(file),
                store,
                corrupted,
            }),
            reporter,
        })
    }

    fn append<T: Serialize>(inner: &mut AofInner, kind: u8, record: &T) -> Result<(), DbError> {
        let body = serde_json::to_string(record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let crc = crc32fast::hash(body.as_bytes());

        writeln!(inner.writer, "{AOF_MAGIC}{crc:08x}{}{body}", kind as char)?;
        inner.writer.flush()?;
        Ok(())
    }

    fn report_write_error<T: Serialize>(&self, err: DbError, record: &T) {
        let context = serde_json::to_value(record).ok();
        self.reporter.error("aof", &err, context.as_ref());
    }
}

impl Handler for AofDb {
    fn new_config(&self, config: &Arc<Config>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.store.insert_config(Arc::clone(config)).is_new {
            return;
        }

        if let Err(err) = Self::append(&mut inner, b'n', config.as_ref()) {
            drop(inner);
            self.report_write_error(err, config.as_ref());
        }
    }

    fn dead_config(&self, tombstone: &Arc<Tombstone>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.store.insert_tombstone(Arc::clone(tombstone)).is_new {
            return;
        }

        if let Err(err) = Self::append(&mut inner, b't', tombstone.as_ref()) {
            drop(inner);
            self.report_write_error(err, tombstone.as_ref());
        }
    }
}

impl ConfigDb for AofDb {
    fn load(&self) -> Result<LoadReport, DbError> {
        let inner = self.inner.lock().unwrap();
        Ok(LoadReport {
            store: inner.store.clone(),
            corrupted: inner.corrupted,
        })
    }

    fn close(&self) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn report_corrupt(reporter: &dyn Reporter, line: usize, reason: String) {
    reporter.error("aof", &DbError::CorruptLine { line, reason }, None);
}

// Split a framed line into its kind byte and JSON body, verifying the
// magic and the checksum. `line` includes the trailing newline.
fn parse_line(line: &[u8]) -> Result<(u8, &[u8]), String> {
    if line.len() < MIN_LINE_LEN {
        return Err("truncated line".to_owned());
    }

    let magic = &line[..AOF_MAGIC.len()];
    if magic != AOF_MAGIC.as_bytes() {
        return Err(format!(
            "invalid magic: {}",
            String::from_utf8_lossy(magic)
        ));
    }

    let crc_hex = std::str::from_utf8(&line[8..16]).map_err(|_| "unreadable crc".to_owned())?;
    let crc = u32::from_str_radix(crc_hex, 16).map_err(|err| format!("unreadable crc: {err}"))?;

    let kind = line[16];
    let body = &line[17..line.len() - 1];

    let actual = crc32fast::hash(body);
    if actual != crc {
        return Err(format!("crc mismatch: {actual:08x} != {crc:08x}"));
    }

    Ok((kind, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn line_round_trip() {
        let config = Config::new("t", "a", 1, json!({"k": "v"}));
        let body = serde_json::to_string(&config).unwrap();
        let crc = crc32fast::hash(body.as_bytes());
        let line = format!("{AOF_MAGIC}{crc:08x}n{body}\n");

        let (kind, parsed_body) = parse_line(line.as_bytes()).unwrap();
        assert_eq!(kind, b'n');
        assert_eq!(parsed_body, body.as_bytes());
    }

    #[test]
    fn parse_rejects_bad_frames() {
        assert!(parse_line(b"short\n").is_err());
        assert!(parse_line(b"deadbeef00000000n{}\n").is_err()); // wrong magic

        // Valid magic, wrong checksum.
        let line = format!("{AOF_MAGIC}00000000n{{}}\n");
        assert!(parse_line(line.as_bytes()).unwrap_err().contains("crc"));
    }

    #[test]
    fn memory_db_round_trip() {
        let db = MemoryDb::default();
        db.new_config(&Arc::new(Config::new("t", "a", 1, json!(null))));
        db.new_config(&Arc::new(Config::new("t", "b", 1, json!(null))));
        db.dead_config(&Arc::new(Tombstone::new("t", "a", 2)));

        let report = db.load().unwrap();
        assert!(!report.corrupted);
        assert_eq!(report.store.len(), 2);
        assert!(!report.store.get("t", "a").unwrap().is_live());
        assert!(report.store.get("t", "b").unwrap().is_live());
    }
}
