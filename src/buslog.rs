//! # Bus Journal Module
//!
//! Persists bus traffic events to JSONL files with rotation.
//!
//! This module handles:
//! - Recording sent, received, and dropped messages from the link workers
//! - Formatting as JSONL (JSON Lines)
//! - Writing to rotating journal files (max N records per file)
//! - Retaining only the last M files
//!
//! Recording never fails the caller: a journal write error is logged
//! and the message flow continues unaffected.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ipmb::protocol::IpmiMessage;

const JOURNAL_PREFIX: &str = "ipmb-";
const JOURNAL_SUFFIX: &str = ".jsonl";

/// One journal record
///
/// Message fields are present when the event concerns a parsed message;
/// a dropped raw frame carries only the reason.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    ts: String,
    event: &'static str,
    direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    netfn: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dest: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion_code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retries: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl JournalEntry {
    fn from_message(event: &'static str, direction: &'static str, msg: &IpmiMessage) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
            direction,
            netfn: Some(msg.netfn),
            seq: Some(msg.seq),
            cmd: Some(msg.cmd),
            src: Some(msg.src_addr),
            dest: Some(msg.dest_addr),
            completion_code: msg.completion_code,
            data_len: Some(msg.data.len()),
            retries: None,
            reason: None,
        }
    }

    /// A message written to the bus, with the retry count it took
    pub fn sent(msg: &IpmiMessage, retries: u8) -> Self {
        Self {
            retries: Some(retries),
            ..Self::from_message("sent", "tx", msg)
        }
    }

    /// A message accepted from the bus
    pub fn received(msg: &IpmiMessage) -> Self {
        Self::from_message("received", "rx", msg)
    }

    /// A parsed message discarded without delivery
    pub fn dropped_message(direction: &'static str, msg: &IpmiMessage, reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::from_message("dropped", direction, msg)
        }
    }

    /// A raw frame discarded before it parsed
    pub fn dropped_frame(direction: &'static str, reason: &str) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event: "dropped",
            direction,
            netfn: None,
            seq: None,
            cmd: None,
            src: None,
            dest: None,
            completion_code: None,
            data_len: None,
            retries: None,
            reason: Some(reason.to_string()),
        }
    }
}

struct JournalWriter {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    file: BufWriter<File>,
    records_in_file: usize,
    file_index: u64,
}

/// Rotating JSONL journal of bus traffic
///
/// Shared by both link workers behind an `Arc`; writes are serialized
/// internally.
pub struct BusJournal {
    inner: Mutex<JournalWriter>,
}

impl BusJournal {
    /// Open a journal in `dir`, creating the directory if needed
    ///
    /// The rotation index picks up after any journal files already in
    /// `dir`, so a restart keeps sorting its files behind the survivors
    /// of the previous run.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding the journal files
    /// * `max_records_per_file` - Records written before rotating
    /// * `max_files_to_keep` - Files retained after each rotation
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or the first journal file
    /// cannot be created
    pub fn create(
        dir: impl AsRef<Path>,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let file_index = next_journal_index(&dir)?;
        let file = open_journal_file(&dir, file_index)?;

        let writer = JournalWriter {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            file,
            records_in_file: 0,
            file_index,
        };
        writer.prune()?;

        Ok(Self {
            inner: Mutex::new(writer),
        })
    }

    /// Append one record, rotating first when the current file is full
    ///
    /// Never propagates failure; a write error is logged and dropped.
    pub fn record(&self, entry: JournalEntry) {
        let Ok(mut writer) = self.inner.lock() else {
            warn!("Bus journal lock poisoned, record dropped");
            return;
        };
        if let Err(e) = writer.append(&entry) {
            warn!("Bus journal write failed: {}", e);
        }
    }
}

impl JournalWriter {
    fn append(&mut self, entry: &JournalEntry) -> io::Result<()> {
        if self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file_index += 1;
        self.file = open_journal_file(&self.dir, self.file_index)?;
        self.records_in_file = 0;
        self.prune()
    }

    fn prune(&self) -> io::Result<()> {
        let mut files = journal_files(&self.dir)?;
        while files.len() > self.max_files_to_keep {
            let oldest = files.remove(0);
            debug!("Pruning old bus journal file {}", oldest.display());
            fs::remove_file(&oldest)?;
        }
        Ok(())
    }
}

/// File names sort by creation order: timestamp first, then a rotation
/// index that keeps climbing across restarts within the same second
fn open_journal_file(dir: &Path, index: u64) -> io::Result<BufWriter<File>> {
    let name = format!(
        "{}{}-{:04}{}",
        JOURNAL_PREFIX,
        Utc::now().format("%Y%m%d-%H%M%S"),
        index,
        JOURNAL_SUFFIX
    );
    let path = dir.join(name);
    debug!("Opening bus journal file {}", path.display());
    Ok(BufWriter::new(File::create(path)?))
}

/// One past the highest rotation index found in `dir`
fn next_journal_index(dir: &Path) -> io::Result<u64> {
    let next = journal_files(dir)?
        .iter()
        .filter_map(|path| journal_index(path))
        .max()
        .map_or(0, |highest| highest + 1);
    Ok(next)
}

fn journal_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(JOURNAL_SUFFIX)?;
    stem.rsplit('-').next()?.parse().ok()
}

fn journal_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(JOURNAL_PREFIX) && name.ends_with(JOURNAL_SUFFIX) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    fn sample_request(cmd: u8) -> IpmiMessage {
        IpmiMessage::request(0x20, 0x06, cmd, vec![0x01, 0x02]).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_entries_written_as_json_lines() {
        let dir = tempdir().unwrap();
        let journal = BusJournal::create(dir.path(), 100, 3).unwrap();

        journal.record(JournalEntry::sent(&sample_request(0x01), 2));
        journal.record(JournalEntry::received(&sample_request(0x02)));
        journal.record(JournalEntry::dropped_frame("rx", "bad checksum"));

        let files = journal_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);

        let lines = read_lines(&files[0]);
        assert_eq!(lines.len(), 3);

        assert_eq!(lines[0]["event"], "sent");
        assert_eq!(lines[0]["direction"], "tx");
        assert_eq!(lines[0]["netfn"], 0x06);
        assert_eq!(lines[0]["cmd"], 0x01);
        assert_eq!(lines[0]["data_len"], 2);
        assert_eq!(lines[0]["retries"], 2);

        assert_eq!(lines[1]["event"], "received");
        assert_eq!(lines[1]["direction"], "rx");
        assert!(lines[1].get("retries").is_none());

        assert_eq!(lines[2]["event"], "dropped");
        assert_eq!(lines[2]["reason"], "bad checksum");
        assert!(lines[2].get("netfn").is_none());
    }

    #[test]
    fn test_dropped_message_carries_reason_and_fields() {
        let dir = tempdir().unwrap();
        let journal = BusJournal::create(dir.path(), 100, 3).unwrap();

        journal.record(JournalEntry::dropped_message(
            "rx",
            &sample_request(0x3C),
            "duplicate",
        ));

        let files = journal_files(dir.path()).unwrap();
        let lines = read_lines(&files[0]);
        assert_eq!(lines[0]["event"], "dropped");
        assert_eq!(lines[0]["direction"], "rx");
        assert_eq!(lines[0]["cmd"], 0x3C);
        assert_eq!(lines[0]["reason"], "duplicate");
    }

    #[test]
    fn test_rotation_by_record_count() {
        let dir = tempdir().unwrap();
        let journal = BusJournal::create(dir.path(), 2, 10).unwrap();

        for cmd in 0..5 {
            journal.record(JournalEntry::sent(&sample_request(cmd), 0));
        }

        let files = journal_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(read_lines(&files[0]).len(), 2);
        assert_eq!(read_lines(&files[1]).len(), 2);
        assert_eq!(read_lines(&files[2]).len(), 1);
    }

    #[test]
    fn test_retention_prunes_oldest_files() {
        let dir = tempdir().unwrap();
        let journal = BusJournal::create(dir.path(), 1, 2).unwrap();

        for cmd in 0..5 {
            journal.record(JournalEntry::sent(&sample_request(cmd), 0));
        }

        let files = journal_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);

        // The survivors hold the most recent records
        let kept: Vec<u64> = files
            .iter()
            .map(|f| read_lines(f)[0]["cmd"].as_u64().unwrap())
            .collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn test_reopened_journal_sorts_after_survivors() {
        let dir = tempdir().unwrap();

        {
            let journal = BusJournal::create(dir.path(), 1, 2).unwrap();
            for cmd in 0..3 {
                journal.record(JournalEntry::sent(&sample_request(cmd), 0));
            }
        }

        // A restart within the same second continues the index sequence,
        // so pruning keeps taking the oldest file, never the open one
        let journal = BusJournal::create(dir.path(), 1, 2).unwrap();
        journal.record(JournalEntry::sent(&sample_request(9), 0));

        let files = journal_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        let kept: Vec<u64> = files
            .iter()
            .map(|f| read_lines(f)[0]["cmd"].as_u64().unwrap())
            .collect();
        assert_eq!(kept, vec![2, 9]);
    }

    #[test]
    fn test_timestamps_are_rfc3339() {
        let entry = JournalEntry::received(&sample_request(0x01));
        let json = serde_json::to_string(&entry).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
