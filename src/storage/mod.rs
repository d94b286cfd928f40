//! File-per-message store with an at-most-once put guarantee.
//!
//! Each message lives in its own text file of labeled lines. Two formats
//! exist on disk: the legacy single-timestamp form (`Time:` holds local
//! time) and the current dual-timestamp form (`Time:` holds UTC, with an
//! extra `LocalTime:` line). Both decode into one canonical
//! [`StoredRecord`]; all new outgoing writes use the dual form.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::timefmt;

/// `From:` value used for outgoing records. The device's own number is
/// never queried; outbound threads are keyed on the recipient, so this
/// placeholder is preserved as-is from observed device behavior.
pub const DEVICE_PLACEHOLDER_NUMBER: &str = "+1234567890";

const INCOMING_PREFIX: &str = "sms_";
const OUTGOING_PREFIX: &str = "sms_out_";
const RECORD_SUFFIX: &str = ".txt";

/// Whether a record was received by or sent from this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Outcome of a `put`: duplicates are an expected, non-error result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

/// Canonical in-memory message record, shared by both on-disk formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub direction: Direction,
    pub sender: String,
    /// Present only on outgoing records; its presence on disk is what
    /// marks a record outgoing.
    pub recipient: Option<String>,
    pub local_time: String,
    pub utc_time: String,
    pub status: String,
    pub content: String,
}

impl StoredRecord {
    pub fn incoming(sender: &str, local_time: &str, status: &str, content: &str) -> Self {
        Self {
            direction: Direction::Incoming,
            sender: sender.to_string(),
            recipient: None,
            local_time: local_time.to_string(),
            utc_time: timefmt::to_utc(local_time),
            status: status.to_string(),
            content: content.to_string(),
        }
    }

    pub fn outgoing(recipient: &str, local_time: &str, content: &str) -> Self {
        Self {
            direction: Direction::Outgoing,
            sender: DEVICE_PLACEHOLDER_NUMBER.to_string(),
            recipient: Some(recipient.to_string()),
            local_time: local_time.to_string(),
            utc_time: timefmt::to_utc(local_time),
            status: "SENT".to_string(),
            content: content.to_string(),
        }
    }

    /// The phone number a thread for this record is keyed on: recipient
    /// when outgoing, sender when incoming.
    pub fn counterpart(&self) -> &str {
        match &self.recipient {
            Some(recipient) => recipient,
            None => &self.sender,
        }
    }

    /// Decimal-weighted UTC value for chronological sorting. Zero means
    /// the timestamp was unparseable; callers sort those last.
    pub fn sort_key(&self) -> u64 {
        timefmt::sortable_value(&self.utc_time)
    }
}

/// Directory-backed store. One file per record, never overwritten.
#[derive(Debug)]
pub struct MessageStore {
    root: PathBuf,
    next_outgoing_seq: u64,
}

impl MessageStore {
    /// Open (and create if missing) the store directory. The outgoing
    /// sequence counter resumes past the highest existing file so a
    /// restart never reuses a name.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating message store at {}", root.display()))?;

        let mut highest = 0u64;
        let mut dir = fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(seq) = outgoing_seq(name) {
                highest = highest.max(seq + 1);
            }
        }
        debug!(
            "message store at {} ready, next outgoing seq {}",
            root.display(),
            highest
        );
        Ok(Self {
            root,
            next_outgoing_seq: highest,
        })
    }

    /// Persist a record. Incoming records are named from their UTC
    /// timestamp, so a re-observed message maps to the same file and the
    /// second put is reported as [`PutOutcome::AlreadyExists`] without
    /// touching the first write. Outgoing records take the next sequence
    /// number.
    pub async fn put(&mut self, record: &StoredRecord) -> Result<PutOutcome> {
        let name = match record.direction {
            Direction::Incoming => format!(
                "{}{}{}",
                INCOMING_PREFIX,
                timefmt::file_id(&record.utc_time),
                RECORD_SUFFIX
            ),
            Direction::Outgoing => {
                let name = format!(
                    "{}{}{}",
                    OUTGOING_PREFIX, self.next_outgoing_seq, RECORD_SUFFIX
                );
                self.next_outgoing_seq += 1;
                name
            }
        };
        let path = self.root.join(&name);
        if fs::try_exists(&path).await? {
            debug!("record {} already stored, skipping", name);
            return Ok(PutOutcome::AlreadyExists);
        }
        fs::write(&path, encode_record(record))
            .await
            .with_context(|| format!("writing record {}", path.display()))?;
        info!("stored {} message as {}", direction_label(record), name);
        Ok(PutOutcome::Created)
    }

    /// Fresh enumeration of every decodable record. Order is whatever
    /// the directory yields; callers sort by [`StoredRecord::sort_key`].
    pub async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(INCOMING_PREFIX) || !name.ends_with(RECORD_SUFFIX) {
                continue;
            }
            let text = fs::read_to_string(entry.path()).await?;
            match decode_record(&text) {
                Some(record) => records.push(record),
                None => warn!("skipping undecodable record file {name}"),
            }
        }
        Ok(records)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn direction_label(record: &StoredRecord) -> &'static str {
    match record.direction {
        Direction::Incoming => "incoming",
        Direction::Outgoing => "outgoing",
    }
}

fn outgoing_seq(name: &str) -> Option<u64> {
    name.strip_prefix(OUTGOING_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)?
        .parse()
        .ok()
}

/// Serialize in the current format: legacy layout for incoming records,
/// dual-timestamp layout for outgoing ones.
fn encode_record(record: &StoredRecord) -> String {
    let mut out = String::new();
    out.push_str("From: ");
    out.push_str(&record.sender);
    out.push('\n');
    if let Some(recipient) = &record.recipient {
        out.push_str("To: ");
        out.push_str(recipient);
        out.push('\n');
        out.push_str("Time: ");
        out.push_str(&record.utc_time);
        out.push('\n');
        out.push_str("LocalTime: ");
        out.push_str(&record.local_time);
        out.push('\n');
    } else {
        out.push_str("Time: ");
        out.push_str(&record.local_time);
        out.push('\n');
    }
    out.push_str("Status: ");
    out.push_str(&record.status);
    out.push('\n');
    out.push_str("Content: ");
    out.push_str(&record.content);
    out.push('\n');
    out
}

/// Decode either on-disk format into the canonical record. A `To:` line
/// marks the record outgoing; a `LocalTime:` line means `Time:` already
/// holds UTC, otherwise `Time:` is local and gets converted here.
fn decode_record(text: &str) -> Option<StoredRecord> {
    let mut sender = None;
    let mut recipient = None;
    let mut time = None;
    let mut local_time = None;
    let mut status = String::new();
    let mut content: Option<String> = None;

    for line in text.lines() {
        if let Some(body) = &mut content {
            body.push('\n');
            body.push_str(line);
        } else if let Some(v) = line.strip_prefix("From: ") {
            sender = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("To: ") {
            recipient = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("Time: ") {
            time = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("LocalTime: ") {
            local_time = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("Status: ") {
            status = v.to_string();
        } else if let Some(v) = line.strip_prefix("Content: ") {
            content = Some(v.to_string());
        }
    }

    let sender = sender?;
    let time = time?;
    let content = content?;
    let (local_time, utc_time) = match local_time {
        Some(local) => (local, time),
        None => (time.clone(), timefmt::to_utc(&time)),
    };
    Some(StoredRecord {
        direction: if recipient.is_some() {
            Direction::Outgoing
        } else {
            Direction::Incoming
        },
        sender,
        recipient,
        local_time,
        utc_time,
        status,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_twice_preserves_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MessageStore::open(dir.path()).await.unwrap();

        let first =
            StoredRecord::incoming("+16512524765", "25/12/25,17:48:42-32", "REC READ", "Hello");
        assert_eq!(store.put(&first).await.unwrap(), PutOutcome::Created);

        let second =
            StoredRecord::incoming("+16512524765", "25/12/25,17:48:42-32", "REC READ", "changed");
        assert_eq!(store.put(&second).await.unwrap(), PutOutcome::AlreadyExists);

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "Hello");
    }

    #[tokio::test]
    async fn legacy_record_converts_time_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path()).await.unwrap();
        tokio::fs::write(
            dir.path().join("sms_260101_001000.txt"),
            "From: +16174299144\nTime: 26/01/01,00:10:00+32\nStatus: REC READ\nContent: happy new year\n",
        )
        .await
        .unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Incoming);
        assert_eq!(records[0].local_time, "26/01/01,00:10:00+32");
        assert_eq!(records[0].utc_time, "25/12/31,16:10:00+00:00");
    }

    #[tokio::test]
    async fn dual_timestamp_outgoing_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MessageStore::open(dir.path()).await.unwrap();

        let record = StoredRecord::outgoing("+16512524765", "25/12/25,17:48:42-32", "on my way");
        assert_eq!(store.put(&record).await.unwrap(), PutOutcome::Created);

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        let loaded = &records[0];
        assert_eq!(loaded.direction, Direction::Outgoing);
        assert_eq!(loaded.sender, DEVICE_PLACEHOLDER_NUMBER);
        assert_eq!(loaded.recipient.as_deref(), Some("+16512524765"));
        assert_eq!(loaded.local_time, "25/12/25,17:48:42-32");
        assert_eq!(loaded.utc_time, "25/12/26,01:48:42+00:00");
        assert_eq!(loaded.counterpart(), "+16512524765");
    }

    #[tokio::test]
    async fn outgoing_sequence_resumes_past_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("sms_out_7.txt"), "stale")
            .await
            .unwrap();
        let mut store = MessageStore::open(dir.path()).await.unwrap();

        let record = StoredRecord::outgoing("+15550001111", "26/01/05,19:00:00-32", "hi");
        store.put(&record).await.unwrap();
        assert!(dir.path().join("sms_out_8.txt").exists());
    }

    #[tokio::test]
    async fn multiline_content_survives() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MessageStore::open(dir.path()).await.unwrap();
        let record = StoredRecord::incoming(
            "+16174299144",
            "25/12/25,09:00:00-32",
            "REC UNREAD",
            "line one\nline two",
        );
        store.put(&record).await.unwrap();
        let records = store.list_all().await.unwrap();
        assert_eq!(records[0].content, "line one\nline two");
    }
}
