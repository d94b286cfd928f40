//! Synchronization driver: inbound polling, outbound sending, and the
//! in-memory view of the active conversation.
//!
//! Everything here is sentinel-tolerant. One garbled modem exchange or
//! one unparseable message skips that item and keeps the loop alive;
//! only transport and storage faults surface as errors.

use anyhow::Result;
use log::{debug, info, warn};

use crate::contacts::{normalize, numbers_match, AddressBook};
use crate::modem::{parse, Modem};
use crate::storage::{MessageStore, PutOutcome, StoredRecord};
use crate::threads::{self, ThreadPreview};

struct ActiveConversation {
    number: String,
    records: Vec<StoredRecord>,
}

/// Owns the modem, the store, and the address book; the only component
/// that talks to all three.
pub struct SyncEngine {
    modem: Modem,
    store: MessageStore,
    book: AddressBook,
    /// Read with `AT+CMGRD` (delete from SIM) when true, plain `AT+CMGR`
    /// otherwise. Leaving messages on the SIM is safe either way; the
    /// store's at-most-once put absorbs re-reads.
    delete_after_read: bool,
    /// Create an `Unknown <last4>` contact for unrecognized senders.
    auto_add_contacts: bool,
    active: Option<ActiveConversation>,
}

impl SyncEngine {
    pub fn new(
        modem: Modem,
        store: MessageStore,
        book: AddressBook,
        delete_after_read: bool,
        auto_add_contacts: bool,
    ) -> Self {
        Self {
            modem,
            store,
            book,
            delete_after_read,
            auto_add_contacts,
            active: None,
        }
    }

    /// One inbound pass: count stored messages, read each index in
    /// ascending order, persist what parses. Returns how many records
    /// were newly created.
    pub async fn poll_inbound(&mut self) -> Result<usize> {
        if !self.modem.set_text_mode().await? {
            warn!("modem refused text mode, skipping poll");
            return Ok(0);
        }
        let count = self.modem.storage_count().await?;
        if count <= 0 {
            if count < 0 {
                debug!("storage count unreadable, skipping poll");
            }
            return Ok(0);
        }
        info!("modem reports {count} stored messages");
        let mut created = 0;
        for index in 1..=count as u32 {
            if self.ingest_index(index).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Service `+CMTI` notifications sitting on the line: each one names
    /// a single freshly-arrived message index to read.
    pub async fn process_unsolicited(&mut self) -> Result<usize> {
        let pending = self.modem.drain_unsolicited()?;
        if pending.is_empty() {
            return Ok(0);
        }
        let indices: Vec<u32> = pending
            .lines()
            .filter_map(parse::unsolicited_sms_index)
            .collect();
        let mut created = 0;
        for index in indices {
            info!("unsolicited message notification for index {index}");
            if !self.modem.set_text_mode().await? {
                break;
            }
            if self.ingest_index(index).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Read, parse, resolve, and persist one message index. False means
    /// skipped (unparseable, empty, or duplicate), never fatal.
    async fn ingest_index(&mut self, index: u32) -> Result<bool> {
        let raw = if self.delete_after_read {
            self.modem.read_and_delete_sms(index).await?
        } else {
            self.modem.read_sms(index).await?
        };
        let Some(envelope) = parse::sms_envelope(&raw) else {
            debug!("index {index}: no envelope in reply, skipping");
            return Ok(false);
        };
        if envelope.content.is_empty() {
            debug!("index {index}: empty content, skipping");
            return Ok(false);
        }

        if self.auto_add_contacts && self.book.find(&envelope.sender).is_none() {
            let digits = normalize(&envelope.sender);
            // Last four characters, not bytes: alphanumeric sender ids (and
            // replacement chars from garbled serial bytes) can be multibyte.
            let tail = digits
                .char_indices()
                .rev()
                .nth(3)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let name = format!("Unknown {}", &digits[tail..]);
            info!("auto-adding contact {} for {}", name, envelope.sender);
            self.book.add(&envelope.sender, &name).await?;
        }

        let record = StoredRecord::incoming(
            &envelope.sender,
            &envelope.timestamp,
            &envelope.status,
            &envelope.content,
        );
        let outcome = self.store.put(&record).await?;
        if outcome == PutOutcome::AlreadyExists {
            debug!("index {index}: duplicate of stored record");
            return Ok(false);
        }
        self.maybe_append_active(&record);
        info!(
            "stored message from {} ({})",
            self.book.resolve(&envelope.sender),
            envelope.timestamp
        );
        Ok(true)
    }

    /// Send a text and persist the outgoing record on success. A failed
    /// send (no prompt, no final OK) persists nothing and returns false.
    pub async fn send_text(&mut self, number: &str, body: &str) -> Result<bool> {
        if !self.modem.send_sms(number, body).await? {
            warn!("send to {number} failed, nothing persisted");
            return Ok(false);
        }
        let local_time = self.modem.network_time_or_fallback().await?;
        let record = StoredRecord::outgoing(number, &local_time, body);
        self.store.put(&record).await?;
        self.maybe_append_active(&record);
        info!("sent message to {}", self.book.resolve(number));
        Ok(true)
    }

    /// Full thread list, rebuilt from contacts plus every stored record.
    pub async fn threads(&self) -> Result<Vec<ThreadPreview>> {
        let records = self.store.list_all().await?;
        Ok(threads::rebuild(&self.book, &records))
    }

    /// Load the conversation with one number, UTC-ascending, and make it
    /// the active one so later sends append without a rebuild.
    pub async fn open_conversation(&mut self, number: &str) -> Result<&[StoredRecord]> {
        let mut records: Vec<StoredRecord> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|r| numbers_match(r.counterpart(), number))
            .collect();
        records.sort_by_key(StoredRecord::sort_key);
        let active = self.active.insert(ActiveConversation {
            number: number.to_string(),
            records,
        });
        Ok(&active.records)
    }

    pub fn active_conversation(&self) -> Option<&[StoredRecord]> {
        self.active.as_ref().map(|a| a.records.as_slice())
    }

    fn maybe_append_active(&mut self, record: &StoredRecord) {
        if let Some(active) = &mut self.active {
            if numbers_match(&active.number, record.counterpart()) {
                active.records.push(record.clone());
            }
        }
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub fn modem_mut(&mut self) -> &mut Modem {
        &mut self.modem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::{EngineTuning, MockTransport};
    use std::time::Duration;

    fn modem(mock: MockTransport) -> Modem {
        Modem::new(
            Box::new(mock),
            EngineTuning {
                idle_timeout: Duration::from_millis(30),
                command_timeout: Duration::from_millis(200),
            },
        )
    }

    async fn engine(mock: MockTransport) -> (SyncEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path()).await.unwrap();
        let sync = SyncEngine::new(modem(mock), store, AddressBook::new(), true, false);
        (sync, dir)
    }

    #[tokio::test]
    async fn poll_persists_parsed_messages() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n"); // AT+CMGF=1
        mock.push_reply("\r\n+CPMS: \"SM\",1,50,\"SM\",1,50,\"SM\",1,50\r\n\r\nOK\r\n");
        mock.push_reply(
            "\r\n+CMGR: \"REC READ\",\"+16512524765\",\"\",\"25/12/25,17:48:42-32\"\r\nHello\r\n\r\nOK\r\n",
        );
        let (mut sync, _guard) = engine(mock).await;

        assert_eq!(sync.poll_inbound().await.unwrap(), 1);
        let threads = sync.threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].message_count, 1);
        assert!(threads[0].latest_preview.starts_with("Hello"));
    }

    #[tokio::test]
    async fn repeated_poll_is_idempotent() {
        let mut mock = MockTransport::new();
        for _ in 0..2 {
            mock.push_reply("\r\nOK\r\n");
            mock.push_reply("\r\n+CPMS: \"SM\",1,50,\"SM\",1,50,\"SM\",1,50\r\n\r\nOK\r\n");
            mock.push_reply(
                "\r\n+CMGR: \"REC READ\",\"+16512524765\",\"\",\"25/12/25,17:48:42-32\"\r\nHello\r\n\r\nOK\r\n",
            );
        }
        let (mut sync, _guard) = engine(mock).await;

        assert_eq!(sync.poll_inbound().await.unwrap(), 1);
        assert_eq!(sync.poll_inbound().await.unwrap(), 0);
        assert_eq!(sync.threads().await.unwrap()[0].message_count, 1);
    }

    #[tokio::test]
    async fn garbled_index_is_skipped_not_fatal() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n");
        mock.push_reply("\r\n+CPMS: \"SM\",2,50,\"SM\",2,50,\"SM\",2,50\r\n\r\nOK\r\n");
        mock.push_reply("\r\nERROR\r\n"); // index 1 unreadable
        mock.push_reply(
            "\r\n+CMGR: \"REC UNREAD\",\"+16174299144\",\"\",\"25/12/26,08:00:00-32\"\r\nmorning\r\n\r\nOK\r\n",
        );
        let (mut sync, _guard) = engine(mock).await;

        assert_eq!(sync.poll_inbound().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_send_persists_nothing() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n"); // AT+CMGF=1
        mock.push_reply("\r\nERROR\r\n"); // header write, no prompt follows
        let (mut sync, _guard) = engine(mock).await;

        assert!(!sync.send_text("+16512524765", "hi").await.unwrap());
        assert!(sync.threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_send_persists_outgoing_record() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n"); // AT+CMGF=1
        mock.push_reply("\r\n> "); // prompt after header
        mock.push_reply(""); // body write
        mock.push_reply("\r\n+CMGS: 5\r\n\r\nOK\r\n"); // Ctrl-Z
        mock.push_reply("\r\n+CCLK: \"25/12/25,18:00:00-32\"\r\n\r\nOK\r\n");
        let (mut sync, _guard) = engine(mock).await;

        sync.open_conversation("+16512524765").await.unwrap();
        assert!(sync.send_text("+16512524765", "on my way").await.unwrap());

        let active = sync.active_conversation().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "on my way");

        let threads = sync.threads().await.unwrap();
        assert_eq!(threads[0].message_count, 1);
        assert_eq!(threads[0].number, "+16512524765");
    }

    #[tokio::test]
    async fn auto_add_tolerates_multibyte_sender_ids() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n");
        mock.push_reply("\r\n+CPMS: \"SM\",1,50,\"SM\",1,50,\"SM\",1,50\r\n\r\nOK\r\n");
        // Alphanumeric sender id with multibyte chars straddling the
        // four-character tail used for the auto-add name.
        mock.push_reply(
            "\r\n+CMGR: \"REC READ\",\"PayPal€€\",\"\",\"25/12/26,11:00:00-32\"\r\nyour code is 1234\r\n\r\nOK\r\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path()).await.unwrap();
        let mut sync = SyncEngine::new(modem(mock), store, AddressBook::new(), true, true);

        assert_eq!(sync.poll_inbound().await.unwrap(), 1);
        assert_eq!(sync.book().resolve("PayPal€€"), "Unknown al€€");
    }

    #[tokio::test]
    async fn unsolicited_notification_reads_that_index() {
        let mut mock = MockTransport::new();
        mock.inject("\r\n+CMTI: \"SM\",3\r\n");
        mock.push_reply("\r\nOK\r\n"); // AT+CMGF=1
        mock.push_reply(
            "\r\n+CMGR: \"REC UNREAD\",\"+16174299144\",\"\",\"25/12/26,09:15:00-32\"\r\nlunch?\r\n\r\nOK\r\n",
        );
        let (mut sync, _guard) = engine(mock).await;

        assert_eq!(sync.process_unsolicited().await.unwrap(), 1);
        let threads = sync.threads().await.unwrap();
        assert_eq!(threads[0].message_count, 1);
        assert!(threads[0].latest_preview.starts_with("lunch?"));
    }
}
