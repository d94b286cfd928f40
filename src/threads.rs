//! Conversation thread aggregation.
//!
//! Threads are always rebuilt from scratch over the full record set.
//! Record volume is small and bounded, so a full pass is cheaper to get
//! right than incremental bookkeeping.

use log::{debug, warn};

use crate::contacts::{numbers_match, AddressBook};
use crate::storage::{Direction, StoredRecord};
use crate::timefmt;

/// Upper bound on threads, known contacts included. Once reached,
/// records from further unknown numbers are dropped from aggregation
/// (never from storage).
pub const MAX_THREADS: usize = 64;

const PREVIEW_LEN: usize = 40;

/// One line of the thread list: a contact (or bare number) plus the
/// newest message exchanged with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPreview {
    /// Resolved contact name, or the raw number when unknown.
    pub name: String,
    pub number: String,
    pub message_count: u32,
    /// Sortable UTC value of the newest record, 0 when no messages.
    pub latest_sort_key: u64,
    pub latest_utc: String,
    pub latest_preview: String,
    /// Whether the newest message in the thread was sent from this device.
    pub latest_was_outgoing: bool,
}

impl ThreadPreview {
    fn seed(name: &str, number: &str) -> Self {
        Self {
            name: name.to_string(),
            number: number.to_string(),
            message_count: 0,
            latest_sort_key: 0,
            latest_utc: String::new(),
            latest_preview: String::new(),
            latest_was_outgoing: false,
        }
    }

    /// Short display timestamp for the newest message.
    pub fn latest_display(&self) -> String {
        if self.latest_utc.is_empty() {
            String::new()
        } else {
            timefmt::display_short(&self.latest_utc)
        }
    }
}

/// Rebuild the full thread list: one seed thread per known contact,
/// ad-hoc threads for unknown numbers, sorted newest-first with
/// zero-activity threads last.
pub fn rebuild(book: &AddressBook, records: &[StoredRecord]) -> Vec<ThreadPreview> {
    let mut threads: Vec<ThreadPreview> = book
        .entries()
        .iter()
        .map(|c| ThreadPreview::seed(&c.name, &c.phone))
        .collect();
    if threads.len() > MAX_THREADS {
        threads.truncate(MAX_THREADS);
    }

    for record in records {
        let counterpart = record.counterpart();
        let slot = threads
            .iter_mut()
            .find(|t| numbers_match(&t.number, counterpart));
        let thread = match slot {
            Some(t) => t,
            None => {
                if threads.len() >= MAX_THREADS {
                    warn!("thread limit reached, not aggregating {counterpart}");
                    continue;
                }
                threads.push(ThreadPreview::seed(counterpart, counterpart));
                threads.last_mut().unwrap()
            }
        };
        thread.message_count += 1;
        let key = record.sort_key();
        if key > thread.latest_sort_key {
            thread.latest_sort_key = key;
            thread.latest_utc = record.utc_time.clone();
            thread.latest_preview = preview(&record.content);
            thread.latest_was_outgoing = record.direction == Direction::Outgoing;
        }
    }

    threads.sort_by(|a, b| b.latest_sort_key.cmp(&a.latest_sort_key));
    debug!("rebuilt {} threads from {} records", threads.len(), records.len());
    threads
}

fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    first_line.chars().take(PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::Contact;
    use crate::storage::StoredRecord;

    fn book() -> AddressBook {
        AddressBook::from_entries(vec![Contact {
            phone: "16174299144".into(),
            name: "Liz".into(),
        }])
    }

    #[test]
    fn unknown_sender_gets_adhoc_thread_and_idle_contact_sorts_last() {
        let records = vec![StoredRecord::incoming(
            "+16512524765",
            "25/12/25,17:48:42-32",
            "REC READ",
            "Hello there",
        )];
        let threads = rebuild(&book(), &records);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].name, "+16512524765");
        assert_eq!(threads[0].message_count, 1);
        assert!(threads[0].latest_preview.starts_with("Hello"));
        assert_eq!(threads[1].name, "Liz");
        assert_eq!(threads[1].message_count, 0);
        assert_eq!(threads[1].latest_sort_key, 0);
    }

    #[test]
    fn counterpart_is_recipient_for_outgoing_and_counts_accumulate() {
        let records = vec![
            StoredRecord::incoming("+16174299144", "25/12/25,09:00:00-32", "REC READ", "hi"),
            StoredRecord::outgoing("6174299144", "25/12/25,10:00:00-32", "hey back"),
        ];
        let threads = rebuild(&book(), &records);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].name, "Liz");
        assert_eq!(threads[0].message_count, 2);
        assert!(threads[0].latest_preview.starts_with("hey back"));
        assert!(threads[0].latest_was_outgoing);
    }

    #[test]
    fn latest_fields_only_move_forward() {
        let records = vec![
            StoredRecord::incoming("+16174299144", "25/12/25,10:00:00+00", "REC READ", "newer"),
            StoredRecord::incoming("+16174299144", "25/12/24,10:00:00+00", "REC READ", "older"),
        ];
        let threads = rebuild(&book(), &records);
        assert_eq!(threads[0].message_count, 2);
        assert_eq!(threads[0].latest_preview, "newer");
        assert!(!threads[0].latest_was_outgoing);
    }

    #[test]
    fn overflow_records_are_dropped_from_aggregation() {
        let records: Vec<StoredRecord> = (0..MAX_THREADS + 5)
            .map(|i| {
                StoredRecord::incoming(
                    &format!("+1555000{i:04}"),
                    "25/12/25,12:00:00+00",
                    "REC READ",
                    "x",
                )
            })
            .collect();
        let threads = rebuild(&AddressBook::new(), &records);
        assert_eq!(threads.len(), MAX_THREADS);
    }

    #[test]
    fn threads_sort_newest_first() {
        let records = vec![
            StoredRecord::incoming("+15550000001", "25/12/20,12:00:00+00", "REC READ", "old"),
            StoredRecord::incoming("+15550000002", "25/12/25,12:00:00+00", "REC READ", "new"),
        ];
        let threads = rebuild(&AddressBook::new(), &records);
        assert_eq!(threads[0].number, "+15550000002");
        assert_eq!(threads[1].number, "+15550000001");
    }
}
