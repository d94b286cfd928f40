/// End-to-end synchronization tests over a scripted mock transport.
/// Covers the inbound poll path (count, read, persist, aggregate), the
/// two-phase outbound send, and unsolicited new-message notifications.
use std::time::Duration;

use cellsync::contacts::{AddressBook, Contact};
use cellsync::modem::{EngineTuning, MockTransport, Modem};
use cellsync::storage::MessageStore;
use cellsync::sync::SyncEngine;
use tempfile::TempDir;

fn fast_tuning() -> EngineTuning {
    EngineTuning {
        idle_timeout: Duration::from_millis(30),
        command_timeout: Duration::from_millis(200),
    }
}

async fn setup(mock: MockTransport, book: AddressBook) -> (SyncEngine, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = MessageStore::open(dir.path()).await.unwrap();
    let modem = Modem::new(Box::new(mock), fast_tuning());
    (SyncEngine::new(modem, store, book, true, false), dir)
}

fn liz_book() -> AddressBook {
    AddressBook::from_entries(vec![Contact {
        phone: "16174299144".into(),
        name: "Liz".into(),
    }])
}

#[tokio::test]
async fn inbound_poll_persists_and_threads_one_message() {
    let mut mock = MockTransport::new();
    mock.push_reply("\r\nOK\r\n"); // text mode
    mock.push_reply("\r\n+CPMS: \"SM\",1,50,\"SM\",1,50,\"SM\",1,50\r\n\r\nOK\r\n");
    mock.push_reply(
        "\r\n+CMGR: \"REC READ\",\"+16512524765\",\"\",\"25/12/25,17:48:42-32\"\r\nHello\r\n\r\nOK\r\n",
    );
    let (mut sync, _dir) = setup(mock, AddressBook::new()).await;

    assert_eq!(sync.poll_inbound().await.unwrap(), 1);

    let threads = sync.threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].number, "+16512524765");
    assert_eq!(threads[0].message_count, 1);
    assert!(threads[0].latest_preview.starts_with("Hello"));
    // -32 quarter-hours behind UTC: local 17:48 is 01:48 UTC the next day
    assert_eq!(threads[0].latest_utc, "25/12/26,01:48:42+00:00");
}

#[tokio::test]
async fn known_sender_threads_under_contact_name() {
    let mut mock = MockTransport::new();
    mock.push_reply("\r\nOK\r\n");
    mock.push_reply("\r\n+CPMS: \"SM\",1,50,\"SM\",1,50,\"SM\",1,50\r\n\r\nOK\r\n");
    mock.push_reply(
        "\r\n+CMGR: \"REC UNREAD\",\"+16174299144\",\"\",\"25/12/26,08:00:00-32\"\r\nmorning\r\n\r\nOK\r\n",
    );
    let (mut sync, _dir) = setup(mock, liz_book()).await;

    assert_eq!(sync.poll_inbound().await.unwrap(), 1);

    let threads = sync.threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].name, "Liz");
    assert_eq!(threads[0].message_count, 1);
}

#[tokio::test]
async fn zero_count_polls_nothing() {
    let mut mock = MockTransport::new();
    mock.push_reply("\r\nOK\r\n");
    mock.push_reply("\r\n+CPMS: \"SM\",0,50,\"SM\",0,50,\"SM\",0,50\r\n\r\nOK\r\n");
    let (mut sync, _dir) = setup(mock, liz_book()).await;

    assert_eq!(sync.poll_inbound().await.unwrap(), 0);
    // Liz still seeds an idle thread
    let threads = sync.threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].message_count, 0);
    assert_eq!(threads[0].latest_sort_key, 0);
}

#[tokio::test]
async fn send_persists_record_and_appends_to_active_conversation() {
    let mut mock = MockTransport::new();
    mock.push_reply("\r\nOK\r\n"); // text mode
    mock.push_reply("\r\n> "); // recipient prompt
    mock.push_reply(""); // body write
    mock.push_reply("\r\n+CMGS: 12\r\n\r\nOK\r\n"); // terminator write
    mock.push_reply("\r\n+CCLK: \"25/12/26,09:30:00-32\"\r\n\r\nOK\r\n"); // network time
    let (mut sync, _dir) = setup(mock, liz_book()).await;

    sync.open_conversation("6174299144").await.unwrap();
    assert!(sync.send_text("+16174299144", "lunch at noon?").await.unwrap());

    let active = sync.active_conversation().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content, "lunch at noon?");
    assert_eq!(active[0].recipient.as_deref(), Some("+16174299144"));

    let threads = sync.threads().await.unwrap();
    assert_eq!(threads[0].name, "Liz");
    assert_eq!(threads[0].message_count, 1);
}

#[tokio::test]
async fn send_without_prompt_is_abandoned() {
    let mut mock = MockTransport::new();
    mock.push_reply("\r\nOK\r\n"); // text mode
    mock.push_reply("\r\nERROR\r\n"); // header rejected, no prompt
    let (mut sync, _dir) = setup(mock, liz_book()).await;

    assert!(!sync.send_text("+16174299144", "hi").await.unwrap());

    let threads = sync.threads().await.unwrap();
    assert_eq!(threads[0].message_count, 0);
}

#[tokio::test]
async fn cmti_notification_triggers_single_index_read() {
    let mut mock = MockTransport::new();
    mock.inject("\r\n+CMTI: \"SM\",2\r\n");
    mock.push_reply("\r\nOK\r\n"); // text mode
    mock.push_reply(
        "\r\n+CMGR: \"REC UNREAD\",\"+16174299144\",\"\",\"25/12/26,10:05:00-32\"\r\nhere now\r\n\r\nOK\r\n",
    );
    let (mut sync, _dir) = setup(mock, liz_book()).await;

    assert_eq!(sync.process_unsolicited().await.unwrap(), 1);
    let threads = sync.threads().await.unwrap();
    assert!(threads[0].latest_preview.starts_with("here now"));
}

#[tokio::test]
async fn conversation_view_is_utc_ascending_and_direction_tagged() {
    use cellsync::storage::{Direction, StoredRecord};

    let dir = TempDir::new().unwrap();
    let mut store = MessageStore::open(dir.path()).await.unwrap();
    store
        .put(&StoredRecord::outgoing(
            "+16174299144",
            "25/12/26,09:00:00-32",
            "you up?",
        ))
        .await
        .unwrap();
    store
        .put(&StoredRecord::incoming(
            "+16174299144",
            "25/12/26,08:00:00-32",
            "REC READ",
            "morning",
        ))
        .await
        .unwrap();
    store
        .put(&StoredRecord::incoming(
            "+15550001111",
            "25/12/26,08:30:00-32",
            "REC READ",
            "unrelated",
        ))
        .await
        .unwrap();

    let modem = Modem::new(Box::new(MockTransport::new()), fast_tuning());
    let mut sync = SyncEngine::new(modem, store, liz_book(), true, false);

    let records = sync.open_conversation("6174299144").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].content, "morning");
    assert_eq!(records[0].direction, Direction::Incoming);
    assert_eq!(records[1].content, "you up?");
    assert_eq!(records[1].direction, Direction::Outgoing);
}
