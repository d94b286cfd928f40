//! # Cellsync - SMS Synchronization Engine for Cellular Modems
//!
//! Cellsync keeps a local, file-backed message archive in sync with a
//! SIM7600-class cellular modem over a serial link. It speaks text-mode
//! AT commands, tolerates the modem's unreliable reply framing, and
//! aggregates stored messages into per-contact conversation threads.
//!
//! ## Features
//!
//! - **AT Command Engine**: carriage-return-terminated commands with reply
//!   framing by terminal sentinel (`OK`/`ERROR`) or idle timeout.
//! - **Message Store**: one file per message, at-most-once writes, with
//!   backward compatibility for the older single-timestamp record format.
//! - **Thread Aggregation**: full rebuild of per-contact threads sorted
//!   newest-first by UTC time.
//! - **Contact Resolution**: country-code-tolerant number matching against
//!   a plain-text address book, with auto-add for unknown senders.
//! - **Two-Phase Send**: prompt-gated `AT+CMGS` sends; a failed send
//!   persists nothing.
//! - **Async Design**: built with Tokio; every wait is timeout-bounded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cellsync::config::Config;
//! use cellsync::contacts::AddressBook;
//! use cellsync::modem::Modem;
//! use cellsync::storage::MessageStore;
//! use cellsync::sync::SyncEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!
//!     let mut modem = Modem::open(&config.device.port, config.device.baud_rate)?;
//!     modem.init().await?;
//!
//!     let store = MessageStore::open(&config.storage.data_dir).await?;
//!     let book = AddressBook::load(&config.storage.address_book).await?;
//!     let mut sync = SyncEngine::new(
//!         modem,
//!         store,
//!         book,
//!         config.sync.delete_after_read,
//!         config.sync.auto_add_contacts,
//!     );
//!     sync.poll_inbound().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`modem`] - transport seam, command engine, and AT command surface
//! - [`storage`] - file-per-message persistence layer
//! - [`threads`] - conversation thread aggregation
//! - [`contacts`] - address book and phone-number resolution
//! - [`sync`] - the driver orchestrating modem, store, and book
//! - [`timefmt`] - modem timestamp parsing, UTC conversion, sort keys
//! - [`config`] - TOML configuration

pub mod config;
pub mod contacts;
pub mod logutil;
pub mod modem;
pub mod storage;
pub mod sync;
pub mod threads;
pub mod timefmt;
