//! Binary entrypoint for the cellsync CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the synchronization loop against the modem
//! - `init` - create a starter `config.toml` and the data directory
//! - `status` - print store and thread summary without touching the modem
//! - `probe [--port <path>] [-b <baud>]` - check modem link, signal, and network
//! - `send --to <number> <message>` - send one text and persist the record
//!
//! See the library crate docs for module-level details: `cellsync::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use cellsync::config::Config;
use cellsync::contacts::AddressBook;
use cellsync::storage::MessageStore;
use cellsync::sync::SyncEngine;

#[derive(Parser)]
#[command(name = "cellsync")]
#[command(about = "SMS synchronization engine for SIM7600-class cellular modems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synchronization loop
    Start {
        /// Modem serial port (overrides config, e.g. /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Initialize a new configuration and data directory
    Init,
    /// Show stored-message and thread summary (offline)
    Status,
    /// Probe the modem link: connectivity, signal quality, operator
    Probe {
        /// Modem serial port (overrides config)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
    },
    /// Send one text message and persist the outgoing record
    Send {
        /// Recipient phone number
        #[arg(short, long)]
        to: String,
        /// Message body
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            info!("Starting cellsync v{}", env!("CARGO_PKG_VERSION"));
            run_sync_loop(config, port).await?;
        }
        Commands::Init => {
            info!("Initializing new cellsync configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let cfg = Config::default();
            MessageStore::open(&cfg.storage.data_dir).await?;
            info!("Message store initialized at {}", cfg.storage.data_dir);
        }
        Commands::Status => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            let store = MessageStore::open(&config.storage.data_dir).await?;
            let book = AddressBook::load(&config.storage.address_book).await?;
            let records = store.list_all().await?;
            println!("Contacts: {}", book.len());
            println!("Stored messages: {}", records.len());
            for thread in cellsync::threads::rebuild(&book, &records) {
                println!(
                    "  {:<20} {:>3} msgs  {}  {}{}",
                    thread.name,
                    thread.message_count,
                    thread.latest_display(),
                    if thread.latest_was_outgoing { "me: " } else { "" },
                    thread.latest_preview
                );
            }
        }
        Commands::Probe { port, baud } => {
            probe(&cli.config, pre_config, port, baud).await?;
        }
        Commands::Send { to, message } => {
            let config = pre_config.unwrap_or(Config::load(&cli.config).await?);
            let mut sync = build_engine(&config, None).await?;
            if sync.send_text(&to, &message).await? {
                println!("Sent to {}", sync.book().resolve(&to));
            } else {
                println!("Send failed: modem did not accept the message");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn build_engine(_config: &Config, _port: Option<String>) -> Result<SyncEngine> {
    anyhow::bail!("modem access requires the 'serial' feature")
}

#[cfg(feature = "serial")]
async fn build_engine(config: &Config, port: Option<String>) -> Result<SyncEngine> {
    use cellsync::modem::Modem;

    let port = port.unwrap_or_else(|| config.device.port.clone());
    let mut modem = Modem::new_serial(&port, config.device.baud_rate, config.sync.engine_tuning())?;
    if !modem.init().await? {
        warn!("modem on {} not answering AT, continuing anyway", port);
    } else {
        info!("Connected to modem on {}", port);
    }
    let store = MessageStore::open(&config.storage.data_dir).await?;
    let book = AddressBook::load(&config.storage.address_book).await?;
    Ok(SyncEngine::new(
        modem,
        store,
        book,
        config.sync.delete_after_read,
        config.sync.auto_add_contacts,
    ))
}

async fn run_sync_loop(config: Config, port: Option<String>) -> Result<()> {
    use tokio::time::{sleep, Duration};

    let interval = Duration::from_secs(config.sync.poll_interval_secs);
    let mut sync = build_engine(&config, port).await?;
    sync.modem_mut().enable_caller_id().await?;

    info!(
        "Synchronization loop running, polling every {}s",
        interval.as_secs()
    );
    loop {
        match sync.poll_inbound().await {
            Ok(n) if n > 0 => info!("poll stored {n} new messages"),
            Ok(_) => {}
            Err(e) => warn!("inbound poll failed: {e}"),
        }
        let deadline = tokio::time::Instant::now() + interval;
        while tokio::time::Instant::now() < deadline {
            match sync.process_unsolicited().await {
                Ok(n) if n > 0 => info!("notification stored {n} new messages"),
                Ok(_) => {}
                Err(e) => warn!("notification handling failed: {e}"),
            }
            sleep(Duration::from_millis(500)).await;
        }
    }
}

async fn probe(
    config_path: &str,
    pre_config: Option<Config>,
    port: Option<String>,
    baud: u32,
) -> Result<()> {
    #[cfg(not(feature = "serial"))]
    {
        let _ = (config_path, pre_config, port, baud);
        anyhow::bail!("probe requires the 'serial' feature");
    }
    #[cfg(feature = "serial")]
    {
        use cellsync::modem::Modem;

        let config = match pre_config {
            Some(c) => c,
            None => Config::load(config_path).await?,
        };
        let port = port.unwrap_or_else(|| config.device.port.clone());
        info!("Probing modem on {} @ {} baud", port, baud);

        let mut modem = Modem::new_serial(&port, baud, config.sync.engine_tuning())?;
        let connected = modem.init().await?;
        let signal = if connected {
            modem.signal_quality().await?
        } else {
            -1
        };
        let network = if connected {
            modem.network_status().await?
        } else {
            String::new()
        };
        let time = if connected {
            modem.network_time().await?
        } else {
            None
        };

        let payload = serde_json::json!({
            "status": if connected { "ok" } else { "no-response" },
            "port": port,
            "signal_quality": signal,
            "network": network,
            "network_time": time,
        });
        println!("{}", payload);
        if !connected {
            std::process::exit(1);
        }
        Ok(())
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(cfg) = config {
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
                let write_mutex = mutex.clone();
                let is_tty = atty::is(atty::Stream::Stdout);

                builder.format(move |fmt, record| {
                    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                    let line = format!("{} [{}] {}", ts, record.level(), record.args());
                    if let Ok(mut guard) = write_mutex.lock() {
                        let _ = writeln!(guard, "{}", line);
                    }
                    if is_tty {
                        writeln!(fmt, "{}", line)
                    } else {
                        Ok(())
                    }
                });
            } else {
                builder.format(|fmt, record| {
                    writeln!(
                        fmt,
                        "{} [{}] {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                        record.level(),
                        record.args()
                    )
                });
            }
        } else {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
