//! # Modem Communication Module
//!
//! Serial link to the cellular modem plus the AT command surface built on
//! top of it. The heart of the module is [`CommandEngine::execute`]: send a
//! command line terminated by a single carriage return, then collect the
//! reply until a terminal sentinel (`OK`/`ERROR`) arrives, or the line goes
//! idle, or the overall timeout elapses.
//!
//! The dual completion policy exists because some replies — notably the
//! multi-line body of a read-and-delete (`AT+CMGRD`) — do not reliably end
//! with `OK` in the observed byte stream; silence on the line is the only
//! practical completion signal for those. An absent sentinel is reported in
//! [`RawReply::terminated`], not as an error: many callers tolerate partial
//! data.
//!
//! ## Connection
//!
//! ```rust,no_run
//! use cellsync::modem::Modem;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut modem = Modem::open("/dev/ttyUSB0", 115200)?;
//!     let rssi = modem.signal_quality().await?;
//!     println!("signal: {rssi}");
//!     Ok(())
//! }
//! ```
//!
//! The transport is exclusively owned by the engine; nothing else reads or
//! writes the serial line.

use crate::logutil::escape_log;
use anyhow::Result;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

pub mod parse;

pub use parse::SmsEnvelope;

/// Ctrl-Z terminates an SMS body in text mode.
const SMS_BODY_TERMINATOR: &str = "\x1a";

/// Fallback local timestamp written when the network-time query fails.
const FALLBACK_LOCAL_TIME: &str = "26/01/05,19:00:00-32";

/// Errors at the byte-transport seam.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial write failed: {0}")]
    Write(String),
    #[error("serial read failed: {0}")]
    Read(String),
}

/// Raw duplex byte stream to the modem.
///
/// `read_bytes` must be non-blocking in spirit: return `Ok(0)` promptly when
/// nothing is pending so the engine's poll loop stays responsive.
pub trait ByteTransport: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use super::{ByteTransport, TransportError};
    use log::debug;
    use serialport::SerialPort;
    use std::time::Duration;

    /// [`ByteTransport`] over a real serial port.
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open `port_name` at `baud_rate` with explicit 8N1 settings.
        ///
        /// Toggles DTR/RTS to wake the module and purges any boot chatter
        /// already buffered so the first command sees a clean line.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
            let mut builder =
                serialport::new(port_name, baud_rate).timeout(Duration::from_millis(50));
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder.open().map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            std::thread::sleep(Duration::from_millis(150));
            let mut purge = [0u8; 512];
            if let Ok(available) = port.bytes_to_read() {
                if available > 0 {
                    let _ = std::io::Read::read(&mut port, &mut purge);
                    debug!("purged {} bytes of boot chatter from {}", available, port_name);
                }
            }
            Ok(Self { port })
        }
    }

    impl ByteTransport for SerialTransport {
        fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
            std::io::Write::write_all(&mut self.port, data)
                .map_err(|e| TransportError::Write(e.to_string()))
        }

        fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match std::io::Read::read(&mut self.port, buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
                Err(e) => Err(TransportError::Read(e.to_string())),
            }
        }
    }
}

/// Scripted [`ByteTransport`] for tests and for running without hardware.
///
/// Replies are released in order, one per *command* write (a bare `\r`
/// line-ending write does not consume a reply). Unsolicited bytes can be
/// injected directly. Writes are recorded behind a shared handle so tests
/// can assert on them after the engine takes ownership of the transport.
#[derive(Default)]
pub struct MockTransport {
    replies: std::collections::VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    writes: std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply released by the next command write.
    pub fn push_reply(&mut self, reply: &str) {
        self.replies.push_back(reply.as_bytes().to_vec());
    }

    /// Make bytes readable immediately, without waiting for a write.
    pub fn inject(&mut self, bytes: &str) {
        self.pending.extend_from_slice(bytes.as_bytes());
    }

    /// Shared view of everything written; survives moving the transport
    /// into an engine.
    pub fn writes_handle(&self) -> std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>> {
        self.writes.clone()
    }
}

/// Render a writes handle as lossy strings for assertions.
pub fn written_lines(handle: &std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>) -> Vec<String> {
    handle
        .lock()
        .expect("writes lock")
        .iter()
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect()
}

impl ByteTransport for MockTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.writes.lock().expect("writes lock").push(data.to_vec());
        if data != b"\r" {
            if let Some(reply) = self.replies.pop_front() {
                self.pending.extend_from_slice(&reply);
            }
        }
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Engine timing knobs, sourced from `[sync]` config.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Reply considered complete after this much silence with >=1 byte in hand.
    pub idle_timeout: Duration,
    /// Default overall ceiling per command when the caller does not override.
    pub command_timeout: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(1000),
            command_timeout: Duration::from_millis(3000),
        }
    }
}

/// Outcome of one command/reply exchange.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub text: String,
    /// Whether a terminal sentinel (`OK`/`ERROR`) closed the reply. A false
    /// value with non-empty text is an idle-timeout framed partial reply.
    pub terminated: bool,
}

impl RawReply {
    pub fn is_ok(&self) -> bool {
        self.text.contains("OK")
    }
}

/// Sends command lines and frames their replies.
///
/// Waits are the only blocking points in the crate and every one is
/// timeout-bounded. There are no retries here; retrying is caller policy.
pub struct CommandEngine {
    transport: Box<dyn ByteTransport>,
    tuning: EngineTuning,
}

impl CommandEngine {
    pub fn new(transport: Box<dyn ByteTransport>, tuning: EngineTuning) -> Self {
        Self { transport, tuning }
    }

    /// Send `command` + `\r` and collect the reply.
    ///
    /// Completion, in precedence order: terminal sentinel seen; line idle
    /// for the tuned window with at least one byte received; `timeout`
    /// elapsed. Returns whatever accumulated — possibly empty, possibly
    /// partial.
    pub async fn execute(&mut self, command: &str, timeout: Duration) -> Result<RawReply> {
        self.drain_pending();
        trace!("TX {:?}", command);
        self.transport.write_bytes(command.as_bytes())?;
        self.transport.write_bytes(b"\r")?;
        self.collect_reply(timeout).await
    }

    /// Write raw bytes without a trailing carriage return (SMS body phase).
    pub fn write_raw(&mut self, data: &str) -> Result<()> {
        trace!("TX raw {:?}", escape_log(data));
        self.transport.write_bytes(data.as_bytes())?;
        Ok(())
    }

    /// Accumulate reply bytes until a sentinel, idle silence, or `timeout`.
    pub async fn collect_reply(&mut self, timeout: Duration) -> Result<RawReply> {
        let mut accumulated: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];
        let start = Instant::now();
        let mut last_byte_at = Instant::now();

        loop {
            let n = self.transport.read_bytes(&mut buf)?;
            if n > 0 {
                accumulated.extend_from_slice(&buf[..n]);
                last_byte_at = Instant::now();
                let text = String::from_utf8_lossy(&accumulated);
                if text.ends_with("\r\nOK\r\n") || text.ends_with("\r\nERROR\r\n") {
                    let reply = text.into_owned();
                    debug!("RX terminated: {}", escape_log(&reply));
                    return Ok(RawReply {
                        text: reply,
                        terminated: true,
                    });
                }
            } else {
                if !accumulated.is_empty() && last_byte_at.elapsed() >= self.tuning.idle_timeout {
                    let reply = String::from_utf8_lossy(&accumulated).into_owned();
                    debug!("RX idle-framed: {}", escape_log(&reply));
                    return Ok(RawReply {
                        text: reply,
                        terminated: false,
                    });
                }
                sleep(Duration::from_millis(5)).await;
            }
            if start.elapsed() >= timeout {
                let reply = String::from_utf8_lossy(&accumulated).into_owned();
                if reply.is_empty() {
                    debug!("RX timeout with no data");
                } else {
                    debug!("RX hard timeout: {}", escape_log(&reply));
                }
                return Ok(RawReply {
                    text: reply,
                    terminated: false,
                });
            }
        }
    }

    /// Wait for a specific prompt substring (the `>` of a two-phase send).
    /// Returns false when the prompt never shows inside `timeout`.
    pub async fn wait_for_prompt(&mut self, prompt: &str, timeout: Duration) -> Result<bool> {
        let mut accumulated = String::new();
        let mut buf = [0u8; 64];
        let start = Instant::now();
        while start.elapsed() < timeout {
            let n = self.transport.read_bytes(&mut buf)?;
            if n > 0 {
                accumulated.push_str(&String::from_utf8_lossy(&buf[..n]));
                if accumulated.contains(prompt) {
                    return Ok(true);
                }
            } else {
                sleep(Duration::from_millis(5)).await;
            }
        }
        debug!("prompt {:?} not seen, got: {}", prompt, escape_log(&accumulated));
        Ok(false)
    }

    /// Read any unsolicited bytes sitting on the line (e.g. `+CMTI` lines).
    pub fn drain_unsolicited(&mut self) -> Result<String> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = self.transport.read_bytes(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn drain_pending(&mut self) {
        let mut buf = [0u8; 256];
        while let Ok(n) = self.transport.read_bytes(&mut buf) {
            if n == 0 {
                break;
            }
            trace!("flushed {} stale bytes", n);
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.tuning.command_timeout
    }
}

/// AT command surface of a SIM7600-class modem.
///
/// Thin wrappers over [`CommandEngine::execute`]; parsing lives in
/// [`parse`]. Protocol failures come back as sentinels (`-1`, `None`,
/// `false`), never as errors — only the transport itself can fail.
pub struct Modem {
    engine: CommandEngine,
}

impl Modem {
    pub fn new(transport: Box<dyn ByteTransport>, tuning: EngineTuning) -> Self {
        Self {
            engine: CommandEngine::new(transport, tuning),
        }
    }

    /// Open a serial connection with default engine timing.
    #[cfg(feature = "serial")]
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::new_serial(port_name, baud_rate, EngineTuning::default())
    }

    /// Open a serial connection with configured engine timing.
    #[cfg(feature = "serial")]
    pub fn new_serial(port_name: &str, baud_rate: u32, tuning: EngineTuning) -> Result<Self> {
        let transport = SerialTransport::open(port_name, baud_rate)?;
        Ok(Self::new(Box::new(transport), tuning))
    }

    /// Echo off, then connectivity probe. Call once after opening the port.
    pub async fn init(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        let _ = self.engine.execute("ATE0", timeout).await?;
        self.is_connected().await
    }

    pub async fn is_connected(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self.engine.execute("AT", timeout).await?.is_ok())
    }

    /// `AT+CSQ` RSSI, `-1` when unknown.
    pub async fn signal_quality(&mut self) -> Result<i32> {
        let timeout = self.engine.default_timeout();
        let reply = self.engine.execute("AT+CSQ", timeout).await?;
        Ok(parse::signal_quality(&reply.text))
    }

    /// `AT+COPS?` raw operator/status line, trimmed of framing.
    pub async fn network_status(&mut self) -> Result<String> {
        let timeout = self.engine.default_timeout();
        let reply = self.engine.execute("AT+COPS?", timeout).await?;
        Ok(reply
            .text
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("+COPS:"))
            .unwrap_or("")
            .to_string())
    }

    /// `AT+CCLK?` network time in modem-local form.
    pub async fn network_time(&mut self) -> Result<Option<String>> {
        let timeout = self.engine.default_timeout();
        let reply = self.engine.execute("AT+CCLK?", timeout).await?;
        Ok(parse::network_time(&reply.text))
    }

    /// Local timestamp for an outbound record: network time, or the fixed
    /// fallback when the query yields nothing.
    pub async fn network_time_or_fallback(&mut self) -> Result<String> {
        match self.network_time().await? {
            Some(t) => Ok(t),
            None => {
                warn!("network time unavailable, using fallback timestamp");
                Ok(FALLBACK_LOCAL_TIME.to_string())
            }
        }
    }

    /// `AT+CMGF=1`: text mode. Must precede any SMS operation.
    pub async fn set_text_mode(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self.engine.execute("AT+CMGF=1", timeout).await?.is_ok())
    }

    /// Stored-message count via `AT+CPMS?`, `-1` on a garbled reply.
    pub async fn storage_count(&mut self) -> Result<i32> {
        let timeout = self.engine.default_timeout();
        let reply = self.engine.execute("AT+CPMS?", timeout).await?;
        Ok(parse::storage_count(&reply.text))
    }

    /// `AT+CMGR=<index>`: read one message. Reply may be idle-framed.
    pub async fn read_sms(&mut self, index: u32) -> Result<String> {
        let timeout = self.engine.default_timeout();
        let reply = self
            .engine
            .execute(&format!("AT+CMGR={index}"), timeout)
            .await?;
        Ok(reply.text)
    }

    /// `AT+CMGRD=<index>`: read and delete in one exchange. This reply is
    /// the canonical idle-framed case — it often arrives without `OK`.
    pub async fn read_and_delete_sms(&mut self, index: u32) -> Result<String> {
        let timeout = self.engine.default_timeout();
        let reply = self
            .engine
            .execute(&format!("AT+CMGRD={index}"), timeout)
            .await?;
        Ok(reply.text)
    }

    /// `AT+CMGD=<index>`: delete one stored message.
    pub async fn delete_sms(&mut self, index: u32) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self
            .engine
            .execute(&format!("AT+CMGD={index}"), timeout)
            .await?
            .is_ok())
    }

    /// `AT+CMGDA="DEL ALL"`: bulk delete.
    pub async fn delete_all_sms(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self
            .engine
            .execute("AT+CMGDA=\"DEL ALL\"", timeout)
            .await?
            .is_ok())
    }

    /// Two-phase text-mode send: `AT+CMGS="+<number>"`, wait for the `>`
    /// prompt, then body + Ctrl-Z. A missing prompt abandons the send and
    /// returns false; nothing has been transmitted past the header.
    pub async fn send_sms(&mut self, number: &str, body: &str) -> Result<bool> {
        if !self.set_text_mode().await? {
            return Ok(false);
        }
        let number = number.trim_start_matches('+');
        self.engine.write_raw(&format!("AT+CMGS=\"+{number}\"\r"))?;
        if !self
            .engine
            .wait_for_prompt(">", Duration::from_millis(1500))
            .await?
        {
            warn!("SMS send abandoned: no recipient prompt for +{number}");
            return Ok(false);
        }
        self.engine.write_raw(body)?;
        self.engine.write_raw(SMS_BODY_TERMINATOR)?;
        let reply = self.engine.collect_reply(Duration::from_secs(10)).await?;
        Ok(reply.is_ok())
    }

    /// `AT+CLIP=1`: caller-ID presentation on incoming calls.
    pub async fn enable_caller_id(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self.engine.execute("AT+CLIP=1", timeout).await?.is_ok())
    }

    /// `ATD+<number>;`: voice dial. Routes audio and sets volume first.
    pub async fn dial(&mut self, number: &str) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        let _ = self.set_audio_route(1).await?;
        let _ = self.set_volume(5).await?;
        let number = number.trim_start_matches('+');
        Ok(self
            .engine
            .execute(&format!("ATD+{number};"), timeout)
            .await?
            .is_ok())
    }

    /// `ATA`: answer an incoming call.
    pub async fn answer(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self.engine.execute("ATA", timeout).await?.is_ok())
    }

    /// `AT+CHUP`: hang up.
    pub async fn hang_up(&mut self) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self.engine.execute("AT+CHUP", timeout).await?.is_ok())
    }

    /// `AT+CSDVC=<route>`: audio output route (1 = headphones).
    pub async fn set_audio_route(&mut self, route: u8) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self
            .engine
            .execute(&format!("AT+CSDVC={route}"), timeout)
            .await?
            .is_ok())
    }

    /// `AT+CLVL=<level>`: speaker volume.
    pub async fn set_volume(&mut self, level: u8) -> Result<bool> {
        let timeout = self.engine.default_timeout();
        Ok(self
            .engine
            .execute(&format!("AT+CLVL={level}"), timeout)
            .await?
            .is_ok())
    }

    /// Pull any unsolicited result codes off the line without sending.
    pub fn drain_unsolicited(&mut self) -> Result<String> {
        self.engine.drain_unsolicited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mock: MockTransport) -> CommandEngine {
        CommandEngine::new(
            Box::new(mock),
            EngineTuning {
                idle_timeout: Duration::from_millis(30),
                command_timeout: Duration::from_millis(200),
            },
        )
    }

    #[tokio::test]
    async fn execute_frames_on_terminal_sentinel() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\n+CSQ: 21,99\r\n\r\nOK\r\n");
        let mut eng = engine(mock);
        let reply = eng
            .execute("AT+CSQ", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(reply.terminated);
        assert_eq!(parse::signal_quality(&reply.text), 21);
    }

    #[tokio::test]
    async fn execute_frames_on_idle_silence() {
        let mut mock = MockTransport::new();
        // No trailing OK: the idle window must close the reply.
        mock.push_reply("+CMGRD: \"REC READ\",\"+1555\",\"\",\"26/01/04,19:04:26-32\"\r\nhi");
        let mut eng = engine(mock);
        let reply = eng
            .execute("AT+CMGRD=1", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(!reply.terminated);
        assert!(reply.text.ends_with("hi"));
    }

    #[tokio::test]
    async fn execute_returns_empty_on_hard_timeout() {
        let mock = MockTransport::new(); // nothing scripted
        let mut eng = engine(mock);
        let reply = eng
            .execute("AT", Duration::from_millis(60))
            .await
            .unwrap();
        assert!(!reply.terminated);
        assert!(reply.text.is_empty());
    }

    #[tokio::test]
    async fn error_sentinel_terminates_reply() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nERROR\r\n");
        let mut eng = engine(mock);
        let reply = eng
            .execute("AT+CMGR=99", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(reply.terminated);
        assert!(!reply.is_ok());
    }

    #[tokio::test]
    async fn commands_end_with_carriage_return_only() {
        let mut mock = MockTransport::new();
        mock.push_reply("\r\nOK\r\n");
        let writes = mock.writes_handle();
        let mut eng = engine(mock);
        let _ = eng.execute("AT", Duration::from_millis(200)).await.unwrap();
        assert_eq!(
            written_lines(&writes),
            vec!["AT".to_string(), "\r".to_string()]
        );
    }
}
