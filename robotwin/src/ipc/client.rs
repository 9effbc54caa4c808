//! Lockstep firmware client.
//!
//! One background reader thread per connection decodes incoming frames.
//! OutputState frames go to the stepping caller over an mpsc channel; Serial,
//! Log, Error and HelloAck frames update a per-board cache behind a single
//! mutex, in arrival order.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::protocol::{
    self, Capabilities, ErrorPayload, LoadProgram, LogLevel, LogPayload, MemoryPatch, MessageType,
    OutputState, ProtocolError, SerialPayload, StepPayload,
};
use super::{FirmwareEngine, FirmwareStepRequest, FirmwareStepResult};

/// Firmware client failures. Everything except `Firmware` tears the
/// connection down.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out waiting for firmware output")]
    Timeout,

    #[error("not connected to firmware")]
    NotConnected,

    #[error("reconnect attempted too soon")]
    Backoff,

    #[error("firmware connection closed: {0}")]
    Disconnected(String),

    #[error("firmware error {code}: {message}")]
    Firmware { code: u32, message: String },
}

/// Where the firmware engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// `host:port` strings are TCP; anything else is a socket path on unix.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        #[cfg(unix)]
        {
            if value.starts_with('/') || value.starts_with('.') || !value.contains(':') {
                return Self::Unix(PathBuf::from(value));
            }
        }
        Self::Tcp(value.to_string())
    }

    fn connect(&self, timeout: Duration) -> io::Result<Stream> {
        match self {
            Self::Tcp(address) => {
                let mut last_err = None;
                for addr in address.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            return Ok(Stream::Tcp(stream));
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", address))
                }))
            }
            #[cfg(unix)]
            Self::Unix(path) => Ok(Stream::Unix(std::os::unix::net::UnixStream::connect(path)?)),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "{}", address),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Stream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    fn shutdown(&self) {
        let _ = match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

/// Firmware process to start before connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    /// Extra arguments appended after `--pipe {endpoint} --lockstep`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Client configuration. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareClientOptions {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub step_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub launch: Option<LaunchOptions>,
}

impl Default for FirmwareClientOptions {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5750".to_string(),
            connect_timeout_ms: 1000,
            step_timeout_ms: 2000,
            reconnect_interval_ms: 1000,
            join_timeout_ms: 500,
            launch: None,
        }
    }
}

impl FirmwareClientOptions {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// A firmware log line kept in the board cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareLog {
    pub level: LogLevel,
    pub text: String,
}

#[derive(Debug, Default)]
struct BoardCache {
    serial: String,
    logs: Vec<FirmwareLog>,
    last_error: Option<(u32, String)>,
}

#[derive(Debug, Default)]
struct SharedState {
    boards: HashMap<String, BoardCache>,
    server: Option<Capabilities>,
}

enum ReaderEvent {
    Output(OutputState),
    Error(ErrorPayload),
    Closed(String),
}

struct Connection {
    writer: Stream,
    events: Receiver<ReaderEvent>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Lockstep client for an external firmware engine.
pub struct FirmwareClient {
    options: FirmwareClientOptions,
    endpoint: Endpoint,
    connection: Option<Connection>,
    shared: Arc<Mutex<SharedState>>,
    programs: BTreeMap<String, (String, Vec<u8>)>,
    next_sequence: u32,
    last_attempt: Option<Instant>,
    stale_outputs: u64,
    process: Option<Child>,
}

impl FirmwareClient {
    pub fn new(options: FirmwareClientOptions) -> Self {
        let endpoint = Endpoint::parse(&options.endpoint);
        Self {
            options,
            endpoint,
            connection: None,
            shared: Arc::new(Mutex::new(SharedState::default())),
            programs: BTreeMap::new(),
            next_sequence: 1,
            last_attempt: None,
            stale_outputs: 0,
            process: None,
        }
    }

    pub fn options(&self) -> &FirmwareClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// OutputState frames dropped because they answered an older step.
    pub fn stale_outputs(&self) -> u64 {
        self.stale_outputs
    }

    /// Capabilities from the last HelloAck.
    pub fn server_capabilities(&self) -> Option<Capabilities> {
        self.state().server
    }

    /// Drain serial output buffered for a board.
    pub fn take_serial(&self, board_id: &str) -> String {
        self.state()
            .boards
            .get_mut(board_id)
            .map(|b| std::mem::take(&mut b.serial))
            .unwrap_or_default()
    }

    pub fn logs(&self, board_id: &str) -> Vec<FirmwareLog> {
        self.state()
            .boards
            .get(board_id)
            .map(|b| b.logs.clone())
            .unwrap_or_default()
    }

    pub fn last_error(&self, board_id: &str) -> Option<(u32, String)> {
        self.state()
            .boards
            .get(board_id)
            .and_then(|b| b.last_error.clone())
    }

    fn state(&self) -> MutexGuard<'_, SharedState> {
        lock(&self.shared)
    }

    /// Connect if needed. Attempts are spaced at least
    /// `reconnect_interval_ms` apart.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let interval = Duration::from_millis(self.options.reconnect_interval_ms);
        if let Some(last) = self.last_attempt {
            if last.elapsed() < interval {
                return Err(ClientError::Backoff);
            }
        }
        self.last_attempt = Some(Instant::now());

        self.ensure_process()?;

        let timeout = Duration::from_millis(self.options.connect_timeout_ms.max(1));
        let stream = self.endpoint.connect(timeout)?;
        let reader_stream = stream.try_clone()?;
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(reader_stream, tx, Arc::clone(&shutdown), Arc::clone(&self.shared))?;

        self.connection = Some(Connection {
            writer: stream,
            events: rx,
            shutdown,
            reader: Some(reader),
        });
        info!(endpoint = %self.endpoint, "connected to firmware");

        let hello = Capabilities::client().encode();
        self.send(MessageType::Hello, &hello)?;

        let programs: Vec<(String, String, Vec<u8>)> = self
            .programs
            .iter()
            .map(|(id, (profile, image))| (id.clone(), profile.clone(), image.clone()))
            .collect();
        for (board_id, board_profile, image) in programs {
            debug!(board = %board_id, bytes = image.len(), "re-sending program");
            let payload = LoadProgram {
                board_id,
                board_profile,
                image,
            }
            .encode();
            self.send(MessageType::LoadProgram, &payload)?;
        }
        Ok(())
    }

    fn ensure_process(&mut self) -> Result<(), ClientError> {
        let Some(launch) = self.options.launch.clone() else {
            return Ok(());
        };
        if let Some(child) = self.process.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(());
            }
        }
        info!(executable = %launch.executable.display(), "launching firmware engine");
        let child = Command::new(&launch.executable)
            .arg("--pipe")
            .arg(self.endpoint.to_string())
            .arg("--lockstep")
            .args(&launch.extra_args)
            .stdin(Stdio::null())
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    fn sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    /// Write one frame, tearing the connection down on failure.
    fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<u32, ClientError> {
        let sequence = self.sequence();
        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if let Err(e) = protocol::write_frame(&mut connection.writer, msg_type, sequence, payload) {
            warn!(error = %e, "firmware write failed");
            self.teardown();
            return Err(e.into());
        }
        Ok(sequence)
    }

    /// Send a memory patch to the firmware.
    pub fn patch_memory(&mut self, patch: &MemoryPatch) -> Result<(), ClientError> {
        self.connect()?;
        self.send(MessageType::MemoryPatch, &patch.encode()).map(|_| ())
    }

    /// Close the connection and stop a launched firmware process.
    pub fn disconnect(&mut self) {
        self.teardown();
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "firmware process already exited");
            }
            let _ = child.wait();
        }
    }

    fn teardown(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.shutdown.store(true, Ordering::SeqCst);
        connection.writer.shutdown();
        if let Some(handle) = connection.reader.take() {
            let deadline = Instant::now() + Duration::from_millis(self.options.join_timeout_ms);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("firmware reader did not stop in time; detaching");
            }
        }
        info!(endpoint = %self.endpoint, "disconnected from firmware");
    }
}

impl FirmwareEngine for FirmwareClient {
    fn load_program(&mut self, board_id: &str, board_profile: &str, image: &[u8]) -> Result<(), ClientError> {
        self.programs.insert(
            board_id.to_string(),
            (board_profile.to_string(), image.to_vec()),
        );
        if self.connection.is_none() {
            // Connecting sends every stored program.
            return self.connect();
        }
        let payload = LoadProgram {
            board_id: board_id.to_string(),
            board_profile: board_profile.to_string(),
            image: image.to_vec(),
        }
        .encode();
        self.send(MessageType::LoadProgram, &payload).map(|_| ())
    }

    fn step(&mut self, request: &FirmwareStepRequest) -> Result<FirmwareStepResult, ClientError> {
        self.connect()?;
        let payload = StepPayload::from_inputs(
            &request.board_id,
            request.delta_micros,
            &request.pins,
            &request.analog,
        )
        .encode();
        let sequence = self.send(MessageType::Step, &payload)?;

        let deadline = Instant::now() + Duration::from_millis(self.options.step_timeout_ms);
        loop {
            let Some(connection) = self.connection.as_ref() else {
                return Err(ClientError::NotConnected);
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(board = %request.board_id, sequence, "firmware step timed out");
                self.teardown();
                return Err(ClientError::Timeout);
            }
            match connection.events.recv_timeout(remaining) {
                Ok(ReaderEvent::Output(output)) => {
                    let lag = if output.board_id == request.board_id {
                        sequence_lag(sequence, output.sequence)
                    } else {
                        Some(u32::MAX)
                    };
                    match lag {
                        Some(0) => {}
                        Some(_) => {
                            self.stale_outputs += 1;
                            debug!(board = %output.board_id, got = output.sequence, want = sequence, "dropping stale output");
                            continue;
                        }
                        None => {
                            warn!(got = output.sequence, want = sequence, "output from the future ignored");
                            continue;
                        }
                    }
                    return Ok(FirmwareStepResult {
                        step_sequence: request.step_sequence,
                        pins: output.pin_levels(),
                        serial: self.take_serial(&request.board_id),
                    });
                }
                Ok(ReaderEvent::Error(err)) => {
                    if err.board_id.is_empty() || err.board_id == request.board_id {
                        return Err(ClientError::Firmware {
                            code: err.code,
                            message: err.message,
                        });
                    }
                }
                Ok(ReaderEvent::Closed(reason)) => {
                    self.teardown();
                    return Err(ClientError::Disconnected(reason));
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(board = %request.board_id, sequence, "firmware step timed out");
                    self.teardown();
                    return Err(ClientError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.teardown();
                    return Err(ClientError::Disconnected("reader stopped".into()));
                }
            }
        }
    }
}

impl Drop for FirmwareClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// How many sequence numbers `got` trails `want`, with `u32` wraparound.
/// `None` when `got` is ahead.
fn sequence_lag(want: u32, got: u64) -> Option<u32> {
    let lag = want.wrapping_sub(got as u32);
    (lag < 1 << 31).then_some(lag)
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    // A panicked reader leaves the cache usable.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_reader(
    mut stream: Stream,
    events: Sender<ReaderEvent>,
    shutdown: Arc<AtomicBool>,
    shared: Arc<Mutex<SharedState>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("firmware-reader".into())
        .spawn(move || loop {
            let frame = match protocol::read_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    if !shutdown.load(Ordering::SeqCst) {
                        warn!(error = %e, "firmware reader stopped");
                        let _ = events.send(ReaderEvent::Closed(e.to_string()));
                    }
                    return;
                }
            };
            if let Err(e) = dispatch(frame, &events, &shared) {
                warn!(error = %e, reason = e.reason(), "dropping malformed firmware frame");
            }
        })
}

fn dispatch(
    frame: protocol::Frame,
    events: &Sender<ReaderEvent>,
    shared: &Mutex<SharedState>,
) -> Result<(), ProtocolError> {
    let payload = &frame.payload;
    match frame.header.message_type() {
        Some(MessageType::OutputState) => {
            let _ = events.send(ReaderEvent::Output(OutputState::decode(payload)?));
        }
        Some(MessageType::HelloAck) => {
            let caps = Capabilities::decode(payload)?;
            debug!(flags = caps.flags, pins = caps.pin_count, "firmware hello ack");
            lock(shared).server = Some(caps);
        }
        Some(MessageType::Serial) => {
            let serial = SerialPayload::decode(payload)?;
            let text = serial.text();
            lock(shared)
                .boards
                .entry(serial.board_id)
                .or_default()
                .serial
                .push_str(&text);
        }
        Some(MessageType::Log) => {
            let log = LogPayload::decode(payload)?;
            match log.level {
                LogLevel::Error => error!(board = %log.board_id, "{}", log.text),
                LogLevel::Warning => warn!(board = %log.board_id, "{}", log.text),
                _ => info!(board = %log.board_id, "{}", log.text),
            }
            lock(shared)
                .boards
                .entry(log.board_id)
                .or_default()
                .logs
                .push(FirmwareLog {
                    level: log.level,
                    text: log.text,
                });
        }
        Some(MessageType::Error) => {
            let err = ErrorPayload::decode(payload)?;
            error!(board = %err.board_id, code = err.code, "{}", err.message);
            lock(shared)
                .boards
                .entry(err.board_id.clone())
                .or_default()
                .last_error = Some((err.code, err.message.clone()));
            let _ = events.send(ReaderEvent::Error(err));
        }
        Some(MessageType::Status) => {
            debug!(bytes = payload.len(), "firmware status");
        }
        other => {
            debug!(msg_type = frame.header.msg_type, known = other.is_some(), "ignoring firmware frame");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_sequence_lag_wraps() {
        assert_eq!(sequence_lag(7, 7), Some(0));
        assert_eq!(sequence_lag(7, 5), Some(2));
        assert_eq!(sequence_lag(7, 9), None);
        assert_eq!(sequence_lag(1, u32::MAX as u64), Some(2));
        assert_eq!(sequence_lag(u32::MAX, 1), None);
        assert_eq!(sequence_lag(0, u32::MAX as u64), Some(1));
    }

    #[test]
    fn test_sequence_counter_wraps_through_zero() {
        let mut client = FirmwareClient::new(FirmwareClientOptions::default());
        client.next_sequence = u32::MAX;
        assert_eq!(client.sequence(), u32::MAX);
        assert_eq!(client.sequence(), 0);
        assert_eq!(client.sequence(), 1);
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("127.0.0.1:4000"), Endpoint::Tcp("127.0.0.1:4000".into()));
        #[cfg(unix)]
        assert_eq!(
            Endpoint::parse("/tmp/robotwin.sock"),
            Endpoint::Unix(PathBuf::from("/tmp/robotwin.sock"))
        );
    }

    #[test]
    fn test_options_defaults_from_json() {
        let options: FirmwareClientOptions =
            serde_json::from_str(r#"{ "endpoint": "localhost:9000" }"#).unwrap();
        assert_eq!(options.endpoint, "localhost:9000");
        assert_eq!(options.step_timeout_ms, 2000);
        assert_eq!(options.reconnect_interval_ms, 1000);
        assert_eq!(options.join_timeout_ms, 500);
        assert!(options.launch.is_none());
    }

    #[test]
    fn test_reconnect_backoff() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut client = FirmwareClient::new(FirmwareClientOptions {
            endpoint: format!("127.0.0.1:{}", port),
            connect_timeout_ms: 200,
            reconnect_interval_ms: 60_000,
            ..FirmwareClientOptions::default()
        });
        assert!(matches!(client.connect(), Err(ClientError::Io(_))));
        assert!(matches!(client.connect(), Err(ClientError::Backoff)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_step_without_server_fails_fast() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut client = FirmwareClient::new(FirmwareClientOptions {
            endpoint: format!("127.0.0.1:{}", port),
            connect_timeout_ms: 200,
            ..FirmwareClientOptions::default()
        });
        let request = FirmwareStepRequest::new("U1", 1, 1000);
        assert!(client.step(&request).is_err());
    }
}
