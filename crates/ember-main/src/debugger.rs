//! Script debuggers.
//!
//! `-d` attaches a [`LocalDebugger`] that reports to stderr. `--remote-debug
//! host:port` attaches a [`RemoteDebugger`] speaking newline-delimited JSON
//! over TCP:
//!
//! ```text
//! {"type":"breakpoint","source":"res://main.ems","line":12}
//! {"type":"frame_times","frame_time_us":16000,"idle_time_us":900,...}
//! {"type":"poll"}
//! ```
//!
//! The peer may send `{"type":"skip_breakpoints","value":true}` lines back,
//! which are picked up by [`ScriptDebugger::poll`].

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Breakpoint;
use crate::error::BootError;

/// Timings reported to the debugger once per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameTimes {
    pub frame_time_us: u64,
    pub idle_time_us: u64,
    pub physics_time_us: u64,
    /// Length of one physics step, in seconds.
    pub physics_frame_time: f64,
}

pub trait ScriptDebugger {
    fn name(&self) -> &str;

    fn insert_breakpoint(&mut self, line: u32, source: &str);

    fn breakpoints(&self) -> &[Breakpoint];

    fn set_skip_breakpoints(&mut self, skip: bool);

    fn is_skipping_breakpoints(&self) -> bool;

    fn add_frame_times(&mut self, times: FrameTimes);

    /// Exchange pending messages with the debugger front end.
    fn poll(&mut self) {}

    fn profiling_start(&mut self) {}

    fn profiling_stop(&mut self) {}
}

// ---------------------------------------------------------------------------
// LocalDebugger
// ---------------------------------------------------------------------------

/// Debugger that writes to a local sink, stderr by default.
pub struct LocalDebugger {
    sink: Box<dyn Write>,
    breakpoints: Vec<Breakpoint>,
    skip_breakpoints: bool,
    profiling: bool,
    last_frame: Option<FrameTimes>,
}

impl LocalDebugger {
    pub fn new() -> Self {
        Self::with_sink(Box::new(std::io::stderr()))
    }

    pub fn with_sink(sink: Box<dyn Write>) -> Self {
        Self {
            sink,
            breakpoints: Vec::new(),
            skip_breakpoints: false,
            profiling: false,
            last_frame: None,
        }
    }

    pub fn last_frame(&self) -> Option<FrameTimes> {
        self.last_frame
    }

    fn report(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.sink, "{line}") {
            tracing::debug!(error = %e, "local debugger write failed");
        }
    }
}

impl Default for LocalDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptDebugger for LocalDebugger {
    fn name(&self) -> &str {
        "local"
    }

    fn insert_breakpoint(&mut self, line: u32, source: &str) {
        self.report(format_args!("Breakpoint inserted at {source}:{line}"));
        self.breakpoints.push(Breakpoint {
            source: source.to_string(),
            line,
        });
    }

    fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    fn set_skip_breakpoints(&mut self, skip: bool) {
        self.skip_breakpoints = skip;
    }

    fn is_skipping_breakpoints(&self) -> bool {
        self.skip_breakpoints
    }

    fn add_frame_times(&mut self, times: FrameTimes) {
        if self.profiling {
            self.report(format_args!(
                "frame {}us idle {}us physics {}us",
                times.frame_time_us, times.idle_time_us, times.physics_time_us
            ));
        }
        self.last_frame = Some(times);
    }

    fn profiling_start(&mut self) {
        self.profiling = true;
    }

    fn profiling_stop(&mut self) {
        self.profiling = false;
    }
}

// ---------------------------------------------------------------------------
// RemoteDebugger
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outgoing<'a> {
    Breakpoint { source: &'a str, line: u32 },
    FrameTimes(FrameTimes),
    Poll,
    Profiling { enabled: bool },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Incoming {
    SkipBreakpoints { value: bool },
}

/// Debugger connected to a remote front end.
pub struct RemoteDebugger {
    endpoint: String,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    breakpoints: Vec<Breakpoint>,
    skip_breakpoints: bool,
    sent: u64,
}

impl RemoteDebugger {
    /// Connect to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self, BootError> {
        let endpoint = format!("{host}:{port}");
        let connect_error = |e: std::io::Error| BootError::RemoteConnect {
            what: "remote debugger",
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        };
        let stream = TcpStream::connect(&endpoint).map_err(connect_error)?;
        stream.set_nodelay(true).map_err(connect_error)?;
        let read_half = stream.try_clone().map_err(connect_error)?;
        read_half
            .set_read_timeout(Some(Duration::from_millis(1)))
            .map_err(connect_error)?;
        tracing::info!(endpoint = %endpoint, "remote debugger connected");
        Ok(Self {
            endpoint,
            stream,
            reader: BufReader::new(read_half),
            breakpoints: Vec::new(),
            skip_breakpoints: false,
            sent: 0,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Messages written so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn send(&mut self, message: &Outgoing<'_>) {
        let result = serde_json::to_string(message)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(self.stream, "{line}"));
        match result {
            Ok(()) => self.sent += 1,
            Err(e) => tracing::warn!(endpoint = %self.endpoint, error = %e, "remote debugger send failed"),
        }
    }

    fn receive(&mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => match serde_json::from_str::<Incoming>(line.trim()) {
                    Ok(Incoming::SkipBreakpoints { value }) => self.skip_breakpoints = value,
                    Err(e) => tracing::debug!(error = %e, "ignoring debugger message"),
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    break
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "remote debugger read failed");
                    break;
                }
            }
        }
    }
}

impl ScriptDebugger for RemoteDebugger {
    fn name(&self) -> &str {
        "remote"
    }

    fn insert_breakpoint(&mut self, line: u32, source: &str) {
        self.send(&Outgoing::Breakpoint { source, line });
        self.breakpoints.push(Breakpoint {
            source: source.to_string(),
            line,
        });
    }

    fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    fn set_skip_breakpoints(&mut self, skip: bool) {
        self.skip_breakpoints = skip;
    }

    fn is_skipping_breakpoints(&self) -> bool {
        self.skip_breakpoints
    }

    fn add_frame_times(&mut self, times: FrameTimes) {
        self.send(&Outgoing::FrameTimes(times));
    }

    fn poll(&mut self) {
        self.send(&Outgoing::Poll);
        self.receive();
    }

    fn profiling_start(&mut self) {
        self.send(&Outgoing::Profiling { enabled: true });
    }

    fn profiling_stop(&mut self) {
        self.send(&Outgoing::Profiling { enabled: false });
    }
}

impl std::fmt::Debug for RemoteDebugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDebugger")
            .field("endpoint", &self.endpoint)
            .field("breakpoints", &self.breakpoints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn local_debugger_reports_breakpoints() {
        let sink = Shared::default();
        let mut debugger = LocalDebugger::with_sink(Box::new(sink.clone()));
        debugger.insert_breakpoint(12, "res://main.ems");
        debugger.add_frame_times(FrameTimes {
            frame_time_us: 16_000,
            ..FrameTimes::default()
        });

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "Breakpoint inserted at res://main.ems:12\n");
        assert_eq!(debugger.breakpoints().len(), 1);
        assert_eq!(debugger.last_frame().unwrap().frame_time_us, 16_000);
    }

    #[test]
    fn remote_debugger_speaks_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            writeln!(stream, r#"{{"type":"skip_breakpoints","value":true}}"#).unwrap();
            let mut reader = BufReader::new(stream);
            let mut lines = Vec::new();
            for _ in 0..2 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                lines.push(line);
            }
            lines
        });

        let mut debugger = RemoteDebugger::connect("127.0.0.1", port).unwrap();
        debugger.insert_breakpoint(3, "res://a.ems");
        // Give the peer's message time to arrive before the short-timeout read.
        std::thread::sleep(Duration::from_millis(50));
        debugger.poll();

        let lines = peer.join().unwrap();
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["type"], "breakpoint");
        assert_eq!(first["line"], 3);
        assert!(lines[1].contains("\"poll\""));
        assert!(debugger.is_skipping_breakpoints());
        assert_eq!(debugger.sent(), 2);
    }

    #[test]
    fn refused_connection_is_a_remote_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = RemoteDebugger::connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, BootError::RemoteConnect { what: "remote debugger", .. }));
    }
}
