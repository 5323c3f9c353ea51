//! An in-memory instrument standing in for real hardware in tests. It
//! answers the wire commands the engine sends, keeps enough state for the
//! interesting scenarios (integration transitions, data item selection,
//! queued error codes) and records every line it receives so tests can
//! assert on the traffic.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::ReadBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeModel {
    Wt310,
    Wt210,
    /// Something that is not a power meter at all; rejects every
    /// family-specific command.
    Generic,
}

/// The wire names the WT210 reports enabled data items in, in its canonical
/// order.
const WT210_WIRE_ORDER: &[&str] = &[
    "V", "A", "W", "Va", "Var", "PF", "Degree", "VHz", "AHz", "Wh", "Whp", "Whm", "Ah", "Ahp",
    "Ahm", "Vpk", "Apk", "Time", "Math",
];

pub(crate) struct FakeState {
    model: FakeModel,
    settings: HashMap<String, String>,
    integration: &'static str,
    next_error: Option<(i32, &'static str)>,
    /// Every line the client sent, in order.
    pub(crate) sent: Vec<String>,
    /// How many times to transiently reject the line filter query; models
    /// do that right after integration starts.
    pub(crate) lfilt_transient: u32,
    item_count: usize,
    out: VecDeque<u8>,
    line_buf: Vec<u8>,
}

impl FakeState {
    fn new(model: FakeModel) -> Self {
        FakeState {
            model,
            settings: HashMap::new(),
            integration: "RESET",
            next_error: None,
            sent: Vec::new(),
            lfilt_transient: 0,
            item_count: 4,
            out: VecDeque::new(),
            line_buf: Vec::new(),
        }
    }

    pub(crate) fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub(crate) fn sent_contains(&self, needle: &str) -> bool {
        self.sent.iter().any(|line| line == needle)
    }

    pub(crate) fn integration_state(&self) -> &'static str {
        self.integration
    }

    pub(crate) fn force_integration(&mut self, state: &'static str) {
        self.integration = state;
    }

    fn push_line(&mut self, line: &str) {
        self.out.extend(line.as_bytes());
        self.out.push_back(b'\n');
    }

    fn queue_error(&mut self, code: i32, msg: &'static str) {
        self.next_error = Some((code, msg));
    }

    fn handle_line(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        self.sent.push(line.clone());

        if let Some(query) = line.strip_suffix('?') {
            let response = self.query(query);
            self.push_line(&response);
            return;
        }

        match line.split_once(' ') {
            Some((key, arg)) => self.apply(key, arg),
            None => self.apply(&line, ""),
        }
    }

    fn query(&mut self, key: &str) -> String {
        match key {
            "*IDN" => match self.model {
                FakeModel::Wt310 => "YOKOGAWA,WT310,91K123456,F1.03".to_string(),
                FakeModel::Wt210 => "YOKOGAWA,760401,0,1.01".to_string(),
                FakeModel::Generic => "ACME,GIZMO,0,0.1".to_string(),
            },
            "*OPT" => "EX1".to_string(),
            "*CAL" => "0".to_string(),
            ":STAT:ERR" => match self.next_error.take() {
                Some((code, msg)) => format!("{code},\"{msg}\""),
                None => "0,\"NO ERROR\"".to_string(),
            },
            ":STAT:EESR" => "0".to_string(),
            ":INTEG:STAT" => self.integration.to_string(),
            ":NUM:NORM:VAL" => (0..self.item_count)
                .map(|slot| slot_value(slot).to_string())
                .collect::<Vec<_>>()
                .join(","),
            ":MEAS:VAL" => {
                let values: Vec<String> = WT210_WIRE_ORDER
                    .iter()
                    .filter(|name| self.wt210_item_enabled(name))
                    .enumerate()
                    .map(|(slot, _)| slot_value(slot).to_string())
                    .collect();
                values.join(",")
            }
            ":MATH" if self.model == FakeModel::Wt210 => self.wt210_math(),
            ":CONF:LFILT" if self.lfilt_transient > 0 => {
                self.lfilt_transient -= 1;
                self.queue_error(813, "TRANSIENT INTEGRATOR BUSY");
                "0".to_string()
            }
            _ => {
                if self.reject_unknown(key) {
                    self.queue_error(100, "UNKNOWN COMMAND");
                    return "0".to_string();
                }
                self.settings
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| default_response(key).to_string())
            }
        }
    }

    fn apply(&mut self, key: &str, arg: &str) {
        match key {
            "*RST" => {
                self.settings.clear();
                self.integration = "RESET";
            }
            "*CLS" => self.next_error = None,
            ":INTEG:STAR" => match self.integration {
                "RESET" | "STOP" => self.integration = "START",
                _ => self.queue_error(842, "INTEG START ERROR"),
            },
            ":INTEG:STOP" => match self.integration {
                "START" => self.integration = "STOP",
                _ => self.queue_error(844, "INTEG STOP ERROR"),
            },
            ":INTEG:RES" => match self.integration {
                "START" => self.queue_error(845, "INTEG RESET ERROR"),
                _ => self.integration = "RESET",
            },
            ":CONF:LFILT" if self.integration != "RESET" => {
                self.queue_error(813, "INTEGRATION IS RUNNING");
            }
            ":NUM:NORM:NUM" => {
                if let Ok(count) = arg.parse() {
                    self.item_count = count;
                }
                self.settings.insert(key.to_string(), arg.to_string());
            }
            _ => {
                if self.reject_unknown(key) {
                    self.queue_error(100, "UNKNOWN COMMAND");
                    return;
                }
                self.settings.insert(key.to_string(), arg.to_string());
            }
        }
    }

    /// Generic devices reject everything outside the status and
    /// communication command groups.
    fn reject_unknown(&self, key: &str) -> bool {
        self.model == FakeModel::Generic
            && key.starts_with(':')
            && !key.starts_with(":STAT")
            && !key.starts_with(":COMM")
    }

    fn wt210_item_enabled(&self, wire_name: &str) -> bool {
        self.settings
            .get(&format!(":MEAS:ITEM:{wire_name}"))
            .is_some_and(|value| value.eq_ignore_ascii_case("on"))
    }

    fn wt210_math(&self) -> String {
        let get = |key: &str, default: &str| {
            self.settings
                .get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        match get(":MATH:TYPE", "ARIT").as_str() {
            "CFAC" => format!("CFAC;{}", get(":MATH:CFAC", "V,1")),
            "AVER" => format!("AVER;{}", get(":MATH:AVER", "W,1")),
            _ => format!("ARITHMETIC;{}", get(":MATH:ARIT", "ADD").to_uppercase()),
        }
    }
}

/// Deterministic measurement value for a response slot.
fn slot_value(slot: usize) -> f64 {
    0.5 * (slot + 1) as f64
}

fn default_response(key: &str) -> &'static str {
    match key {
        ":SAMP:RATE" => "500.0E-03",
        ":INP:CURR:RANG" | ":CONF:CURR:RANG" => "1E+00",
        ":INP:VOLT:RANG" | ":CONF:VOLT:RANG" => "150.0E+00",
        ":INP:CFAC" | ":CONF:CFAC" => "3",
        ":INP:WIR" | ":CONF:WIR" => "P1W2",
        ":INP:MODE" | ":CONF:MODE" => "RMS",
        ":INP:SYNC" | ":CONF:SYNC" => "VOLTAGE",
        ":INTEG:MODE" => "NORMAL",
        ":INTEG:TIM" => "0,0,0",
        ":MEAS:AVER:TYPE" => "LINEAR",
        ":MEAS:AVER:COUN" => "8",
        ":CONF:AVER:TYPE" => "LINEAR,8",
        ":MATH" => "CFU1",
        ":NUM:FORM" => "ASCII",
        _ => "0",
    }
}

pub(crate) struct FakeMeter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMeter {
    pub(crate) fn new(model: FakeModel) -> (Self, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::new(model)));
        (
            FakeMeter {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    pub(crate) fn wt310() -> (Self, Arc<Mutex<FakeState>>) {
        Self::new(FakeModel::Wt310)
    }

    pub(crate) fn wt210() -> (Self, Arc<Mutex<FakeState>>) {
        Self::new(FakeModel::Wt210)
    }

    pub(crate) fn generic() -> (Self, Arc<Mutex<FakeState>>) {
        Self::new(FakeModel::Generic)
    }
}

impl tokio::io::AsyncWrite for FakeMeter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut state = self.state.lock().expect("fake state lock");
        for byte in buf {
            if *byte == b'\n' {
                let line = String::from_utf8_lossy(&state.line_buf).trim().to_string();
                state.line_buf.clear();
                state.handle_line(line);
            } else {
                state.line_buf.push(*byte);
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncRead for FakeMeter {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut state = self.state.lock().expect("fake state lock");
        while buf.remaining() > 0 {
            match state.out.pop_front() {
                Some(byte) => buf.put_slice(&[byte]),
                None => break,
            }
        }
        Poll::Ready(Ok(()))
    }
}
