//! Command descriptors and the tables they are collected in.
//!
//! A power meter model is described entirely by data: a map from the stable,
//! human-facing command names to descriptors carrying the wire command, the
//! accepted argument values, the value-transform chains ("tweaks") and, for
//! the handful of commands that need multi-step sequences, a custom handler
//! tag. The base table covers what all supported meters have in common; each
//! model module layers its own wire commands, choices and handlers on top,
//! last write wins.

use std::collections::{BTreeMap, HashMap};

use crate::proto::{ProtoError, Result};

/// Valid arguments for the "enable/disable" type of commands.
pub(crate) const ON_OFF: &[&str] = &["on", "off"];

/// The data items supported by all power meters.
pub(crate) const DATA_ITEMS: &[(&str, &str)] = &[
    ("V", "voltage"),
    ("I", "current"),
    ("P", "active power"),
    ("S", "apparent power"),
    ("Q", "reactive power"),
    ("Lambda", "power factor (λ)"),
    ("Phi", "phase difference (Φ)"),
    ("Fv", "voltage frequency"),
    ("Fi", "current frequency"),
    ("Wh", "watt-hours"),
    ("Whp", "positive watt-hours"),
    ("Whm", "negative watt-hours"),
    ("Ah", "ampere-hours"),
    ("Ahp", "positive ampere hours"),
    ("Ahm", "negative ampere hours"),
    ("Vmax", "maximum voltage"),
    ("Imax", "maximum current"),
    ("Time", "integration time"),
    ("Math", "value computed during integration"),
];

/// Virtual data items are generated on-the-fly in software.
pub(crate) const VDATA_ITEMS: &[(&str, &str)] = &[
    ("T", "time stamp at the end of the measurement interval"),
    ("J", "joules (calculated as power * interval)"),
];

/// Power meter math function names and descriptions.
pub(crate) const MATH_NAMES: &[(&str, &str)] = &[
    ("cfv", "voltage crest factor"),
    ("cfi", "current crest factor"),
    ("add", "A+B"),
    ("sub", "A-B"),
    ("mul", "A*B"),
    ("div", "A/B"),
    ("diva", "A/B^2"),
    ("divb", "A^2/B"),
    ("avw", "average active power"),
];

/// The extended-event status register bits, in bit order. Bit 0 ("upd")
/// falls when a measurement data update finishes.
pub(crate) const EESR_BITS: &[&str] = &[
    "upd", "itg", "itm", "ovrs", "fov", "str", "ovr1", "pov1", "poa1", "ovr2", "pov2", "poa2",
    "ovr3", "pov3", "poa3",
];

/// The public power meter commands common to all supported models, with the
/// human-readable description shown by the CLI. Commands without an entry
/// here exist only for internal use and cannot be dispatched from outside.
const COMMANDS: &[(&str, &str)] = &[
    ("get-id", "get the device identification string"),
    ("get-installed-opts", "get information about the installed device options"),
    ("get-current-auto-range", "check whether the automatic current range feature is enabled"),
    ("set-current-auto-range", "enable or disable the automatic current range feature"),
    ("get-current-range", "get current range in amperes"),
    ("set-current-range", "set current range in amperes"),
    ("get-voltage-auto-range", "check whether the automatic voltage range feature is enabled"),
    ("set-voltage-auto-range", "enable or disable the automatic voltage range feature"),
    ("get-voltage-range", "get voltage range in volts"),
    ("set-voltage-range", "set voltage range in volts"),
    ("get-interval", "get the data update interval in seconds"),
    ("set-interval", "set the data update interval in seconds"),
    ("configure-data-items", "set data items to read"),
    ("wait-data-update", "wait for data update"),
    ("read-data", "read power meter data"),
    ("get-crest-factor", "get crest factor"),
    ("set-crest-factor", "set crest factor"),
    ("get-smoothing-status", "check whether the smoothing feature is enabled or disabled"),
    ("set-smoothing-status", "enable or disable the smoothing feature"),
    ("get-smoothing-type", "get smoothing type"),
    ("set-smoothing-type", "set smoothing type"),
    ("get-smoothing-factor", "get the configured smoothing factor"),
    ("set-smoothing-factor", "set smoothing factor"),
    ("get-integration-mode", "get integration mode"),
    ("set-integration-mode", "set integration mode"),
    ("get-integration-state", "get integration state"),
    ("get-integration-timer", "get the integration timer value"),
    ("set-integration-timer", "set the integration timer value"),
    ("start-integration", "start integration"),
    ("stop-integration", "stop integration"),
    ("reset-integration", "reset integration"),
    ("get-math", "get the currently configured computation function"),
    ("set-math", "set the computation function"),
    ("get-remote-mode", "check whether the remote mode is enabled or disabled"),
    ("set-remote-mode", "enable or disable the remote mode"),
    ("get-local-mode", "check whether the local mode is enabled or disabled"),
    ("set-local-mode", "enable or disable the local mode"),
    ("get-wiring-system", "get the wiring system type"),
    ("factory-reset", "reset to the factory default settings"),
    ("calibrate", "execute zero-level compensation"),
    ("clear", "clear the device output queue"),
    ("get-measurement-mode", "get the measurement mode"),
    ("set-measurement-mode", "set the measurement mode"),
    ("get-sync-source", "get the information about the synchronization source"),
    ("set-sync-source", "set the synchronization source"),
    ("get-hold", "check whether the 'hold' feature is on or off"),
    ("set-hold", "switch the 'hold' feature on or off"),
    ("get-max-hold", "check whether the 'max hold' feature is on or off"),
    ("set-max-hold", "switch the 'max hold' feature on or off"),
    ("get-line-filter", "check if the line filter is enabled or disabled"),
    ("set-line-filter", "enable or disable the line filter"),
    ("get-freq-filter", "check if the frequency filter is enabled or disabled"),
    ("set-freq-filter", "enable or disable the frequency filter"),
];

/// Wire commands shared by all supported models.
const BASE_RAW: &[(&str, &str)] = &[
    ("get-id", "*IDN?"),
    ("get-installed-opts", "*OPT?"),
    ("get-interval", ":SAMP:RATE?"),
    ("set-interval", ":SAMP:RATE"),
    ("get-hold", ":SAMP:HOLD?"),
    ("set-hold", ":SAMP:HOLD"),
    ("get-integration-mode", ":INTEG:MODE?"),
    ("set-integration-mode", ":INTEG:MODE"),
    ("get-integration-timer", ":INTEG:TIM?"),
    ("set-integration-timer", ":INTEG:TIM"),
    ("start-integration", ":INTEG:STAR"),
    ("stop-integration", ":INTEG:STOP"),
    ("reset-integration", ":INTEG:RES"),
    ("get-math", ":MATH?"),
    ("get-remote-mode", ":COMM:REM?"),
    ("set-remote-mode", ":COMM:REM"),
    ("get-local-mode", ":COMM:LOCK?"),
    ("set-local-mode", ":COMM:LOCK"),
    ("factory-reset", "*RST"),
    ("calibrate", "*CAL?"),
    ("get-error-status", ":STAT:ERR?"),
    // The leading line feed makes *CLS also clear the output queue.
    ("clear", "\n*CLS"),
    ("set-verbose-errors", ":STAT:QMES"),
    ("set-headers", ":COMM:HEAD"),
    ("set-verbose-mode", ":COMM:VERB"),
    ("get-eesr", ":STAT:EESR?"),
];

/// Valid argument values for commands shared by all supported models. The
/// entries are applied to the commands that exist in the table being built,
/// absent commands are skipped.
const BASE_CHOICES: &[(&[&str], &[&str])] = &[
    (
        &["get-current-range", "set-current-range"],
        // Note: the extreme values also depend on the crest factor.
        &[
            "auto", "0.0025", "0.005", "0.01", "0.02", "0.05", "0.1", "0.2", "0.5", "1", "2", "5",
            "10", "20",
        ],
    ),
    (
        &["get-voltage-range", "set-voltage-range"],
        // Note: the extreme values also depend on the crest factor.
        &["auto", "7.5", "15", "30", "60", "75", "150", "300", "600"],
    ),
    (&["get-current-auto-range", "set-current-auto-range"], ON_OFF),
    (&["get-voltage-auto-range", "set-voltage-auto-range"], ON_OFF),
    (&["get-crest-factor", "set-crest-factor"], &["3", "6"]),
    (
        &["get-interval", "set-interval"],
        &["0.1", "0.25", "0.5", "1", "2", "5"],
    ),
    (&["get-line-filter", "set-line-filter"], ON_OFF),
    (&["get-freq-filter", "set-freq-filter"], ON_OFF),
    (&["get-smoothing-status", "set-smoothing-status"], ON_OFF),
    (
        &["get-smoothing-type", "set-smoothing-type"],
        &["linear", "exponent"],
    ),
    (
        &["get-smoothing-factor", "set-smoothing-factor"],
        &["8", "16", "32", "64"],
    ),
    (
        &["get-integration-mode", "set-integration-mode"],
        &["normal", "continuous"],
    ),
    (
        &["get-measurement-mode", "set-measurement-mode"],
        &["rms", "vmean", "dc"],
    ),
    (
        &["get-sync-source", "set-sync-source"],
        &["voltage", "current", "off"],
    ),
    (&["get-remote-mode", "set-remote-mode"], ON_OFF),
    (&["get-local-mode", "set-local-mode"], ON_OFF),
    (&["set-verbose-errors"], ON_OFF),
    (&["set-verbose-mode"], ON_OFF),
    (&["set-headers"], ON_OFF),
];

/// Tweaks shared by all supported models: (command, input chain, response
/// chain). An empty chain leaves whatever is already in the descriptor.
const BASE_TWEAKS: &[(&str, &[Tweak], &[Tweak])] = &[
    ("get-voltage-auto-range", &[], &[Tweak::OnOff]),
    ("get-current-auto-range", &[], &[Tweak::OnOff]),
    ("get-hold", &[], &[Tweak::OnOff]),
    ("get-max-hold", &[], &[Tweak::OnOff]),
    ("get-line-filter", &[], &[Tweak::OnOff]),
    ("get-freq-filter", &[], &[Tweak::OnOff]),
    ("get-smoothing-status", &[], &[Tweak::OnOff]),
    ("get-sync-source", &[], &[Tweak::ToLower]),
    ("get-measurement-mode", &[], &[Tweak::ToLower]),
    ("get-remote-mode", &[], &[Tweak::OnOff]),
    ("get-local-mode", &[], &[Tweak::OnOff]),
    ("get-voltage-range", &[], &[Tweak::FloatToStr]),
    ("get-current-range", &[], &[Tweak::FloatToStr]),
    ("get-interval", &[], &[Tweak::FloatToStr]),
    ("calibrate", &[], &[Tweak::SuccessFailure]),
    ("get-integration-mode", &[], &[Tweak::ToLower]),
    ("get-integration-timer", &[], &[Tweak::CsvToSeconds]),
    ("set-integration-timer", &[Tweak::SecondsToCsv], &[]),
];

/// A value transform applied to a command argument before it goes on the
/// wire, or to a response before it is returned to the caller. The variants
/// that translate data item or math function names need adapter state and
/// are resolved by the engine; the rest are plain string functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tweak {
    /// "0" becomes "off", anything else "on".
    OnOff,
    /// "0" becomes "success", anything else "failure".
    SuccessFailure,
    ToLower,
    /// Lowercase, then capitalize the first letter ("lambda" -> "Lambda").
    Capitalize,
    /// Reformat through f64, dropping superfluous zeros and exponents.
    FloatToStr,
    /// "h,m,s" -> total seconds.
    CsvToSeconds,
    /// Total seconds -> "h,m,s".
    SecondsToCsv,
    /// Remove the ",1" element suffix from a data item.
    FirstDataElement,
    /// Translate a data item from human to wire notation.
    ItemToWire,
    /// Translate a data item from wire to human notation.
    ItemFromWire,
    /// WT310: append the element number to a math function name and map
    /// "cfv" to the wire's "cfu".
    MathToWire,
    /// WT310: the inverse of `MathToWire`.
    MathFromWire,
    /// WT210: fold the compound "TYPE;PARAM" math reply to the short name.
    MathFromWire210,
    /// Select the n-th comma-separated field.
    Field(usize),
}

/// Argument verification beyond enumerated choice sets. When present, the
/// predicate is authoritative for the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verify {
    /// Integer seconds, at most 10000 hours.
    IntegrationTime,
    /// WT310 math function name, optionally with an element suffix.
    MathName,
}

/// Commands whose dispatch is a multi-step sequence rather than a single
/// write/read exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    ConfigureDataItems,
    ReadData,
    GetRange,
    SetRange,
    StartIntegration,
    WaitDataUpdate,
    /// WT210: emulate the integration state query.
    IntegrationState210,
    /// WT210: expand `set-math` into type/parameter command pairs.
    SetMath210,
    /// WT210: smoothing type and factor share one compound wire command.
    SetSmoothing210,
}

/// Everything the engine needs to know about one command.
#[derive(Debug, Clone, Default)]
pub(crate) struct CmdDesc {
    /// Wire command template, absent for handler-only commands.
    pub wire: Option<String>,
    /// Human-readable description; `Some` marks the command as public.
    pub descr: Option<&'static str>,
    /// Enumerated argument domain, if the command has one.
    pub choices: Option<Vec<String>>,
    /// Help text describing the accepted values, overrides `choices`.
    pub value_descr: Option<String>,
    pub verify: Option<Verify>,
    pub input_tweaks: Vec<Tweak>,
    pub response_tweaks: Vec<Tweak>,
    pub handler: Option<Handler>,
    /// Integration states the command may be executed in.
    pub states: Option<&'static [&'static str]>,
    pub has_response: bool,
    pub has_argument: bool,
}

/// The resolved command table of one adapter instance. Built once at
/// construction, never mutated afterwards.
#[derive(Debug)]
pub(crate) struct CmdTable {
    cmds: BTreeMap<String, CmdDesc>,
}

impl CmdTable {
    pub(crate) fn get(&self, name: &str) -> Option<&CmdDesc> {
        self.cmds.get(name)
    }

    pub(crate) fn wire(&self, name: &str) -> Result<&str> {
        self.cmds
            .get(name)
            .and_then(|desc| desc.wire.as_deref())
            .ok_or_else(|| ProtoError::BadCommand(name.to_string()))
    }

    /// The public commands, in name order.
    pub(crate) fn public(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.cmds
            .iter()
            .filter_map(|(name, desc)| desc.descr.map(|descr| (name.as_str(), descr)))
    }
}

/// Assembles a command table the way the adapters share it: the base layer
/// first, then model-specific wire commands, choices, tweaks and handlers,
/// each later write replacing what an earlier one put there.
pub(crate) struct TableBuilder {
    cmds: BTreeMap<String, CmdDesc>,
}

impl TableBuilder {
    fn entry(&mut self, name: &str) -> &mut CmdDesc {
        self.cmds.entry(name.to_string()).or_default()
    }

    pub(crate) fn public(&mut self, name: &str, descr: &'static str) {
        self.entry(name).descr = Some(descr);
    }

    pub(crate) fn raw(&mut self, name: &str, wire: &str) {
        self.entry(name).wire = Some(wire.to_string());
    }

    pub(crate) fn raw_all(&mut self, pairs: &[(&str, &str)]) {
        for (name, wire) in pairs {
            self.raw(name, wire);
        }
    }

    /// Apply choice sets to the listed commands; commands that do not exist
    /// in this table are skipped.
    pub(crate) fn choice_sets(&mut self, sets: &[(&[&str], &[&str])]) {
        for (names, choices) in sets {
            for name in *names {
                if let Some(desc) = self.cmds.get_mut(*name) {
                    desc.choices = Some(choices.iter().map(|c| c.to_string()).collect());
                }
            }
        }
    }

    /// Set choices from a (name, description) item list and generate the
    /// per-line help text from it.
    pub(crate) fn choices_from_items(&mut self, name: &str, items: &[(String, String)]) {
        let desc = self.entry(name);
        desc.choices = Some(items.iter().map(|(item, _)| item.clone()).collect());
        desc.value_descr = Some(
            items
                .iter()
                .map(|(item, descr)| format!("{item} - {descr}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    pub(crate) fn tweaks(&mut self, specs: &[(&str, &[Tweak], &[Tweak])]) {
        for (name, input, response) in specs {
            self.tweak(name, input, response);
        }
    }

    pub(crate) fn tweak(&mut self, name: &str, input: &[Tweak], response: &[Tweak]) {
        let desc = self.entry(name);
        if !input.is_empty() {
            desc.input_tweaks = input.to_vec();
        }
        if !response.is_empty() {
            desc.response_tweaks = response.to_vec();
        }
    }

    pub(crate) fn value_descr(&mut self, name: &str, text: &str) {
        self.entry(name).value_descr = Some(text.to_string());
    }

    pub(crate) fn verify(&mut self, name: &str, verify: Verify) {
        self.entry(name).verify = Some(verify);
    }

    pub(crate) fn handler(&mut self, name: &str, handler: Handler) {
        self.entry(name).handler = Some(handler);
    }

    pub(crate) fn states(&mut self, name: &str, states: &'static [&'static str]) {
        self.entry(name).states = Some(states);
    }

    /// Add the extended-event register commands and derive the
    /// response/argument flags for every entry: "get-" commands and
    /// "?"-suffixed wire commands respond and take no argument, everything
    /// else takes an argument and yields no reply.
    pub(crate) fn finalize(mut self) -> CmdTable {
        for (bit, name) in EESR_BITS.iter().enumerate() {
            self.raw(&format!("set-eesr-filter-{name}"), &format!(":STAT:FILT{}", bit + 1));
            self.raw(&format!("eesr-wait-{name}"), &format!(":COMM:WAIT {}", bit + 1));
        }

        for (name, desc) in self.cmds.iter_mut() {
            let responds = name.starts_with("get-")
                || desc.wire.as_deref().is_some_and(|wire| wire.ends_with('?'));
            desc.has_response = responds;
            desc.has_argument = !responds;
        }

        CmdTable { cmds: self.cmds }
    }
}

/// The common base layer: public command set, shared wire commands, shared
/// choices and tweaks, and the handlers every model uses.
pub(crate) fn base_builder() -> TableBuilder {
    let mut builder = TableBuilder {
        cmds: BTreeMap::new(),
    };

    for (name, descr) in COMMANDS {
        builder.public(name, descr);
    }

    builder.raw_all(BASE_RAW);
    builder.choice_sets(BASE_CHOICES);
    builder.tweaks(BASE_TWEAKS);

    let math: Vec<(String, String)> = MATH_NAMES
        .iter()
        .map(|(name, descr)| (name.to_string(), descr.to_string()))
        .collect();
    builder.choices_from_items("get-math", &math);
    builder.choices_from_items("set-math", &math);

    let timer_descr = "integer amount of seconds (0-10000 hours)";
    builder.value_descr("get-integration-timer", timer_descr);
    builder.value_descr("set-integration-timer", timer_descr);
    builder.verify("set-integration-timer", Verify::IntegrationTime);

    builder.handler("wait-data-update", Handler::WaitDataUpdate);
    builder.handler("get-current-range", Handler::GetRange);
    builder.handler("set-current-range", Handler::SetRange);
    builder.handler("get-voltage-range", Handler::GetRange);
    builder.handler("set-voltage-range", Handler::SetRange);
    builder.handler("start-integration", Handler::StartIntegration);

    builder
}

/// The bidirectional data item translation table. Human names differ from
/// the wire notation for some items (e.g. voltage is "V" to a human but "U"
/// on the WT310 wire); names not listed translate to themselves.
#[derive(Debug, Default)]
pub(crate) struct Ditt {
    htop: HashMap<String, String>,
    ptoh: HashMap<String, String>,
}

impl Ditt {
    /// Build from (human name, wire name) pairs.
    pub(crate) fn new(pairs: &[(&str, &str)]) -> Self {
        let mut ditt = Ditt::default();
        for (human, wire) in pairs {
            ditt.htop.insert(human.to_string(), wire.to_string());
            ditt.ptoh.insert(wire.to_string(), human.to_string());
        }
        ditt
    }

    pub(crate) fn to_wire(&self, name: &str) -> String {
        self.htop.get(name).cloned().unwrap_or_else(|| name.to_string())
    }

    pub(crate) fn to_human(&self, name: &str) -> String {
        self.ptoh.get(name).cloned().unwrap_or_else(|| name.to_string())
    }
}

//
// Error status resolution.
//

/// What a bound error resolver decided about a nonzero status code.
pub(crate) enum Resolution {
    /// Not an error after all.
    Ignore,
    /// Report the raw device text.
    Raw,
    /// Report this message instead.
    Message(String),
}

type Resolver = fn(cmd: &str, arg: Option<&str>, code: i32, raw: &str) -> Resolution;

pub(crate) enum ErrorMapEntry {
    Message(&'static str),
    Resolver(Resolver),
}

/// Map a power meter error code to a message or a resolver. We do not cover
/// all codes here so far; unmapped codes report the raw device text.
pub(crate) fn error_code_map() -> HashMap<i32, ErrorMapEntry> {
    let mut map = HashMap::new();
    map.insert(
        813,
        ErrorMapEntry::Message(
            "operation is not allowed during integration, please reset integration first",
        ),
    );
    for code in [842, 844, 845] {
        map.insert(code, ErrorMapEntry::Resolver(integration_error_resolver));
    }
    map
}

fn integration_error_resolver(_cmd: &str, _arg: Option<&str>, code: i32, _raw: &str) -> Resolution {
    match code {
        // start -> reset
        845 => Resolution::Message(
            "current integration state is 'start' and it cannot be changed to 'reset', \
             please stop it first"
                .to_string(),
        ),
        // start -> start
        842 => Resolution::Message("integration is already in the 'start' state".to_string()),
        // reset -> stop or stop -> stop
        844 => Resolution::Message(
            "cannot stop integration because it is not in the 'start' state, please \
             start it first"
                .to_string(),
        ),
        _ => Resolution::Raw,
    }
}

/// Resolve a device status code. `None` means the command succeeded (or the
/// resolver decided the code is harmless); `Some` carries the message to
/// report.
pub(crate) fn resolve_status(
    map: &HashMap<i32, ErrorMapEntry>,
    cmd: &str,
    arg: Option<&str>,
    code: i32,
    raw: &str,
) -> Option<String> {
    if code == 0 {
        return None;
    }
    match map.get(&code) {
        Some(ErrorMapEntry::Message(msg)) => Some(msg.to_string()),
        Some(ErrorMapEntry::Resolver(resolve)) => match resolve(cmd, arg, code, raw) {
            Resolution::Ignore => None,
            Resolution::Raw => Some(raw.to_string()),
            Resolution::Message(msg) => Some(msg),
        },
        None => Some(raw.to_string()),
    }
}

//
// Tweak helpers. Power meter input and output values are not always very
// human-friendly; these translate between the instrument's format and the
// notation used towards the caller.
//

/// Translate '0' and non-zero strings to 'off' and 'on'.
pub(crate) fn on_off(value: &str) -> String {
    if value == "0" {
        "off".to_string()
    } else {
        "on".to_string()
    }
}

/// Translate '0' and non-zero strings to 'success' and 'failure'.
pub(crate) fn success_failure(value: &str) -> String {
    if value == "0" {
        "success".to_string()
    } else {
        "failure".to_string()
    }
}

/// Lowercase the value and capitalize the first letter.
pub(crate) fn capitalize(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lower,
    }
}

/// Reformat a float, dropping superfluous zeros ("600.0E+00" -> "600").
pub(crate) fn float_to_str(value: &str) -> Option<String> {
    value.trim().parse::<f64>().ok().map(|v| v.to_string())
}

/// Convert time from 'h,m,s' CSV format to seconds.
pub(crate) fn csv_to_seconds(value: &str) -> Option<String> {
    let mut seconds: i64 = 0;
    for item in value.split(',') {
        seconds = seconds * 60 + item.trim().parse::<i64>().ok()?;
    }
    Some(seconds.to_string())
}

/// Convert time from seconds to 'h,m,s' CSV format.
pub(crate) fn seconds_to_csv(value: &str) -> Option<String> {
    let total = value.trim().parse::<i64>().ok()?;
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    Some(format!("{hours},{minutes},{seconds}"))
}

/// Remove the ',1' element suffix from a data item.
pub(crate) fn first_data_element(value: &str) -> String {
    value.strip_suffix(",1").unwrap_or(value).to_string()
}

/// Verify that a string holds an integer within [start, stop].
pub(crate) fn is_in_range(value: &str, start: i64, stop: i64) -> bool {
    match value.trim().parse::<i64>() {
        Ok(v) => v >= start && v <= stop,
        Err(_) => false,
    }
}

/// Split a trailing decimal number off a name: "cfv1" -> ("cfv", Some("1")).
pub(crate) fn split_trailing_digits(name: &str) -> (&str, Option<&str>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.len() == name.len() {
        (name, None)
    } else {
        (stem, Some(&name[stem.len()..]))
    }
}

/// Render a command with its argument for log and error messages.
pub(crate) fn cmd_to_str(cmd: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("{cmd} {arg}"),
        None => cmd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_write_wins() {
        let mut builder = base_builder();
        assert_eq!(
            builder.entry("get-interval").wire.as_deref(),
            Some(":SAMP:RATE?")
        );
        builder.raw("get-interval", ":CONF:RATE?");
        let table = builder.finalize();
        assert_eq!(table.wire("get-interval").expect("wire"), ":CONF:RATE?");
    }

    #[test]
    fn response_and_argument_flags() {
        let table = base_builder().finalize();
        let get = table.get("get-interval").expect("get-interval");
        assert!(get.has_response && !get.has_argument);
        let set = table.get("set-interval").expect("set-interval");
        assert!(!set.has_response && set.has_argument);
        // Not a "get-" name, but the wire command is a query.
        let cal = table.get("calibrate").expect("calibrate");
        assert!(cal.has_response && !cal.has_argument);
        // Handler-only command without a wire template.
        let wait = table.get("wait-data-update").expect("wait-data-update");
        assert!(!wait.has_response && wait.has_argument);
    }

    #[test]
    fn eesr_commands_are_generated() {
        let table = base_builder().finalize();
        assert_eq!(
            table.wire("set-eesr-filter-upd").expect("wire"),
            ":STAT:FILT1"
        );
        assert_eq!(table.wire("eesr-wait-upd").expect("wire"), ":COMM:WAIT 1");
        assert_eq!(
            table.wire("set-eesr-filter-poa3").expect("wire"),
            ":STAT:FILT15"
        );
    }

    #[test]
    fn internal_commands_are_not_public() {
        let table = base_builder().finalize();
        assert!(table.get("get-error-status").is_some());
        assert!(!table.public().any(|(name, _)| name == "get-error-status"));
        assert!(table.public().any(|(name, _)| name == "get-id"));
    }

    #[test]
    fn time_conversions() {
        assert_eq!(csv_to_seconds("0,1,40").as_deref(), Some("100"));
        assert_eq!(seconds_to_csv("100").as_deref(), Some("0,1,40"));
        assert_eq!(seconds_to_csv("3661").as_deref(), Some("1,1,1"));
        assert_eq!(csv_to_seconds("junk"), None);
    }

    #[test]
    fn float_reformatting() {
        assert_eq!(float_to_str("600.0E+00").as_deref(), Some("600"));
        assert_eq!(float_to_str("500.0E-03").as_deref(), Some("0.5"));
        assert_eq!(float_to_str("garbage"), None);
    }

    #[test]
    fn on_off_and_capitalize() {
        assert_eq!(on_off("0"), "off");
        assert_eq!(on_off("1"), "on");
        assert_eq!(capitalize("LAMBDA"), "Lambda");
        assert_eq!(first_data_element("U,1"), "U");
        assert_eq!(first_data_element("U"), "U");
    }

    #[test]
    fn trailing_digit_split() {
        assert_eq!(split_trailing_digits("cfv1"), ("cfv", Some("1")));
        assert_eq!(split_trailing_digits("add"), ("add", None));
        assert_eq!(split_trailing_digits("diva12"), ("diva", Some("12")));
    }

    #[test]
    fn status_resolution() {
        let map = error_code_map();
        assert_eq!(resolve_status(&map, "get-id", None, 0, "0,\"NO ERROR\""), None);
        let msg = resolve_status(&map, "stop-integration", None, 844, "844,\"X\"")
            .expect("message");
        assert!(msg.contains("cannot stop integration"));
        let msg = resolve_status(&map, "set-interval", Some("1"), 813, "813,\"X\"")
            .expect("message");
        assert!(msg.contains("not allowed during integration"));
        // Unmapped codes report the raw device text.
        assert_eq!(
            resolve_status(&map, "get-id", None, 999, "999,\"SOMETHING\"").as_deref(),
            Some("999,\"SOMETHING\"")
        );
    }

    #[test]
    fn custom_resolvers_decide() {
        fn ignore_all(_: &str, _: Option<&str>, _: i32, _: &str) -> Resolution {
            Resolution::Ignore
        }
        fn replace(_: &str, _: Option<&str>, _: i32, _: &str) -> Resolution {
            Resolution::Message("replaced".to_string())
        }
        let mut map = HashMap::new();
        map.insert(100, ErrorMapEntry::Resolver(ignore_all));
        map.insert(101, ErrorMapEntry::Resolver(replace));
        assert_eq!(resolve_status(&map, "x", None, 100, "100,\"Y\""), None);
        assert_eq!(
            resolve_status(&map, "x", None, 101, "101,\"Y\"").as_deref(),
            Some("replaced")
        );
    }

    #[test]
    fn ditt_translates_both_ways() {
        let ditt = Ditt::new(&[("V", "U"), ("Fv", "Fu")]);
        assert_eq!(ditt.to_wire("V"), "U");
        assert_eq!(ditt.to_human("U"), "V");
        assert_eq!(ditt.to_wire("P"), "P");
        assert_eq!(ditt.to_human("P"), "P");
    }
}
