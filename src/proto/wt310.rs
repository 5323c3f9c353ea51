//! The Yokogawa WT310 power meter family. Also covers the WT330 series,
//! with a single input element.

use crate::proto::table::{
    self, base_builder, split_trailing_digits, CmdTable, Ditt, Handler, Tweak, Verify,
};

pub(crate) const PMTYPES: &[&str] = &["wt310", "wt330", "wt332", "wt333"];
pub(crate) const NAME: &str = "Yokogawa WT310 or WT33x";

pub(crate) const MAX_DATA_ITEMS: usize = 10;
const ELEMENTS_COUNT: i64 = 1;

/// WT310-specific data items.
const DATA_ITEMS_EXTRA: &[(&str, &str)] = &[
    ("Vmin", "minimum voltage"),
    ("Imin", "minimum current"),
    ("Pmax", "maximum power"),
    ("Pmin", "minimum power"),
    ("Vrange", "voltage range"),
    ("Irange", "current range"),
];

/// (human name, wire name) pairs; the wire protocol uses "U" for voltage.
const DITT_PAIRS: &[(&str, &str)] = &[
    ("V", "U"),
    ("Fv", "Fu"),
    ("Vmax", "Uppeak"),
    ("Vmin", "Umpeak"),
    ("Imax", "Ippeak"),
    ("Imin", "Impeak"),
    ("Pmax", "Pppeak"),
    ("Pmin", "Pmpeak"),
    ("Vrange", "Urange"),
];

/// Math functions that must carry the element number on the wire (cfv1).
const MATH_NAMES_WITH_ELEMENTS: &[&str] = &["cfv", "cfi", "avw"];

const RAW: &[(&str, &str)] = &[
    ("get-line-filter", ":INP:FILT:LINE?"),
    ("set-line-filter", ":INP:FILT:LINE"),
    ("get-freq-filter", ":INP:FILT:FREQ?"),
    ("set-freq-filter", ":INP:FILT:FREQ"),
    ("get-max-hold", ":MEAS:MHOL?"),
    ("set-max-hold", ":MEAS:MHOL"),
    ("get-current-auto-range", ":INP:CURR:AUTO?"),
    ("set-current-auto-range", ":INP:CURR:AUTO"),
    ("get-current-range", ":INP:CURR:RANG?"),
    ("set-current-range", ":INP:CURR:RANG"),
    ("get-voltage-auto-range", ":INP:VOLT:AUTO?"),
    ("set-voltage-auto-range", ":INP:VOLT:AUTO"),
    ("get-voltage-range", ":INP:VOLT:RANG?"),
    ("set-voltage-range", ":INP:VOLT:RANG"),
    ("get-keys-locking", ":SYST:KLOC?"),
    ("set-keys-locking", ":SYST:KLOC"),
    ("get-measurement-mode", ":INP:MODE?"),
    ("set-measurement-mode", ":INP:MODE"),
    ("get-sync-source", ":INP:SYNC?"),
    ("set-sync-source", ":INP:SYNC"),
    ("get-crest-factor", ":INP:CFAC?"),
    ("set-crest-factor", ":INP:CFAC"),
    ("get-wiring-system", ":INP:WIR?"),
    ("get-smoothing-status", ":MEAS:AVER:STATE?"),
    ("set-smoothing-status", ":MEAS:AVER:STATE"),
    ("get-smoothing-type", ":MEAS:AVER:TYPE?"),
    ("set-smoothing-type", ":MEAS:AVER:TYPE"),
    ("get-smoothing-factor", ":MEAS:AVER:COUN?"),
    ("set-smoothing-factor", ":MEAS:AVER:COUN"),
    ("get-integration-state", ":INTEG:STAT?"),
    ("set-math", ":MATH"),
    ("set-compat-mode", ":SYST:COMM:COMM"),
    ("get-data-format", ":NUM:FORM?"),
    ("set-data-format", ":NUM:FORM"),
    ("get-data-items-count", ":NUM:NORM:NUM?"),
    ("set-data-items-count", ":NUM:NORM:NUM"),
    ("read-data", ":NUM:NORM:VAL?"),
];

const CHOICES: &[(&[&str], &[&str])] = &[
    (
        &["get-integration-state"],
        &["start", "stop", "reset", "timeup", "error"],
    ),
    (&["get-data-format", "set-data-format"], &["ascii", "float"]),
    (&["get-keys-locking", "set-keys-locking"], table::ON_OFF),
    (&["set-compat-mode"], &["WT200", "WT300"]),
];

const TWEAKS: &[(&str, &[Tweak], &[Tweak])] = &[
    ("get-smoothing-type", &[], &[Tweak::ToLower]),
    ("get-integration-state", &[], &[Tweak::ToLower]),
    ("get-keys-locking", &[], &[Tweak::OnOff]),
    ("get-data-format", &[], &[Tweak::ToLower]),
    ("get-math", &[], &[Tweak::ToLower, Tweak::MathFromWire]),
    ("set-math", &[Tweak::ToLower, Tweak::MathToWire], &[]),
];

/// All data items in declaration order: common, WT310-specific, virtual.
pub(crate) fn data_items() -> Vec<(String, String)> {
    table::DATA_ITEMS
        .iter()
        .chain(DATA_ITEMS_EXTRA)
        .chain(table::VDATA_ITEMS)
        .map(|(name, descr)| (name.to_string(), descr.to_string()))
        .collect()
}

pub(crate) fn ditt() -> Ditt {
    Ditt::new(DITT_PAIRS)
}

pub(crate) fn command_table() -> CmdTable {
    let mut builder = base_builder();

    builder.public(
        "get-keys-locking",
        "check whether device's physical keys are locked or not",
    );
    builder.public("set-keys-locking", "lock/unlock device's physical keys");

    builder.raw_all(RAW);

    // One get/set command pair per data item slot.
    for slot in 1..=MAX_DATA_ITEMS {
        let get_cmd = format!("get-data-item{slot}");
        let set_cmd = format!("set-data-item{slot}");
        builder.raw(&get_cmd, &format!(":NUM:NORM:ITEM{slot}?"));
        builder.raw(&set_cmd, &format!(":NUM:NORM:ITEM{slot}"));
        builder.tweak(
            &get_cmd,
            &[],
            &[Tweak::FirstDataElement, Tweak::Capitalize, Tweak::ItemFromWire],
        );
        builder.tweak(&set_cmd, &[Tweak::Capitalize, Tweak::ItemToWire], &[]);
    }

    builder.choice_sets(CHOICES);
    let items = data_items();
    builder.choices_from_items("read-data", &items);
    builder.choices_from_items("configure-data-items", &items);

    builder.tweaks(TWEAKS);
    builder.verify("set-math", Verify::MathName);

    builder.handler("configure-data-items", Handler::ConfigureDataItems);
    builder.handler("read-data", Handler::ReadData);

    builder.states("start-integration", &["reset", "stop"]);
    builder.states("stop-integration", &["start"]);
    builder.states("reset-integration", &["reset", "stop", "timeup", "error"]);

    builder.finalize()
}

/// Append the element number to math function names that require it and
/// switch to the wire's "cfu" spelling for the voltage crest factor.
pub(crate) fn math_input(value: &str) -> String {
    let mut value = value.to_string();
    if MATH_NAMES_WITH_ELEMENTS.contains(&value.as_str()) {
        value.push('1');
    }
    if let Some(rest) = value.strip_prefix("cfv") {
        value = format!("cfu{rest}");
    }
    value
}

/// The inverse of `math_input`: strip the element number and map the wire's
/// "cfu" back to "cfv".
pub(crate) fn math_response(value: &str) -> String {
    let (stem, digits) = split_trailing_digits(value);
    let mut value = if digits.is_some() {
        stem.to_string()
    } else {
        value.to_string()
    };
    if let Some(rest) = value.strip_prefix("cfu") {
        value = format!("cfv{rest}");
    }
    value
}

/// Verify a math function name, optionally carrying an element suffix
/// (see the WT310 communication interface manual, page 6-16).
pub(crate) fn verify_math_name(name: &str) -> bool {
    let (stem, digits) = split_trailing_digits(name);
    if let Some(digits) = digits {
        if !table::is_in_range(digits, 1, ELEMENTS_COUNT) {
            return false;
        }
        if !MATH_NAMES_WITH_ELEMENTS.contains(&stem) {
            return false;
        }
    }
    table::MATH_NAMES.iter().any(|(math, _)| *math == stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_name_translation() {
        assert_eq!(math_input("cfv"), "cfu1");
        assert_eq!(math_input("cfi"), "cfi1");
        assert_eq!(math_input("avw"), "avw1");
        assert_eq!(math_input("add"), "add");
        assert_eq!(math_response("cfu1"), "cfv");
        assert_eq!(math_response("cfi1"), "cfi");
        assert_eq!(math_response("add"), "add");
    }

    #[test]
    fn math_name_verification() {
        assert!(verify_math_name("cfv"));
        assert!(verify_math_name("cfv1"));
        assert!(verify_math_name("avw1"));
        assert!(verify_math_name("div"));
        // Only one input element on this family.
        assert!(!verify_math_name("cfv2"));
        // Plain arithmetic functions take no element suffix.
        assert!(!verify_math_name("add1"));
        assert!(!verify_math_name("bogus"));
    }

    #[test]
    fn slot_commands_exist() {
        let table = command_table();
        assert_eq!(
            table.wire("set-data-item1").expect("wire"),
            ":NUM:NORM:ITEM1"
        );
        assert_eq!(
            table.wire("get-data-item10").expect("wire"),
            ":NUM:NORM:ITEM10?"
        );
        assert!(table.get("set-data-item11").is_none());
    }

    #[test]
    fn model_overrides_win() {
        let table = command_table();
        // The base table has no line filter wire commands; this family does.
        assert_eq!(table.wire("get-line-filter").expect("wire"), ":INP:FILT:LINE?");
        // Integration state is a plain wire query here, not a handler.
        let desc = table.get("get-integration-state").expect("desc");
        assert!(desc.handler.is_none());
        assert_eq!(desc.wire.as_deref(), Some(":INTEG:STAT?"));
        assert!(desc.has_response);
    }

    #[test]
    fn integration_preconditions_declared() {
        let table = command_table();
        assert_eq!(
            table.get("start-integration").expect("desc").states,
            Some(&["reset", "stop"][..])
        );
        assert_eq!(
            table.get("stop-integration").expect("desc").states,
            Some(&["start"][..])
        );
        assert_eq!(
            table.get("reset-integration").expect("desc").states,
            Some(&["reset", "stop", "timeup", "error"][..])
        );
    }
}
