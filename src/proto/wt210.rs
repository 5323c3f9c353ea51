//! The Yokogawa WT210 power meter.
//!
//! This family predates the WT310 wire protocol and differs in more than
//! command spellings: data items are selected per item instead of per slot,
//! smoothing type and factor share one compound command, the math function
//! is set through type/parameter command pairs, and there is no direct way
//! to read the integration state.

use crate::proto::table::{self, base_builder, CmdTable, Ditt, Handler, Tweak};

pub(crate) const PMTYPES: &[&str] = &["wt210"];
pub(crate) const NAME: &str = "Yokogawa WT210";

pub(crate) const MAX_DATA_ITEMS: usize = 19;

/// (human name, wire name) pairs.
const DITT_PAIRS: &[(&str, &str)] = &[
    ("I", "A"),
    ("P", "W"),
    ("S", "Va"),
    ("Q", "Var"),
    ("Lambda", "PF"),
    ("Phi", "Degree"),
    ("Fv", "VHz"),
    ("Fi", "AHz"),
    ("Vmax", "Vpk"),
    ("Imax", "Apk"),
];

const RAW: &[(&str, &str)] = &[
    ("get-line-filter", ":CONF:LFILT?"),
    ("set-line-filter", ":CONF:LFILT"),
    ("get-freq-filter", ":CONF:FILT?"),
    ("set-freq-filter", ":CONF:FILT"),
    ("get-max-hold", ":CONF:MHOL?"),
    ("set-max-hold", ":CONF:MHOL"),
    ("get-current-auto-range", ":CONF:CURR:AUTO?"),
    ("set-current-auto-range", ":CONF:CURR:AUTO"),
    ("get-current-range", ":CONF:CURR:RANG?"),
    ("set-current-range", ":CONF:CURR:RANG"),
    ("get-voltage-auto-range", ":CONF:VOLT:AUTO?"),
    ("set-voltage-auto-range", ":CONF:VOLT:AUTO"),
    ("get-voltage-range", ":CONF:VOLT:RANG?"),
    ("set-voltage-range", ":CONF:VOLT:RANG"),
    ("get-measurement-mode", ":CONF:MODE?"),
    ("set-measurement-mode", ":CONF:MODE"),
    ("get-sync-source", ":CONF:SYNC?"),
    ("set-sync-source", ":CONF:SYNC"),
    ("get-crest-factor", ":CONF:CFAC?"),
    ("set-crest-factor", ":CONF:CFAC"),
    ("get-wiring-system", ":CONF:WIR?"),
    ("get-smoothing-status", ":CONF:AVER:STAT?"),
    ("set-smoothing-status", ":CONF:AVER:STAT"),
    ("get-smoothing-type", ":CONF:AVER:TYPE?"),
    ("set-smoothing", ":CONF:AVER:TYPE"),
    ("get-smoothing-factor", ":CONF:AVER:TYPE?"),
    ("set-math-type", ":MATH:TYPE"),
    ("set-math-cfac", ":MATH:CFAC"),
    ("set-math-aver", ":MATH:AVER"),
    ("set-math-arit", ":MATH:ARIT"),
    ("read-data", ":MEAS:VAL?"),
];

const CHOICES: &[(&[&str], &[&str])] = &[(
    &["get-integration-state"],
    // There is no non-disruptive way to distinguish between the integration
    // start and stop states on this family.
    &["start or stop", "reset"],
)];

const TWEAKS: &[(&str, &[Tweak], &[Tweak])] = &[
    (
        "get-smoothing-type",
        &[],
        &[Tweak::ToLower, Tweak::Field(0)],
    ),
    (
        "get-smoothing-factor",
        &[],
        &[Tweak::ToLower, Tweak::Field(1)],
    ),
    ("get-math", &[], &[Tweak::MathFromWire210]),
];

/// All data items in declaration order: common, then virtual. The physical
/// part of this order is also the order the instrument reports enabled
/// items in.
pub(crate) fn data_items() -> Vec<(String, String)> {
    table::DATA_ITEMS
        .iter()
        .chain(table::VDATA_ITEMS)
        .map(|(name, descr)| (name.to_string(), descr.to_string()))
        .collect()
}

pub(crate) fn ditt() -> Ditt {
    Ditt::new(DITT_PAIRS)
}

pub(crate) fn command_table() -> CmdTable {
    let mut builder = base_builder();

    builder.raw_all(RAW);

    // One on/off get/set command pair per physical data item.
    let ditt = ditt();
    for (name, _) in table::DATA_ITEMS {
        let wire_name = ditt.to_wire(name);
        builder.raw(
            &format!("get-data-item-{name}"),
            &format!(":MEAS:ITEM:{wire_name}?"),
        );
        builder.raw(
            &format!("set-data-item-{name}"),
            &format!(":MEAS:ITEM:{wire_name}"),
        );
    }

    builder.choice_sets(CHOICES);
    let items = data_items();
    builder.choices_from_items("read-data", &items);
    builder.choices_from_items("configure-data-items", &items);

    builder.tweaks(TWEAKS);

    builder.handler("configure-data-items", Handler::ConfigureDataItems);
    builder.handler("read-data", Handler::ReadData);
    builder.handler("set-smoothing-type", Handler::SetSmoothing210);
    builder.handler("set-smoothing-factor", Handler::SetSmoothing210);
    builder.handler("get-integration-state", Handler::IntegrationState210);
    builder.handler("set-math", Handler::SetMath210);

    builder.finalize()
}

/// Fold the compound "TYPE;PARAM" math reply to the short function name.
pub(crate) fn math_response(value: &str) -> Option<String> {
    let (kind, param) = value.split_once(';')?;
    if kind == "ARITHMETIC" {
        return Some(param.to_lowercase());
    }
    match param {
        "A,1" => Some("cfi".to_string()),
        "V,1" => Some("cfv".to_string()),
        "W,1" => Some("avw".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_reply_folding() {
        assert_eq!(math_response("ARITHMETIC;ADD").as_deref(), Some("add"));
        assert_eq!(math_response("CFAC;A,1").as_deref(), Some("cfi"));
        assert_eq!(math_response("CFAC;V,1").as_deref(), Some("cfv"));
        assert_eq!(math_response("AVER;W,1").as_deref(), Some("avw"));
        assert_eq!(math_response("CFAC;B,2"), None);
        assert_eq!(math_response("garbage"), None);
    }

    #[test]
    fn per_item_commands_use_wire_names() {
        let table = command_table();
        assert_eq!(table.wire("set-data-item-I").expect("wire"), ":MEAS:ITEM:A");
        assert_eq!(table.wire("set-data-item-P").expect("wire"), ":MEAS:ITEM:W");
        assert_eq!(table.wire("set-data-item-V").expect("wire"), ":MEAS:ITEM:V");
        // Virtual items never reach the wire.
        assert!(table.get("set-data-item-J").is_none());
    }

    #[test]
    fn quirky_commands_are_handlers() {
        let table = command_table();
        for cmd in [
            "get-integration-state",
            "set-math",
            "set-smoothing-type",
            "set-smoothing-factor",
        ] {
            let desc = table.get(cmd).expect(cmd);
            assert!(desc.handler.is_some(), "{cmd} should be custom-handled");
            assert!(desc.wire.is_none(), "{cmd} should have no wire template");
        }
        // The emulated state query still reports as responding.
        assert!(table.get("get-integration-state").expect("desc").has_response);
    }

    #[test]
    fn smoothing_shares_the_compound_command() {
        let table = command_table();
        assert_eq!(
            table.wire("get-smoothing-type").expect("wire"),
            ":CONF:AVER:TYPE?"
        );
        assert_eq!(
            table.wire("get-smoothing-factor").expect("wire"),
            ":CONF:AVER:TYPE?"
        );
        assert_eq!(table.wire("set-smoothing").expect("wire"), ":CONF:AVER:TYPE");
    }
}
