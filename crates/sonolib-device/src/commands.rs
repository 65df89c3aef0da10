//! Firmware command definitions and per-family command sets.
//!
//! Everything here is pure data: a [`CommandDef`] pairs one command template
//! with the validators that interpret its answers, and a [`CommandSet`] is
//! the subset of definitions a negotiated device actually supports. No I/O
//! happens in this module.
//!
//! # Wire protocol
//!
//! All supported generators speak newline-terminated ASCII:
//!
//! | Command      | Wire form   | Answer                                   |
//! |--------------|-------------|------------------------------------------|
//! | get_status   | `-`         | `{err}#{freq}#{gain}#{mode}#{signal}`    |
//! | get_sensors  | `?sens`     | `{freq} {urms} {irms} {phase}`           |
//! | get_temperature | `?temp`  | `t=36.4` (or a bare number)              |
//! | set_frequency | `!f={hz}`  | `f={hz}` echo                            |
//! | set_gain     | `!g={pct}`  | `g={pct}` echo                           |
//! | signal_on    | `!ON`       | `ON` echo                                |
//! | signal_off   | `!OFF`      | `OFF` echo                               |
//! | get_type     | `?type`     | family token                             |
//! | get_info     | `?info`     | multi-line banner with firmware version  |
//!
//! Legacy (pre-0.4) firmware answers the sensor query with raw counts that
//! the negotiated [`TelemetryScaling`](crate::capability::TelemetryScaling)
//! turns into physical units; the validators here stay the same.

use std::time::Duration;

use sonolib_protocol::{
    field, AnswerValidator, ArgKind, CommandSpec, FieldKind, FieldValue,
};

/// Lookup names for the commands a device may support.
pub mod names {
    pub const GET_STATUS: &str = "get_status";
    pub const GET_SENSORS: &str = "get_sensors";
    pub const GET_TEMPERATURE: &str = "get_temperature";
    pub const SET_FREQUENCY: &str = "set_frequency";
    pub const SET_GAIN: &str = "set_gain";
    pub const SIGNAL_ON: &str = "signal_on";
    pub const SIGNAL_OFF: &str = "signal_off";
    pub const GET_TYPE: &str = "get_type";
    pub const GET_INFO: &str = "get_info";
}

/// Answer budget for set-style commands (the firmware echoes immediately).
const SET_BUDGET: Duration = Duration::from_millis(200);
/// Answer budget for the cheap status query.
const STATUS_BUDGET: Duration = Duration::from_millis(300);
/// Answer budget for the sensor query (the ADC round takes longer).
const SENSOR_BUDGET: Duration = Duration::from_millis(400);
/// Burst window for multi-line info dumps.
const INFO_BUDGET: Duration = Duration::from_millis(500);

/// One command template plus the validators for its answers.
#[derive(Debug, Clone)]
pub struct CommandDef {
    pub spec: CommandSpec,
    /// Tried in declaration order; first match wins.
    pub validators: Vec<AnswerValidator>,
}

/// The commands a negotiated device supports, keyed by name.
#[derive(Debug, Clone)]
pub struct CommandSet {
    defs: Vec<CommandDef>,
}

impl CommandSet {
    fn new(defs: Vec<CommandDef>) -> Self {
        CommandSet { defs }
    }

    /// Look up a command definition by name.
    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.defs.iter().find(|d| d.spec.name == name)
    }

    /// Whether this set carries the named command.
    pub fn supports(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all supported commands, in definition order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.defs.iter().map(|d| d.spec.name)
    }

    /// Number of supported commands.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------------------------------------------------------------
// Individual command definitions
// ---------------------------------------------------------------

fn status_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::GET_STATUS, "-", ArgKind::None, STATUS_BUDGET),
        validators: vec![AnswerValidator::new(
            r"^(?P<error>\d+)#(?P<frequency>\d+)#(?P<gain>\d+)#(?P<mode>[01])#(?P<signal>[01])\s*$",
            vec![
                field("error", FieldKind::Unsigned),
                field("frequency", FieldKind::Unsigned),
                field("gain", FieldKind::Unsigned),
                field("mode", FieldKind::Unsigned),
                field("signal", FieldKind::Flag),
            ],
        )],
    }
}

fn sensors_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::GET_SENSORS, "?sens", ArgKind::None, SENSOR_BUDGET),
        validators: vec![AnswerValidator::new(
            r"^(?P<frequency>\d+)[#\s]+(?P<urms>[-+]?\d+(?:\.\d+)?)[#\s]+(?P<irms>[-+]?\d+(?:\.\d+)?)[#\s]+(?P<phase>[-+]?\d+(?:\.\d+)?)\s*$",
            vec![
                field("frequency", FieldKind::Unsigned),
                field("urms", FieldKind::Float),
                field("irms", FieldKind::Float),
                field("phase", FieldKind::Float),
            ],
        )
        // The sensor answer has no explicit signal flag; a running output
        // is recognizable by its nonzero frequency.
        .derive("signal", |fields| {
            let freq = fields.get("frequency")?.as_u64()?;
            Some(FieldValue::Flag(freq != 0))
        })],
    }
}

fn temperature_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::GET_TEMPERATURE, "?temp", ArgKind::None, STATUS_BUDGET),
        validators: vec![
            AnswerValidator::new(
                r"^t\s*=\s*(?P<temperature>[-+]?\d+(?:\.\d+)?)\s*$",
                vec![field("temperature", FieldKind::Float)],
            ),
            AnswerValidator::new(
                r"^(?P<temperature>[-+]?\d+(?:\.\d+)?)\s*$",
                vec![field("temperature", FieldKind::Float)],
            ),
        ],
    }
}

fn set_frequency_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::SET_FREQUENCY, "!f=", ArgKind::Unsigned, SET_BUDGET),
        validators: vec![
            AnswerValidator::new(
                r"^f\s*=\s*(?P<frequency>\d+)\s*$",
                vec![field("frequency", FieldKind::Unsigned)],
            ),
            // Some builds echo the bare value.
            AnswerValidator::new(
                r"^(?P<frequency>\d+)\s*$",
                vec![field("frequency", FieldKind::Unsigned)],
            ),
        ],
    }
}

fn set_gain_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::SET_GAIN, "!g=", ArgKind::Unsigned, SET_BUDGET),
        validators: vec![
            AnswerValidator::new(
                r"^g\s*=\s*(?P<gain>\d+)\s*$",
                vec![field("gain", FieldKind::Unsigned)],
            ),
            AnswerValidator::new(
                r"^(?P<gain>\d+)\s*$",
                vec![field("gain", FieldKind::Unsigned)],
            ),
        ],
    }
}

fn signal_on_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::SIGNAL_ON, "!ON", ArgKind::None, SET_BUDGET),
        validators: vec![AnswerValidator::new(r"(?i)^!?on\b", vec![])
            .derive("signal", |_| Some(FieldValue::Flag(true)))],
    }
}

fn signal_off_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::SIGNAL_OFF, "!OFF", ArgKind::None, SET_BUDGET),
        validators: vec![AnswerValidator::new(r"(?i)^!?off\b", vec![])
            .derive("signal", |_| Some(FieldValue::Flag(false)))],
    }
}

fn get_type_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::GET_TYPE, "?type", ArgKind::None, STATUS_BUDGET),
        validators: vec![AnswerValidator::new(
            r"(?i)(?P<family>soniccatch|sonicwipe)",
            vec![field("family", FieldKind::Text)],
        )],
    }
}

fn get_info_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new(names::GET_INFO, "?info", ArgKind::None, INFO_BUDGET).multiline(),
        validators: vec![
            AnswerValidator::new(
                r"(?is)(?P<family>soniccatch|sonicwipe).*?v?(?P<version>\d+\.\d+)",
                vec![
                    field("family", FieldKind::Text),
                    field("version", FieldKind::Text),
                ],
            ),
            AnswerValidator::new(
                r"(?s)v?(?P<version>\d+\.\d+)",
                vec![field("version", FieldKind::Text)],
            ),
        ],
    }
}

// ---------------------------------------------------------------
// Bootstrap commands (available before negotiation)
// ---------------------------------------------------------------

/// The serial-mode handshake. Sent blind right after the port opens so a
/// device in front-panel mode switches to remote control; whatever greeting
/// text arrives inside the window is the identification banner.
pub fn handshake_spec() -> CommandSpec {
    CommandSpec::new("handshake", "!SERIAL", ArgKind::None, INFO_BUDGET).multiline()
}

/// The type query, used when the banner held no recognizable family token.
pub fn bootstrap_type_def() -> CommandDef {
    get_type_def()
}

/// The firmware info query, used when the banner held no version.
pub fn bootstrap_info_def() -> CommandDef {
    get_info_def()
}

/// Catch-all definition for raw pass-through lines: any non-blank echo is
/// a valid answer.
pub fn raw_def() -> CommandDef {
    CommandDef {
        spec: CommandSpec::new("raw", "", ArgKind::Text, STATUS_BUDGET),
        validators: vec![AnswerValidator::new(
            r"(?s)^(?P<text>.+)$",
            vec![field("text", FieldKind::Text)],
        )],
    }
}

// ---------------------------------------------------------------
// Per-family command sets
// ---------------------------------------------------------------

/// Catch firmware 0.4 and later: full sensing, gain, relay switching.
pub fn catch_full_set() -> CommandSet {
    CommandSet::new(vec![
        status_def(),
        sensors_def(),
        temperature_def(),
        set_frequency_def(),
        set_gain_def(),
        signal_on_def(),
        signal_off_def(),
        get_type_def(),
        get_info_def(),
    ])
}

/// Catch firmware 0.3: sensing and gain, but no temperature query and no
/// relay switching.
pub fn catch_legacy_set() -> CommandSet {
    CommandSet::new(vec![
        status_def(),
        sensors_def(),
        set_frequency_def(),
        set_gain_def(),
        signal_on_def(),
        signal_off_def(),
        get_type_def(),
        get_info_def(),
    ])
}

/// Wipe firmware 0.4 and later: no sensing module.
pub fn wipe_full_set() -> CommandSet {
    CommandSet::new(vec![
        status_def(),
        temperature_def(),
        set_frequency_def(),
        set_gain_def(),
        signal_on_def(),
        signal_off_def(),
        get_type_def(),
        get_info_def(),
    ])
}

/// Wipe firmware 0.3: fixed gain, no sensing.
pub fn wipe_legacy_set() -> CommandSet {
    CommandSet::new(vec![
        status_def(),
        set_frequency_def(),
        signal_on_def(),
        signal_off_def(),
        get_type_def(),
        get_info_def(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonolib_protocol::{validate, CommandArg};

    #[test]
    fn status_command_encodes_and_parses() {
        let def = status_def();
        assert_eq!(def.spec.encode(&CommandArg::None).unwrap(), b"-\n");

        let answer = validate(&def.validators, "0#1000000#100#1#1");
        assert!(answer.valid);
        assert_eq!(answer.field("frequency").unwrap().as_u64(), Some(1_000_000));
        assert_eq!(answer.field("signal").unwrap().as_flag(), Some(true));
        assert_eq!(answer.field("mode").unwrap().as_u64(), Some(1));
    }

    #[test]
    fn sensor_answer_derives_signal() {
        let def = sensors_def();
        assert_eq!(def.spec.encode(&CommandArg::None).unwrap(), b"?sens\n");

        let answer = validate(&def.validators, "1000000 843.2 12.7 55.1");
        assert!(answer.valid);
        assert_eq!(answer.field("urms").unwrap().as_f64(), Some(843.2));
        assert_eq!(answer.field("signal").unwrap().as_flag(), Some(true));

        let idle = validate(&def.validators, "0 0 0 0");
        assert_eq!(idle.field("signal").unwrap().as_flag(), Some(false));
    }

    #[test]
    fn sensor_answer_accepts_hash_separators() {
        let def = sensors_def();
        let answer = validate(&def.validators, "1000000#843#12#55");
        assert!(answer.valid);
        assert_eq!(answer.field("phase").unwrap().as_f64(), Some(55.0));
    }

    #[test]
    fn set_frequency_echo_variants() {
        let def = set_frequency_def();
        assert_eq!(
            def.spec.encode(&CommandArg::Unsigned(100_000)).unwrap(),
            b"!f=100000\n"
        );

        let eq_form = validate(&def.validators, "f=100000");
        assert!(eq_form.valid);
        assert_eq!(eq_form.field("frequency").unwrap().as_u64(), Some(100_000));

        let bare_form = validate(&def.validators, "100000");
        assert!(bare_form.valid);
        assert_eq!(bare_form.field("frequency").unwrap().as_u64(), Some(100_000));
    }

    #[test]
    fn signal_commands_derive_constant_flags() {
        let on = validate(&signal_on_def().validators, "ON");
        assert!(on.valid);
        assert_eq!(on.field("signal").unwrap().as_flag(), Some(true));

        let off = validate(&signal_off_def().validators, "!OFF");
        assert!(off.valid);
        assert_eq!(off.field("signal").unwrap().as_flag(), Some(false));

        // An `ON` echo must not satisfy the off validator.
        assert!(!validate(&signal_off_def().validators, "ON").valid);
    }

    #[test]
    fn temperature_answer_variants() {
        let def = temperature_def();
        assert_eq!(
            validate(&def.validators, "t=36.4")
                .field("temperature")
                .unwrap()
                .as_f64(),
            Some(36.4)
        );
        assert_eq!(
            validate(&def.validators, "-12.5")
                .field("temperature")
                .unwrap()
                .as_f64(),
            Some(-12.5)
        );
    }

    #[test]
    fn info_answer_extracts_family_and_version() {
        let def = get_info_def();
        let answer = validate(
            &def.validators,
            "SonicCatch MK2\nbuild 2231\nfirmware v0.4.1",
        );
        assert!(answer.valid);
        assert_eq!(
            answer.field("family").unwrap().as_text().map(str::to_lowercase),
            Some("soniccatch".into())
        );
        assert_eq!(answer.field("version").unwrap().as_text(), Some("0.4"));
    }

    #[test]
    fn info_answer_version_only_fallback() {
        let def = get_info_def();
        let answer = validate(&def.validators, "generator firmware 0.3.9");
        assert!(answer.valid);
        assert!(answer.field("family").is_none());
        assert_eq!(answer.field("version").unwrap().as_text(), Some("0.3"));
    }

    #[test]
    fn command_set_lookup_and_support() {
        let set = catch_full_set();
        assert!(set.supports(names::GET_SENSORS));
        assert!(set.supports(names::SET_GAIN));
        assert_eq!(set.get("no_such_command").map(|d| d.spec.name), None);
        assert_eq!(set.len(), 9);
        assert!(!set.is_empty());
    }

    #[test]
    fn legacy_sets_drop_unsupported_commands() {
        assert!(!catch_legacy_set().supports(names::GET_TEMPERATURE));
        assert!(!wipe_full_set().supports(names::GET_SENSORS));
        assert!(!wipe_legacy_set().supports(names::SET_GAIN));
        assert!(wipe_legacy_set().supports(names::SET_FREQUENCY));
    }

    #[test]
    fn every_set_can_poll_status() {
        for set in [
            catch_full_set(),
            catch_legacy_set(),
            wipe_full_set(),
            wipe_legacy_set(),
        ] {
            assert!(set.supports(names::GET_STATUS));
            assert!(set.supports(names::SIGNAL_ON));
            assert!(set.supports(names::SIGNAL_OFF));
        }
    }

    #[test]
    fn handshake_is_multiline() {
        let spec = handshake_spec();
        assert!(spec.multiline);
        assert_eq!(spec.encode(&CommandArg::None).unwrap(), b"!SERIAL\n");
    }

    #[test]
    fn raw_def_accepts_any_echo() {
        let def = raw_def();
        assert!(validate(&def.validators, "whatever the firmware says").valid);
        assert!(!validate(&def.validators, "").valid);
    }
}
