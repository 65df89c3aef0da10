//! Answer validation: pattern matching and typed field conversion.
//!
//! Raw answer text from the device is matched against one or more
//! [`AnswerValidator`]s in declaration order; the first matching pattern
//! wins. Named captures are converted to typed [`FieldValue`]s field by
//! field, then after-converters derive additional fields from the ones
//! already produced (e.g. `signal` from a nonzero `frequency`).
//!
//! Serial links are noisy: garbled and empty lines are routine, so a
//! non-matching answer is marked invalid but never raised as an error,
//! and a single unconvertible field degrades only itself.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

/// A typed value extracted from answer text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    /// The value as an unsigned integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a signed integer (unsigned values convert losslessly
    /// when they fit).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Signed(v) => Some(*v),
            FieldValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The value as a float (integers widen).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Signed(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The value as a boolean flag, if it is one.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Map from field name to converted value.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// How a captured substring is converted to a [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Unsigned,
    Signed,
    Float,
    /// `1`/`0`, `on`/`off`, `true`/`false` (case-insensitive).
    Flag,
    Text,
}

impl FieldKind {
    /// Convert one captured substring.
    ///
    /// Returns `None` when the text does not parse; the caller skips the
    /// field rather than invalidating the whole answer.
    fn convert(&self, raw: &str) -> Option<FieldValue> {
        match self {
            FieldKind::Unsigned => raw.parse::<u64>().ok().map(FieldValue::Unsigned),
            FieldKind::Signed => raw.parse::<i64>().ok().map(FieldValue::Signed),
            FieldKind::Float => raw.parse::<f64>().ok().map(FieldValue::Float),
            FieldKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" => Some(FieldValue::Flag(true)),
                "0" | "off" | "false" => Some(FieldValue::Flag(false)),
                _ => None,
            },
            FieldKind::Text => Some(FieldValue::Text(raw.to_string())),
        }
    }
}

/// One named capture and its converter.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Shorthand constructor for a [`FieldSpec`].
pub fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Derives a field from already-converted fields.
///
/// Returning `None` (a missing dependency, usually) produces no derived
/// value; it never fails the answer.
pub type DeriveFn = fn(&FieldMap) -> Option<FieldValue>;

/// A pattern plus per-field converters plus optional after-converters.
#[derive(Debug, Clone)]
pub struct AnswerValidator {
    pattern: Regex,
    fields: Vec<FieldSpec>,
    after: Vec<(&'static str, DeriveFn)>,
}

impl AnswerValidator {
    /// Build a validator from a pattern with named capture groups.
    ///
    /// Patterns are compile-time constants defined alongside the command
    /// set, so a malformed pattern is a programming error.
    pub fn new(pattern: &str, fields: Vec<FieldSpec>) -> Self {
        AnswerValidator {
            pattern: Regex::new(pattern).expect("valid answer pattern"),
            fields,
            after: Vec::new(),
        }
    }

    /// Register an after-converter deriving `name` from already-produced
    /// fields. Declaration order is dependency order.
    pub fn derive(mut self, name: &'static str, f: DeriveFn) -> Self {
        self.after.push((name, f));
        self
    }

    /// Try to validate `raw` against this validator's pattern.
    ///
    /// Returns `None` when the pattern does not match at all. On a match,
    /// unconvertible fields are skipped individually.
    pub fn try_validate(&self, raw: &str) -> Option<Answer> {
        let captures = self.pattern.captures(raw)?;

        let mut fields = FieldMap::new();
        for spec in &self.fields {
            let Some(m) = captures.name(spec.name) else {
                continue;
            };
            match spec.kind.convert(m.as_str()) {
                Some(value) => {
                    fields.insert(spec.name.to_string(), value);
                }
                None => {
                    debug!(field = spec.name, raw = m.as_str(), "field conversion failed");
                }
            }
        }

        for (name, derive) in &self.after {
            if let Some(value) = derive(&fields) {
                fields.insert((*name).to_string(), value);
            }
        }

        Some(Answer {
            raw: raw.to_string(),
            valid: true,
            fields,
        })
    }
}

/// Immutable result of validating raw answer text.
#[derive(Debug, Clone)]
pub struct Answer {
    /// The raw answer text as received (lines of a burst joined with `\n`).
    pub raw: String,
    /// Whether any validator's pattern matched.
    pub valid: bool,
    /// Typed fields extracted by the matching validator.
    pub fields: FieldMap,
}

impl Answer {
    /// An invalid answer carrying the (possibly empty) raw text.
    pub fn invalid(raw: impl Into<String>) -> Self {
        Answer {
            raw: raw.into(),
            valid: false,
            fields: FieldMap::new(),
        }
    }

    /// Look up a converted field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Validate raw answer text against a validator list, first match wins.
///
/// Empty input yields an invalid answer without attempting any pattern:
/// blank lines are routine link noise, not candidate answers.
pub fn validate(validators: &[AnswerValidator], raw: &str) -> Answer {
    if raw.trim().is_empty() {
        return Answer::invalid(raw);
    }
    for validator in validators {
        if let Some(answer) = validator.try_validate(raw) {
            return answer;
        }
    }
    Answer::invalid(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_validator() -> AnswerValidator {
        AnswerValidator::new(
            r"^(?P<error>\d+)#(?P<frequency>\d+)#(?P<gain>\d+)#(?P<mode>[01])#(?P<signal>[01])$",
            vec![
                field("error", FieldKind::Unsigned),
                field("frequency", FieldKind::Unsigned),
                field("gain", FieldKind::Unsigned),
                field("mode", FieldKind::Unsigned),
                field("signal", FieldKind::Flag),
            ],
        )
    }

    fn sensor_validator() -> AnswerValidator {
        AnswerValidator::new(
            r"^(?P<frequency>\d+)\s+(?P<urms>[-+]?\d+(?:\.\d+)?)\s+(?P<irms>[-+]?\d+(?:\.\d+)?)\s+(?P<phase>[-+]?\d+(?:\.\d+)?)$",
            vec![
                field("frequency", FieldKind::Unsigned),
                field("urms", FieldKind::Float),
                field("irms", FieldKind::Float),
                field("phase", FieldKind::Float),
            ],
        )
        .derive("signal", |fields| {
            let freq = fields.get("frequency")?.as_u64()?;
            Some(FieldValue::Flag(freq != 0))
        })
    }

    #[test]
    fn empty_input_is_invalid_without_matching() {
        let answer = validate(&[status_validator()], "");
        assert!(!answer.valid);
        assert!(answer.fields.is_empty());

        let answer = validate(&[status_validator()], "   ");
        assert!(!answer.valid);
    }

    #[test]
    fn status_line_converts_all_fields() {
        let answer = validate(&[status_validator()], "0#1000000#100#1#1");
        assert!(answer.valid);
        assert_eq!(answer.field("error").unwrap().as_u64(), Some(0));
        assert_eq!(answer.field("frequency").unwrap().as_u64(), Some(1_000_000));
        assert_eq!(answer.field("gain").unwrap().as_u64(), Some(100));
        assert_eq!(answer.field("mode").unwrap().as_u64(), Some(1));
        assert_eq!(answer.field("signal").unwrap().as_flag(), Some(true));
    }

    #[test]
    fn garbled_line_is_invalid_not_error() {
        let answer = validate(&[status_validator()], "\u{fffd}\u{fffd}#x2");
        assert!(!answer.valid);
        assert_eq!(answer.raw, "\u{fffd}\u{fffd}#x2");
    }

    #[test]
    fn validation_is_deterministic() {
        let validators = [status_validator()];
        let a = validate(&validators, "3#2000000#80#0#0");
        let b = validate(&validators, "3#2000000#80#0#0");
        assert_eq!(a.valid, b.valid);
        assert_eq!(a.fields, b.fields);
    }

    #[test]
    fn first_matching_validator_wins() {
        // A catch-all validator declared after the status validator must not
        // shadow it.
        let catch_all = AnswerValidator::new(
            r"^(?P<text>.+)$",
            vec![field("text", FieldKind::Text)],
        );
        let validators = [status_validator(), catch_all];

        let answer = validate(&validators, "0#500#10#0#0");
        assert!(answer.valid);
        assert!(answer.field("frequency").is_some());
        assert!(answer.field("text").is_none());

        // Anything else falls through to the catch-all.
        let answer = validate(&validators, "hello");
        assert!(answer.valid);
        assert_eq!(answer.field("text").unwrap().as_text(), Some("hello"));
    }

    #[test]
    fn after_converter_derives_signal_from_frequency() {
        let answer = validate(&[sensor_validator()], "1000000 12.5 0.4 3.1");
        assert!(answer.valid);
        assert_eq!(answer.field("signal").unwrap().as_flag(), Some(true));

        let answer = validate(&[sensor_validator()], "0 0.0 0.0 0.0");
        assert_eq!(answer.field("signal").unwrap().as_flag(), Some(false));
    }

    #[test]
    fn after_converter_missing_dependency_yields_nothing() {
        // Validator whose derived field depends on a capture that is absent.
        let v = AnswerValidator::new(
            r"^ok$",
            vec![],
        )
        .derive("signal", |fields| {
            let freq = fields.get("frequency")?.as_u64()?;
            Some(FieldValue::Flag(freq != 0))
        });

        let answer = validate(&[v], "ok");
        assert!(answer.valid);
        assert!(answer.field("signal").is_none());
    }

    #[test]
    fn converter_failure_degrades_single_field() {
        // 21 digits overflow u64; the frequency field is dropped while the
        // rest of the answer survives.
        let answer = validate(
            &[status_validator()],
            "0#999999999999999999999#100#1#1",
        );
        assert!(answer.valid);
        assert!(answer.field("frequency").is_none());
        assert_eq!(answer.field("gain").unwrap().as_u64(), Some(100));
    }

    #[test]
    fn flag_conversion_accepts_words() {
        let v = AnswerValidator::new(
            r"^signal=(?P<signal>\w+)$",
            vec![field("signal", FieldKind::Flag)],
        );
        assert_eq!(
            validate(&[v.clone()], "signal=ON").field("signal").unwrap().as_flag(),
            Some(true)
        );
        assert_eq!(
            validate(&[v], "signal=off").field("signal").unwrap().as_flag(),
            Some(false)
        );
    }

    #[test]
    fn field_value_accessors() {
        assert_eq!(FieldValue::Unsigned(7).as_f64(), Some(7.0));
        assert_eq!(FieldValue::Unsigned(7).as_i64(), Some(7));
        assert_eq!(FieldValue::Signed(-3).as_f64(), Some(-3.0));
        assert_eq!(FieldValue::Float(1.5).as_u64(), None);
        assert_eq!(FieldValue::Text("x".into()).as_f64(), None);
        assert_eq!(FieldValue::Flag(true).as_flag(), Some(true));
    }
}
