//! DL20 line grammars
//!
//! A DL20 line carries five direct telemetry fields followed by three
//! checksummed sub-messages, all tab separated:
//!
//! ```text
//! recnum  t_top  t_bottom  temp_v  button  ISHPR,h,p,r cc  ISDPT,d,M,p,B,t,C cc  ISDPT,d,M,p,B,t,C cc
//! ```
//!
//! Two grammars split a line into raw text fields:
//!
//! - [`PositionalGrammar`]: locates fields by delimiter position and
//!   tolerates malformed sub-messages.
//! - [`StrictGrammar`]: one anchored pattern that must match the whole line.
//!
//! In both, a sub-message whose checksum fails is reported as `None` so the
//! decoder can substitute NaN for just that block.

use regex::Regex;

use super::checksum::{payload, verify_checksum};
use super::decoder::DecodeError;

/// Minimum number of tab-separated fields in a positional line.
pub const MIN_TOP_LEVEL_FIELDS: usize = 8;

/// Minimum comma fields in an `ISHPR` block (tag + 3 values).
pub const HPR_MIN_FIELDS: usize = 4;

/// Minimum comma fields in an `ISDPT` block (tag + 3 value/unit pairs).
pub const DPT_MIN_FIELDS: usize = 7;

/// Text of the values inside one checksummed block, or `None` when the
/// block failed validation.
pub type BlockValues<'a> = Option<[&'a str; 3]>;

/// A line split into named raw text fields, before numeric conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub record_number: &'a str,
    pub transducer_top: &'a str,
    pub transducer_bottom: &'a str,
    pub temperature_voltage: &'a str,
    pub button: &'a str,
    /// heading, pitch, roll
    pub hpr: BlockValues<'a>,
    /// depth, pressure, temperature (top sensor)
    pub dpt_top: BlockValues<'a>,
    /// depth, pressure, temperature (bottom sensor)
    pub dpt_bottom: BlockValues<'a>,
}

/// A strategy for splitting a DL20 line into raw fields.
pub trait LineGrammar: Send + Sync {
    /// Split `line` into raw text fields.
    ///
    /// Fails only on structural problems; bad sub-messages come back as
    /// `None` blocks.
    fn split<'a>(&self, line: &'a str) -> Result<RawRecord<'a>, DecodeError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Positional grammar
// ============================================================================

/// Delimiter-position grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionalGrammar;

impl PositionalGrammar {
    /// Heading/pitch/roll from an `ISHPR,h,p,r cc` block.
    pub fn parse_hpr(message: &str) -> BlockValues<'_> {
        let values = block_fields(message);
        if values.len() < HPR_MIN_FIELDS || !verify_checksum(message) {
            return None;
        }
        Some([values[1], values[2], values[3]])
    }

    /// Depth/pressure/temperature from an `ISDPT,d,M,p,B,t,C cc` block.
    ///
    /// Unit letters sit between the values and are skipped.
    pub fn parse_dpt(message: &str) -> BlockValues<'_> {
        let values = block_fields(message);
        if values.len() < DPT_MIN_FIELDS || !verify_checksum(message) {
            return None;
        }
        Some([values[1], values[3], values[5]])
    }
}

/// Comma fields of a block's payload (checksum suffix stripped).
fn block_fields(message: &str) -> Vec<&str> {
    payload(message).unwrap_or("").split(',').collect()
}

impl LineGrammar for PositionalGrammar {
    fn split<'a>(&self, line: &'a str) -> Result<RawRecord<'a>, DecodeError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < MIN_TOP_LEVEL_FIELDS {
            return Err(DecodeError::TooFewFields {
                found: fields.len(),
                line: line.to_string(),
            });
        }

        Ok(RawRecord {
            record_number: fields[0],
            transducer_top: fields[1],
            transducer_bottom: fields[2],
            temperature_voltage: fields[3],
            button: fields[4],
            hpr: Self::parse_hpr(fields[5]),
            dpt_top: Self::parse_dpt(fields[6]),
            dpt_bottom: Self::parse_dpt(fields[7]),
        })
    }

    fn name(&self) -> &'static str {
        "positional"
    }
}

// ============================================================================
// Strict grammar
// ============================================================================

/// Signed decimal: `12`, `-12.5`, `+.5`.
const NUM: &str = r"[+-]?(?:[0-9]+(?:\.[0-9]+)?|\.[0-9]+)";

/// Signed integer for the raw telemetry counts.
const INT: &str = r"[+-]?[0-9]+";

/// Whole-line anchored grammar.
#[derive(Debug, Clone)]
pub struct StrictGrammar {
    pattern: Regex,
}

impl StrictGrammar {
    /// Compile the line pattern.
    pub fn new() -> Result<Self, regex::Error> {
        let dpt = |tag: &str| {
            format!(
                r"(?P<{tag}>ISDPT,(?P<depth_{tag}>{NUM}),M,(?P<pressure_{tag}>{NUM}),B,(?P<temperature_{tag}>{NUM}),C) [0-9A-Fa-f]{{2}}"
            )
        };
        let pattern = format!(
            r"^(?P<record_number>[0-9]+)\t(?P<transducer_top>{INT})\t(?P<transducer_bottom>{INT})\t(?P<temperature_voltage>{INT})\t(?P<button>{INT})\t(?P<hpr>ISHPR,(?P<heading>{NUM}),(?P<pitch>{NUM}),(?P<roll>{NUM})) [0-9A-Fa-f]{{2}}\t{top}\t{bottom}$",
            top = dpt("top"),
            bottom = dpt("bottom"),
        );
        Ok(Self {
            pattern: Regex::new(&pattern)?,
        })
    }
}

impl LineGrammar for StrictGrammar {
    fn split<'a>(&self, line: &'a str) -> Result<RawRecord<'a>, DecodeError> {
        let caps = self
            .pattern
            .captures(line)
            .ok_or_else(|| DecodeError::GrammarMismatch {
                length: line.len(),
                line: line.to_string(),
            })?;

        // The pattern has no optional groups, so every name below is present
        // on a successful match.
        let text = |name: &str| -> &'a str { caps.name(name).map_or("", |m| m.as_str()) };

        // A block's full text runs from its tag to the end of its checksum,
        // which is three bytes past the captured payload.
        let block = |name: &str, values: [&str; 3]| -> BlockValues<'a> {
            let m = caps.name(name)?;
            let sealed = line.get(m.start()..m.end() + 3)?;
            verify_checksum(sealed).then(|| {
                [
                    caps.name(values[0]).map_or("", |v| v.as_str()),
                    caps.name(values[1]).map_or("", |v| v.as_str()),
                    caps.name(values[2]).map_or("", |v| v.as_str()),
                ]
            })
        };

        Ok(RawRecord {
            record_number: text("record_number"),
            transducer_top: text("transducer_top"),
            transducer_bottom: text("transducer_bottom"),
            temperature_voltage: text("temperature_voltage"),
            button: text("button"),
            hpr: block("hpr", ["heading", "pitch", "roll"]),
            dpt_top: block("top", ["depth_top", "pressure_top", "temperature_top"]),
            dpt_bottom: block(
                "bottom",
                ["depth_bottom", "pressure_bottom", "temperature_bottom"],
            ),
        })
    }

    fn name(&self) -> &'static str {
        "strict"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::checksum::seal;

    fn line() -> String {
        format!(
            "1042\t5120\t-33\t812\t0\t{}\t{}\t{}",
            seal("ISHPR,271.3,-1.25,0.40"),
            seal("ISDPT,12.34,M,2.235,B,3.10,C"),
            seal("ISDPT,14.02,M,2.402,B,3.05,C"),
        )
    }

    #[test]
    fn test_parse_hpr_valid() {
        let block = seal("ISHPR,271.3,-1.25,0.40");
        assert_eq!(
            PositionalGrammar::parse_hpr(&block),
            Some(["271.3", "-1.25", "0.40"])
        );
    }

    #[test]
    fn test_parse_hpr_too_few_fields() {
        let block = seal("ISHPR,271.3,-1.25");
        assert_eq!(PositionalGrammar::parse_hpr(&block), None);
    }

    #[test]
    fn test_parse_dpt_skips_units() {
        let block = seal("ISDPT,12.34,M,2.235,B,3.10,C");
        assert_eq!(
            PositionalGrammar::parse_dpt(&block),
            Some(["12.34", "2.235", "3.10"])
        );
    }

    #[test]
    fn test_parse_dpt_bad_checksum() {
        let block = "ISDPT,12.34,M,2.235,B,3.10,C 00";
        assert_eq!(PositionalGrammar::parse_dpt(block), None);
    }

    #[test]
    fn test_positional_split() {
        let line = line();
        let raw = PositionalGrammar.split(&line).unwrap();
        assert_eq!(raw.record_number, "1042");
        assert_eq!(raw.transducer_bottom, "-33");
        assert_eq!(raw.dpt_bottom, Some(["14.02", "2.402", "3.05"]));
    }

    #[test]
    fn test_positional_too_few_fields() {
        let err = PositionalGrammar.split("1\t2\t3").unwrap_err();
        assert!(matches!(err, DecodeError::TooFewFields { found: 3, .. }));
    }

    #[test]
    fn test_strict_split_matches_positional() {
        let line = line();
        let strict = StrictGrammar::new().unwrap();
        assert_eq!(strict.split(&line).unwrap(), PositionalGrammar.split(&line).unwrap());
    }

    #[test]
    fn test_strict_rejects_extra_whitespace() {
        let strict = StrictGrammar::new().unwrap();
        let line = line().replace("\t5120", "\t 5120");
        let err = strict.split(&line).unwrap_err();
        match err {
            DecodeError::GrammarMismatch { length, line: reported } => {
                assert_eq!(length, line.len());
                assert_eq!(reported, line);
            }
            other => panic!("expected GrammarMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_strict_accepts_only_ascii_digits() {
        let strict = StrictGrammar::new().unwrap();
        // U+0661 and U+0662 are Arabic-Indic digits
        for line in [
            line().replacen("1042", "\u{661}042", 1),
            line().replacen("5120", "51\u{662}0", 1),
        ] {
            assert!(matches!(
                strict.split(&line),
                Err(DecodeError::GrammarMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_strict_bad_block_checksum_is_not_fatal() {
        let strict = StrictGrammar::new().unwrap();
        let good = seal("ISHPR,271.3,-1.25,0.40");
        let bad = format!("{}{}", &good[..good.len() - 2], "00");
        let line = line().replace(&good, &bad);
        let raw = strict.split(&line).unwrap();
        assert_eq!(raw.hpr, None);
        assert!(raw.dpt_top.is_some());
    }
}
