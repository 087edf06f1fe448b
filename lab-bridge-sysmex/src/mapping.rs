//! LIVD-style result-code mapping table.
//!
//! The table rewrites vendor analyte codes into LIS codes, overrides units,
//! and applies numeric conversions. Rows are loaded once at startup from a
//! TOML file with an `ivd_mapping` array of tables and are immutable
//! afterwards.

use crate::error::{BridgeError, BridgeResult};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Tokens the instrument emits for "no value"; they map to an empty OBX-5.
const NO_VALUE_TOKENS: [&str; 3] = ["----", "---", "--"];

/// Numeric conversion applied to a mapped result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvertMode {
    #[default]
    None,
    Multiply,
    Divide,
    Add,
    Subtract,
    Log10,
}

impl ConvertMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(ConvertMode::None),
            "multiply" => Some(ConvertMode::Multiply),
            "divide" => Some(ConvertMode::Divide),
            "add" => Some(ConvertMode::Add),
            "subtract" => Some(ConvertMode::Subtract),
            "log10" => Some(ConvertMode::Log10),
            _ => None,
        }
    }
}

/// One mapping row. A row with no `test` value is "global" and applies to
/// every order; Sysmex tables only use global rows.
#[derive(Debug, Clone)]
pub struct MappingRow {
    pub test: Option<String>,
    pub vendor_result_code: String,
    pub lis_result_code: String,
    pub lis_unit: String,
    pub convert: ConvertMode,
    /// Conversion operand. Defaults to 0.0 when absent or unparsable,
    /// which makes `divide` a no-op and `multiply` zero the value, a
    /// table-authoring pitfall worth knowing about.
    pub factor: f64,
}

impl MappingRow {
    fn is_global(&self) -> bool {
        self.test.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    /// Apply this row's conversion to a raw result value. Non-numeric
    /// values pass through unchanged, as do divide-by-zero and log10 of a
    /// non-positive number.
    pub fn convert_value(&self, raw: &str) -> String {
        if self.convert == ConvertMode::None {
            return raw.to_string();
        }
        let Some(num) = parse_decimal(raw) else {
            return raw.to_string();
        };
        let converted = match self.convert {
            ConvertMode::None => return raw.to_string(),
            ConvertMode::Multiply => num * self.factor,
            ConvertMode::Divide => {
                if self.factor == 0.0 {
                    return raw.to_string();
                }
                num / self.factor
            }
            ConvertMode::Add => num + self.factor,
            ConvertMode::Subtract => num - self.factor,
            ConvertMode::Log10 => {
                if num <= 0.0 {
                    return raw.to_string();
                }
                num.log10()
            }
        };
        converted.to_string()
    }
}

/// Immutable collection of mapping rows with normalized lookup.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    rows: Vec<MappingRow>,
}

#[derive(Debug, Deserialize)]
struct RawMappingFile {
    #[serde(default)]
    ivd_mapping: Vec<RawMappingRow>,
}

#[derive(Debug, Deserialize)]
struct RawMappingRow {
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    vendor_result_code: String,
    #[serde(default)]
    lis_result_code: String,
    #[serde(default)]
    lis_unit: String,
    #[serde(default)]
    convert: Option<String>,
    #[serde(default)]
    factor: Option<FactorValue>,
}

/// `factor` may arrive as an integer, a float, or a numeric string using
/// either `.` or `,` as the decimal separator.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactorValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MappingTable {
    /// An empty table: every lookup misses, raw codes pass through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the table from a TOML file. A missing or empty `mapping_path`
    /// yields an empty table rather than an error.
    pub fn load(path: &str) -> BridgeResult<Self> {
        if path.trim().is_empty() {
            info!("no mapping path configured, using empty mapping table");
            return Ok(Self::empty());
        }
        let raw = std::fs::read_to_string(Path::new(path))
            .map_err(|e| BridgeError::Configuration(format!("cannot read mapping {path}: {e}")))?;
        let table = Self::from_toml_str(&raw)?;
        info!(path, rows = table.len(), "loaded IVD mapping table");
        Ok(table)
    }

    /// Parse a table from TOML text.
    pub fn from_toml_str(raw: &str) -> BridgeResult<Self> {
        let file: RawMappingFile = toml::from_str(raw)
            .map_err(|e| BridgeError::Configuration(format!("invalid mapping TOML: {e}")))?;

        let rows = file
            .ivd_mapping
            .into_iter()
            .map(|raw_row| {
                let convert = match raw_row.convert.as_deref() {
                    None => ConvertMode::None,
                    Some(c) => ConvertMode::parse(c).unwrap_or_else(|| {
                        warn!(convert = c, "unknown convert mode in mapping row, using none");
                        ConvertMode::None
                    }),
                };
                let factor = match raw_row.factor {
                    None => 0.0,
                    Some(FactorValue::Int(i)) => i as f64,
                    Some(FactorValue::Float(f)) => f,
                    Some(FactorValue::Text(t)) => parse_decimal(&t).unwrap_or_else(|| {
                        warn!(factor = t, "unparsable mapping factor, using 0");
                        0.0
                    }),
                };
                MappingRow {
                    test: raw_row.test,
                    vendor_result_code: raw_row.vendor_result_code,
                    lis_result_code: raw_row.lis_result_code.trim().to_string(),
                    lis_unit: raw_row.lis_unit.trim().to_string(),
                    convert,
                    factor,
                }
            })
            .collect();

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find the first global row whose normalized vendor code matches the
    /// normalized input, case-insensitively.
    pub fn lookup(&self, vendor_code: &str) -> Option<&MappingRow> {
        let wanted = normalize_vendor_code(vendor_code);
        if wanted.is_empty() {
            return None;
        }
        self.rows.iter().find(|row| {
            row.is_global()
                && normalize_vendor_code(&row.vendor_result_code).eq_ignore_ascii_case(&wanted)
        })
    }
}

/// Normalize a vendor analyte code by trimming it and stripping every
/// trailing `^<digits>` component: `^^^^WBC^7^1` → `^^^^WBC`.
///
/// The XP appends dilution/mode suffixes that would otherwise defeat the
/// mapping lookup. Normalization is idempotent.
pub fn normalize_vendor_code(code: &str) -> String {
    let mut s = code.trim();
    loop {
        match s.rfind('^') {
            Some(pos) => {
                let tail = &s[pos + 1..];
                if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
                    s = &s[..pos];
                } else {
                    break;
                }
            }
            None => break,
        }
    }
    s.to_string()
}

/// True when the instrument sent a "no value" placeholder.
pub fn is_no_value(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || NO_VALUE_TOKENS.contains(&trimmed)
}

/// Parse a decimal number accepting both `.` and `,` separators.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[ivd_mapping]]
vendor_result_code = "^^^^WBC"
lis_result_code = "6690-2"
lis_unit = "10*3/uL"
convert = "none"
factor = 0

[[ivd_mapping]]
vendor_result_code = "^^^^RBC^26"
lis_result_code = "789-8"
lis_unit = ""
convert = "multiply"
factor = "2,5"

[[ivd_mapping]]
test = "CBC"
vendor_result_code = "^^^^HGB"
lis_result_code = "718-7"
lis_unit = "g/dL"
convert = "none"
factor = 0
"#;

    #[test]
    fn normalization_strips_trailing_numeric_components() {
        assert_eq!(normalize_vendor_code("^^^^WBC^7^1"), "^^^^WBC");
        assert_eq!(normalize_vendor_code("^^^^WBC^26"), "^^^^WBC");
        assert_eq!(normalize_vendor_code("^^^^WBC"), "^^^^WBC");
        assert_eq!(normalize_vendor_code(" ^^^^PLT^1 "), "^^^^PLT");
    }

    #[test]
    fn normalization_is_idempotent() {
        for code in ["^^^^WBC^7^1", "^^^^RBC^26", "^^^^HGB", "PLT", ""] {
            let once = normalize_vendor_code(code);
            assert_eq!(normalize_vendor_code(&once), once);
        }
    }

    #[test]
    fn lookup_ignores_suffix_and_case() {
        let table = MappingTable::from_toml_str(SAMPLE).unwrap();
        let row = table.lookup("^^^^wbc^7^1").expect("row");
        assert_eq!(row.lis_result_code, "6690-2");
        // Row vendor codes are normalized on the fly too.
        let row = table.lookup("^^^^RBC").expect("row");
        assert_eq!(row.lis_result_code, "789-8");
    }

    #[test]
    fn lookup_skips_non_global_rows() {
        let table = MappingTable::from_toml_str(SAMPLE).unwrap();
        assert!(table.lookup("^^^^HGB").is_none());
    }

    #[test]
    fn factor_accepts_comma_decimal_strings() {
        let table = MappingTable::from_toml_str(SAMPLE).unwrap();
        let row = table.lookup("^^^^RBC").unwrap();
        assert_eq!(row.factor, 2.5);
        assert_eq!(row.convert, ConvertMode::Multiply);
        assert_eq!(row.convert_value("4"), "10");
    }

    #[test]
    fn conversion_closed_forms() {
        let row = |convert, factor| MappingRow {
            test: None,
            vendor_result_code: "X".into(),
            lis_result_code: "X".into(),
            lis_unit: String::new(),
            convert,
            factor,
        };
        assert_eq!(row(ConvertMode::Multiply, 10.0).convert_value("6.42"), "64.2");
        assert_eq!(row(ConvertMode::Divide, 2.0).convert_value("9"), "4.5");
        assert_eq!(row(ConvertMode::Add, 1.5).convert_value("1"), "2.5");
        assert_eq!(row(ConvertMode::Subtract, 0.5).convert_value("2"), "1.5");
        assert_eq!(row(ConvertMode::Log10, 0.0).convert_value("100"), "2");
        assert_eq!(row(ConvertMode::None, 42.0).convert_value("7"), "7");
    }

    #[test]
    fn conversion_leaves_degenerate_inputs_raw() {
        let div0 = MappingRow {
            test: None,
            vendor_result_code: "X".into(),
            lis_result_code: "X".into(),
            lis_unit: String::new(),
            convert: ConvertMode::Divide,
            factor: 0.0,
        };
        assert_eq!(div0.convert_value("9"), "9");
        let log = MappingRow {
            convert: ConvertMode::Log10,
            ..div0.clone()
        };
        assert_eq!(log.convert_value("-3"), "-3");
        assert_eq!(log.convert_value("0"), "0");
        let mul = MappingRow {
            convert: ConvertMode::Multiply,
            factor: 2.0,
            ..div0
        };
        assert_eq!(mul.convert_value("not-a-number"), "not-a-number");
    }

    #[test]
    fn comma_decimal_values_convert() {
        let row = MappingRow {
            test: None,
            vendor_result_code: "X".into(),
            lis_result_code: "X".into(),
            lis_unit: String::new(),
            convert: ConvertMode::Multiply,
            factor: 2.0,
        };
        assert_eq!(row.convert_value("3,5"), "7");
    }

    #[test]
    fn no_value_tokens() {
        for token in ["----", "---", "--", "", "  "] {
            assert!(is_no_value(token), "{token:?} should be a no-value token");
        }
        assert!(!is_no_value("0"));
        assert!(!is_no_value("-"));
    }

    #[test]
    fn empty_mapping_file_is_fine() {
        let table = MappingTable::from_toml_str("").unwrap();
        assert!(table.is_empty());
        assert!(table.lookup("^^^^WBC").is_none());
    }
}
