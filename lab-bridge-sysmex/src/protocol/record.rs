use tracing::debug;

/// ASTM E1394-97 record types understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `H`: message header.
    Header,
    /// `P`: patient information.
    Patient,
    /// `O`: test order.
    Order,
    /// `R`: result.
    Result,
    /// `C`: comment.
    Comment,
    /// `Q`: request information (worklist query).
    Query,
    /// `L`: message terminator.
    Terminator,
}

impl RecordKind {
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'H' => Some(RecordKind::Header),
            'P' => Some(RecordKind::Patient),
            'O' => Some(RecordKind::Order),
            'R' => Some(RecordKind::Result),
            'C' => Some(RecordKind::Comment),
            'Q' => Some(RecordKind::Query),
            'L' => Some(RecordKind::Terminator),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            RecordKind::Header => 'H',
            RecordKind::Patient => 'P',
            RecordKind::Order => 'O',
            RecordKind::Result => 'R',
            RecordKind::Comment => 'C',
            RecordKind::Query => 'Q',
            RecordKind::Terminator => 'L',
        }
    }
}

/// One parsed ASTM record.
///
/// `fields` is the raw `|` split of the line, record-type letter included at
/// index 0, with trailing empty fields preserved. Field indexes therefore
/// match the E1394 numbering used throughout the translator (`R.field[2]`
/// is the analyte identifier, and so on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    fields: Vec<String>,
}

impl Record {
    /// Parse one line (record-number prefix already stripped). Lines whose
    /// first field is not a known record letter yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<String> = line.split('|').map(str::to_string).collect();
        let first = fields.first()?;
        if first.len() != 1 {
            return None;
        }
        let kind = RecordKind::from_letter(first.chars().next()?)?;
        Some(Self { kind, fields })
    }

    /// Raw field access; `field(0)` is the record-type letter.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Field access defaulting to the empty string, for positions the
    /// instrument routinely omits.
    pub fn field_or_empty(&self, index: usize) -> &str {
        self.field(index).unwrap_or("")
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// All fields after the record-type letter, in order.
    pub fn tail_fields(&self) -> &[String] {
        &self.fields[1..]
    }
}

/// Strip the optional single-digit Sysmex record-number prefix.
///
/// Some XP firmwares emit `1H|…`, `2P|…`; others do not. The digit is only
/// stripped when it is `0`..`7` and immediately followed by an uppercase
/// record letter and a `|`.
pub fn strip_record_prefix(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() >= 3
        && (b'0'..=b'7').contains(&bytes[0])
        && bytes[1].is_ascii_uppercase()
        && bytes[2] == b'|'
    {
        &line[1..]
    } else {
        line
    }
}

/// Split an assembled ASTM message into its record lines.
///
/// Any run of CR/LF counts as one separator; blank lines are dropped.
pub fn split_lines(message: &str) -> Vec<&str> {
    message
        .split(['\r', '\n'])
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Parse an assembled ASTM message into records, stripping record-number
/// prefixes along the way. Unrecognized lines are skipped.
pub fn parse_message(message: &str) -> Vec<Record> {
    split_lines(message)
        .into_iter()
        .map(strip_record_prefix)
        .filter_map(|line| {
            let parsed = Record::parse(line);
            if parsed.is_none() {
                debug!(line, "skipping unrecognized ASTM line");
            }
            parsed
        })
        .collect()
}
