// Segment-level HL7 v2 (ER7) primitives.
//
// This crate deliberately stays below the level of message grammars: it
// splits an ER7 payload into segments and fields and offers a handful of
// accessors for the segments the bridge cares about (MSH, MSA, SPM). Message
// structure is enforced by the translator, not here.

use thiserror::Error;

pub mod builder;

/// Default ER7 field separator.
pub const FIELD_SEPARATOR: char = '|';
/// Default ER7 component separator.
pub const COMPONENT_SEPARATOR: char = '^';
/// Default ER7 subcomponent separator.
pub const SUBCOMPONENT_SEPARATOR: char = '&';
/// Default ER7 repetition separator.
pub const REPETITION_SEPARATOR: char = '~';
/// Segment separator on the wire.
pub const SEGMENT_SEPARATOR: char = '\r';

/// Errors raised while interpreting an ER7 payload.
#[derive(Debug, Error)]
pub enum Hl7Error {
    /// The payload contained no segments at all.
    #[error("empty HL7 message")]
    Empty,
    /// The first segment of a message must be MSH.
    #[error("HL7 message does not start with an MSH segment")]
    MissingMsh,
    /// A segment required by the caller was absent.
    #[error("missing required segment: {0}")]
    MissingSegment(String),
    /// A field required by the caller was absent or blank.
    #[error("missing required field {segment}-{field}")]
    MissingField { segment: String, field: usize },
}

/// A single ER7 segment: a three-letter name plus its raw fields.
///
/// Fields are stored exactly as split on `|`; trailing empty fields are
/// preserved so positional access stays faithful to the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    fields: Vec<String>,
}

impl Segment {
    /// Parse a single segment line (no trailing CR).
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split(FIELD_SEPARATOR);
        let name = parts.next().unwrap_or_default().to_string();
        let fields = parts.map(str::to_string).collect();
        Self { name, fields }
    }

    /// Positional field access: `field(1)` is the first field after the
    /// segment name. For non-MSH segments this matches HL7 numbering
    /// (`MSA|AA` → `field(1) == "AA"`).
    pub fn field(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return Some(&self.name);
        }
        self.fields.get(index - 1).map(String::as_str)
    }

    /// HL7-numbered field access with the MSH offset applied.
    ///
    /// For MSH, HL7 counts the field separator itself as MSH-1, so MSH-10
    /// (message control ID) sits one split position earlier than in other
    /// segments.
    pub fn hl7_field(&self, number: usize) -> Option<&str> {
        if self.name == "MSH" {
            match number {
                0 => Some(&self.name),
                1 => Some("|"),
                n => self.fields.get(n - 2).map(String::as_str),
            }
        } else {
            self.field(number)
        }
    }

    /// Number of fields after the segment name.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// A parsed ER7 message: an ordered list of segments.
#[derive(Debug, Clone)]
pub struct Message {
    pub segments: Vec<Segment>,
}

impl Message {
    /// Parse an ER7 payload. Accepts `\r`, `\r\n` or `\n` segment
    /// separators; the first segment must be MSH.
    pub fn parse(raw: &str) -> Result<Self, Hl7Error> {
        let segments: Vec<Segment> = raw
            .split(['\r', '\n'])
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(Segment::parse)
            .collect();

        if segments.is_empty() {
            return Err(Hl7Error::Empty);
        }
        if segments[0].name != "MSH" {
            return Err(Hl7Error::MissingMsh);
        }
        Ok(Self { segments })
    }

    /// First segment with the given name, if any.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// All segments with the given name, in message order.
    pub fn segments_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Segment> {
        self.segments.iter().filter(move |s| s.name == name)
    }

    /// The MSH segment. Guaranteed present by `parse`.
    pub fn msh(&self) -> &Segment {
        &self.segments[0]
    }

    /// MSH-9, the message type field (e.g. `OML^O33`).
    pub fn message_type(&self) -> Option<&str> {
        self.msh().hl7_field(9)
    }

    /// MSH-10, the message control ID.
    pub fn control_id(&self) -> Option<&str> {
        self.msh().hl7_field(10)
    }

    /// MSA-1, the acknowledgment code of an ACK-carrying message.
    pub fn ack_code(&self) -> Option<&str> {
        self.segment("MSA").and_then(|msa| msa.field(1))
    }
}

/// Extract a `^`-separated component from a raw field value.
/// `component("^^20359^A", 2)` yields `"20359"` (zero-based index).
pub fn component(field: &str, index: usize) -> Option<&str> {
    field.split(COMPONENT_SEPARATOR).nth(index)
}

/// Extract an `&`-separated subcomponent from a raw component value.
pub fn subcomponent(component: &str, index: usize) -> Option<&str> {
    component.split(SUBCOMPONENT_SEPARATOR).nth(index)
}

/// Quick check used before attempting a full parse: an ER7 payload must
/// open with a pipe-delimited MSH segment.
pub fn looks_like_er7(raw: &str) -> bool {
    raw.starts_with("MSH|")
}
