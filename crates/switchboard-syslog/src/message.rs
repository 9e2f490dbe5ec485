//! The parsed form of an RFC 5424 octet-framed syslog message.
//!
//! Each field is materialized into an owned buffer the moment the lexer's
//! state machine extracts it. The reference lexer copies out of its ring
//! accumulator into a reusable `bytearray` lookaside on every extraction (a
//! Python `bytearray` slice is itself a fresh copy, not a view), so there is
//! no "borrow the accumulator" step to preserve here: by the time a field
//! lands on `SyslogMessage` it has already been copied once, and copying it
//! again into `Vec<u8>`/`String` instead of a second scratch buffer costs
//! nothing extra while sidestepping a self-referential lifetime over a ring
//! buffer that keeps mutating underneath it.

use std::collections::BTreeMap;

/// One `name="value"` pair inside a structured-data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredDataField {
    pub name: String,
    pub value: String,
}

/// A single bracketed `[NAME field=value ...]` structured-data element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredData {
    fields: BTreeMap<String, StructuredDataField>,
}

impl StructuredData {
    pub fn insert(&mut self, field: StructuredDataField) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn get(&self, name: &str) -> Option<&StructuredDataField> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructuredDataField> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A fully decoded RFC 5424 message, octet-framing already stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyslogMessage {
    pub priority: String,
    pub version: String,
    pub timestamp: String,
    pub hostname: String,
    pub appname: String,
    pub processid: String,
    pub messageid: String,
    pub structured_data: BTreeMap<String, StructuredData>,
    pub message: Vec<u8>,
}

impl SyslogMessage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn structured_data(&self, name: &str) -> Option<&StructuredData> {
        self.structured_data.get(name)
    }

    /// The message body decoded as UTF-8, lossily substituting invalid
    /// sequences. RFC 5424 bodies are conventionally UTF-8 but nothing in the
    /// octet-counted framing enforces it, so callers that need the raw bytes
    /// should use [`SyslogMessage::message`] directly.
    pub fn message_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}
