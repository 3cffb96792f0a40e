//! AMI packet structure shared by responses and events

use crate::constants::{LINE_TERMINATOR, RESPONSE_SUCCESS};
use crate::headers::{AmiEventType, Field};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One framed unit of the protocol: `field: value` lines ended by a blank line.
///
/// A packet carrying an `Event` field is an event; one carrying `Response` is
/// the reply to an action. Values are opaque text. When a field repeats
/// within one packet the last value wins.
///
/// Serializes as a flat JSON object of its fields, which is the payload the
/// relay posts to the CRM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet {
    fields: HashMap<String, String>,
}

impl Packet {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field by name (case-sensitive, as sent on the wire).
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// Set or overwrite a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .insert(name.into(), value.into());
    }

    /// Remove a field, returning its value if it existed.
    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<String> {
        self.fields
            .remove(name.as_ref())
    }

    /// All fields.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// Consume the packet, returning its fields.
    pub fn into_fields(self) -> HashMap<String, String> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields
            .is_empty()
    }

    /// Raw `Event` field.
    pub fn event(&self) -> Option<&str> {
        self.get(Field::Event)
    }

    /// `Event` field parsed into a known [`AmiEventType`].
    pub fn event_type(&self) -> Option<AmiEventType> {
        self.event()?
            .parse()
            .ok()
    }

    /// `true` if the packet has an `Event` field.
    pub fn is_event(&self) -> bool {
        self.event()
            .is_some()
    }

    /// Raw `Response` field (`Success`, `Error`, `Goodbye`, ...).
    pub fn response(&self) -> Option<&str> {
        self.get(Field::Response)
    }

    /// `true` if the packet has a `Response` field.
    pub fn is_response(&self) -> bool {
        self.response()
            .is_some()
    }

    /// `true` iff `Response` equals `Success`, ignoring ASCII case.
    pub fn is_success(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case(RESPONSE_SUCCESS))
    }

    /// `Message` field accompanying most responses.
    pub fn message(&self) -> Option<&str> {
        self.get(Field::Message)
    }

    /// `ActionID` echoed back by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.get(Field::ActionId)
    }

    /// `Channel` field (e.g. `SIP/8001-00000001`).
    pub fn channel(&self) -> Option<&str> {
        self.get(Field::Channel)
    }

    /// `Uniqueid` field identifying one call leg.
    pub fn unique_id(&self) -> Option<&str> {
        self.get(Field::Uniqueid)
    }

    /// Fields as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }

    /// Serialize to wire format, terminated by a blank line.
    ///
    /// `Response` or `Event` is emitted first, remaining fields sorted by
    /// name so the output is deterministic.
    pub fn to_wire_format(&self) -> String {
        use std::fmt::Write;

        let lead = [Field::Response.as_str(), Field::Event.as_str()];
        let mut out = String::new();
        for name in lead {
            if let Some(value) = self.get(name) {
                let _ = write!(out, "{}: {}{}", name, value, LINE_TERMINATOR);
            }
        }

        let mut rest: Vec<_> = self
            .fields
            .iter()
            .filter(|(k, _)| !lead.contains(&k.as_str()))
            .collect();
        rest.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in rest {
            let _ = write!(out, "{}: {}{}", k, v, LINE_TERMINATOR);
        }
        out.push_str(LINE_TERMINATOR);
        out
    }
}

impl<K, V> FromIterator<(K, V)> for Packet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
