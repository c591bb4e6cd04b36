//! Manager event types and structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channel::{ChannelName, HangupCause};
use crate::headers::ManagerHeader;

/// Name of the synthetic event dispatched to listeners when the connection
/// dies. No further events can ever arrive after it.
pub const DISCONNECT_EVENT: &str = "Disconnect";

/// Error returned when parsing an unknown event name string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventNameError(pub String);

impl std::fmt::Display for ParseEventNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event name: {}", self.0)
    }
}

impl std::error::Error for ParseEventNameError {}

define_wire_enum! {
    error_type: ParseEventNameError,
    /// Well-known manager event names used by this crate.
    ///
    /// The full catalogue of Asterisk events is far larger; unknown events
    /// still flow through dispatch as plain [`ManagerEvent`]s with their wire
    /// name. This enum covers the events the bundled activities react to.
    pub enum EventName {
        Hangup => "Hangup",
        Newchannel => "Newchannel",
        Newstate => "Newstate",
        DialBegin => "DialBegin",
        DialEnd => "DialEnd",
        OriginateResponse => "OriginateResponse",
        Hold => "Hold",
        Unhold => "Unhold",
        ParkedCall => "ParkedCall",
        ParkedCallsComplete => "ParkedCallsComplete",
        BridgeListItem => "BridgeListItem",
        BridgeListComplete => "BridgeListComplete",
        ConfbridgeJoin => "ConfbridgeJoin",
        ConfbridgeUnmute => "ConfbridgeUnmute",
        FullyBooted => "FullyBooted",
        PeerStatus => "PeerStatus",
        /// Synthetic, emitted locally on connection loss.
        Disconnect => "Disconnect",
    }
}

/// An inbound manager event: a name plus a flat field map.
///
/// Immutable once decoded; the setters exist for construction (outbound
/// `UserEvent`-style use and tests). Typed per-event records are the
/// consumer's concern; the core only guarantees the field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerEvent {
    name: String,
    fields: HashMap<String, String>,
}

impl ManagerEvent {
    /// Create an empty event with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: HashMap::new(),
        }
    }

    /// Build an event from decoded fields (keys already lowercased).
    pub(crate) fn from_fields(name: String, fields: HashMap<String, String>) -> Self {
        Self { name, fields }
    }

    /// Wire name of the event (e.g. `Hangup`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this event has the given well-known name.
    pub fn is(&self, name: EventName) -> bool {
        self.name.eq_ignore_ascii_case(name.as_str())
    }

    /// Look up a field by name (case-insensitive).
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(&name.as_ref().to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Set or overwrite a field.
    pub fn set_field(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.fields
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// All fields, keyed by lowercased name.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// The correlation token, when this is a response event.
    pub fn action_id(&self) -> Option<&str> {
        self.field(ManagerHeader::ActionId)
    }

    /// The `Channel` field as a parsed channel identity.
    pub fn channel(&self) -> Option<ChannelName> {
        self.field(ManagerHeader::Channel).map(ChannelName::new)
    }

    /// The `Uniqueid` field.
    pub fn unique_id(&self) -> Option<&str> {
        self.field(ManagerHeader::Uniqueid)
    }

    /// The `CallerIDNum` field.
    pub fn caller_id_number(&self) -> Option<&str> {
        self.field(ManagerHeader::CallerIdNum)
    }

    /// The `CallerIDName` field.
    pub fn caller_id_name(&self) -> Option<&str> {
        self.field(ManagerHeader::CallerIdName)
    }

    /// The numeric `Cause` field of a hangup, mapped to a [`HangupCause`].
    pub fn hangup_cause(&self) -> Option<HangupCause> {
        let code = self.field(ManagerHeader::Cause)?.parse().ok()?;
        HangupCause::from_code(code)
    }

    /// The free-text `Cause-txt` field of a hangup.
    pub fn hangup_cause_text(&self) -> Option<&str> {
        self.field(ManagerHeader::CauseTxt)
    }

    /// `true` when this event closes a list sequence
    /// (`EventList: Complete`).
    pub fn is_list_complete(&self) -> bool {
        self.field(ManagerHeader::EventList)
            .is_some_and(|v| v.eq_ignore_ascii_case("complete"))
    }

    /// The `ListItems` count declared on a completion event.
    pub fn declared_list_items(&self) -> Option<usize> {
        self.field(ManagerHeader::ListItems)?.parse().ok()
    }
}
