//! Manager protocol decoding and message handling.
//!
//! Inbound traffic is a sequence of blocks: `Key: Value` lines terminated by
//! a blank line. The first key of a block decides whether it is a response
//! to a pending action or an unsolicited event. Lines without a colon are
//! command output and are collected verbatim.

use std::collections::HashMap;

use crate::error::{AmiError, AmiResult};
use crate::event::ManagerEvent;
use crate::headers::ManagerHeader;

/// A decoded inbound message block.
#[derive(Debug, Clone)]
pub enum ManagerMessage {
    /// Reply to a pending action, correlated by ActionID.
    Response(ManagerResponse),
    /// Unsolicited or response-correlated event.
    Event(ManagerEvent),
}

/// `Response` header classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseStatus {
    /// `Response: Success`, `Goodbye` (logoff) or `Follows` (command output).
    Success,
    /// `Response: Error`.
    Error,
    /// Any other value.
    Other,
}

/// Response to a manager action.
#[derive(Debug, Clone)]
pub struct ManagerResponse {
    status: ResponseStatus,
    fields: HashMap<String, String>,
    output: Vec<String>,
}

impl ManagerResponse {
    /// `status` is derived from the `Response` field.
    pub(crate) fn new(fields: HashMap<String, String>, output: Vec<String>) -> Self {
        let status = match fields.get("response").map(|s| s.as_str()) {
            Some(v) if v.eq_ignore_ascii_case("success") => ResponseStatus::Success,
            Some(v) if v.eq_ignore_ascii_case("goodbye") => ResponseStatus::Success,
            Some(v) if v.eq_ignore_ascii_case("follows") => ResponseStatus::Success,
            Some(v) if v.eq_ignore_ascii_case("error") => ResponseStatus::Error,
            _ => ResponseStatus::Other,
        };
        Self {
            status,
            fields,
            output,
        }
    }

    /// `true` for `Success`, `Goodbye` and `Follows` responses.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Classification of the `Response` field.
    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    /// Look up a field by name (case-insensitive).
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(&name.as_ref().to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// All fields, keyed by lowercased name.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// Raw output lines (`Command` action results and the like).
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// The `Message` field, if present.
    pub fn message(&self) -> Option<&str> {
        self.field(ManagerHeader::Message)
    }

    /// The correlation token echoed from the action.
    pub fn action_id(&self) -> Option<&str> {
        self.field(ManagerHeader::ActionId)
    }

    /// `true` when this response opens a multi-event list
    /// (`EventList: start`).
    pub fn is_list_start(&self) -> bool {
        self.field(ManagerHeader::EventList)
            .is_some_and(|v| v.eq_ignore_ascii_case("start"))
    }

    /// Convert to a result based on the response status.
    pub fn into_result(self) -> AmiResult<Self> {
        match self.status {
            ResponseStatus::Success => Ok(self),
            _ => {
                let message = self.message().unwrap_or("Response: Error").to_string();
                Err(AmiError::ActionFailed { message })
            }
        }
    }
}

/// An assembled begin/item*/complete list sequence.
///
/// A declared-count mismatch is recoverable: the accumulated items are still
/// delivered, with the inconsistency reported via
/// [`count_mismatch`](EventList::count_mismatch).
#[derive(Debug, Clone)]
pub struct EventList {
    /// The response that opened the list (`EventList: start`).
    pub response: ManagerResponse,
    /// Item events in arrival order.
    pub items: Vec<ManagerEvent>,
    /// Item count declared on the completion event, when parseable.
    pub declared: Option<usize>,
}

impl EventList {
    /// The protocol inconsistency, if the declared count does not match the
    /// number of items received.
    pub fn count_mismatch(&self) -> Option<AmiError> {
        match self.declared {
            Some(declared) if declared != self.items.len() => Some(AmiError::ListCountMismatch {
                declared,
                received: self.items.len(),
            }),
            _ => None,
        }
    }
}

/// Expected terminal shape of an action's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// One response block.
    Single,
    /// A response opening a begin/item*/complete event sequence.
    List,
}

/// Registry mapping action names to their expected response shape.
///
/// The core consults this when executing an action; consumers extend it for
/// their own list-style actions.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    shapes: HashMap<String, ResponseShape>,
}

impl ActionRegistry {
    /// An empty registry: every action defaults to [`ResponseShape::Single`].
    pub fn new() -> Self {
        Self {
            shapes: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the list-style actions this crate bundles.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["BridgeList", "ParkedCalls", "Status", "CoreShowChannels"] {
            registry.register(name, ResponseShape::List);
        }
        registry
    }

    /// Declare the response shape for an action name (case-insensitive).
    pub fn register(&mut self, action: &str, shape: ResponseShape) {
        self.shapes.insert(action.to_ascii_lowercase(), shape);
    }

    /// Expected shape for an action, defaulting to `Single`.
    pub fn shape_for(&self, action: &str) -> ResponseShape {
        self.shapes
            .get(&action.to_ascii_lowercase())
            .copied()
            .unwrap_or(ResponseShape::Single)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Incremental decoder assembling lines into message blocks.
///
/// Lives with the reader task; one instance per connection so a block split
/// across socket reads is resumed, never re-parsed.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    pairs: Vec<(String, String)>,
    output: Vec<String>,
    in_block: bool,
}

impl MessageDecoder {
    /// Create a decoder waiting for the first block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns a complete message when the line is the blank
    /// terminator of a non-empty block.
    ///
    /// A block that opens with neither `Response` nor `Event` is a
    /// [`AmiError::MalformedMessage`]; the decoder resets itself so the
    /// session survives one bad block.
    pub fn feed_line(&mut self, line: &str) -> AmiResult<Option<ManagerMessage>> {
        if line.is_empty() {
            if !self.in_block {
                // Stray blank line between messages.
                return Ok(None);
            }
            return self.finish().map(Some);
        }

        self.in_block = true;
        match split_pair(line) {
            Some((key, value)) => self.pairs.push((key, value)),
            // Raw command output and banner-style lines carry no colon.
            None => self.output.push(line.to_string()),
        }
        Ok(None)
    }

    /// Whether a partially-assembled block is pending.
    pub fn mid_block(&self) -> bool {
        self.in_block
    }

    fn finish(&mut self) -> AmiResult<ManagerMessage> {
        let pairs = std::mem::take(&mut self.pairs);
        let output = std::mem::take(&mut self.output);
        self.in_block = false;

        let Some((first_key, first_value)) = pairs.first().cloned() else {
            return Err(AmiError::malformed("block contains no key-value lines"));
        };

        // Last value wins on duplicate keys.
        let mut fields = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            fields.insert(key, value);
        }

        if first_key == "response" {
            Ok(ManagerMessage::Response(ManagerResponse::new(
                fields, output,
            )))
        } else if first_key == "event" {
            Ok(ManagerMessage::Event(ManagerEvent::from_fields(
                first_value,
                fields,
            )))
        } else {
            Err(AmiError::malformed(format!(
                "block opens with '{}', expected Response or Event",
                first_key
            )))
        }
    }
}

/// Split a `Key: Value` line, lowercasing the key. Returns `None` for lines
/// without a colon.
fn split_pair(line: &str) -> Option<(String, String)> {
    let colon = line.find(':')?;
    let key = line[..colon].trim().to_ascii_lowercase();
    let value = line[colon + 1..].trim().to_string();
    Some((key, value))
}
