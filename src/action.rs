//! Outbound manager actions and wire encoding.

use std::fmt::Write as _;

use crate::constants::CRLF;
use crate::error::{AmiError, AmiResult};
use crate::headers::ManagerHeader;

/// Validate that a user-provided string contains no newline characters.
///
/// The manager protocol is line-delimited; embedded newlines would allow
/// injection of arbitrary protocol headers.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::malformed(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// A named outbound request with ordered parameters.
///
/// Parameter names are case-insensitive; insertion order is preserved for
/// wire serialization. An action is immutable once sent — the connection
/// stamps the correlation `ActionID` before writing and never touches it
/// again.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerAction {
    name: String,
    params: Vec<(String, String)>,
}

impl ManagerAction {
    /// Start a new action with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Action name (e.g. `Originate`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builder-style parameter set. Replaces an existing parameter of the
    /// same (case-insensitive) name in place, else appends.
    pub fn param(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Set a parameter, replacing in place or appending.
    pub fn set_param(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        match self
            .params
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    /// Append a parameter without replacing — `Variable` may repeat.
    pub fn push_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Look up a parameter by name (case-insensitive). First match wins.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parameters in insertion order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// The correlation token, if one has been assigned.
    pub fn action_id(&self) -> Option<&str> {
        self.get(ManagerHeader::ActionId)
    }

    /// Validate all fields, then serialize: the `Action` line, one
    /// `Key: Value` line per parameter in insertion order, and the blank
    /// terminator, all CRLF-delimited.
    pub fn to_wire(&self) -> AmiResult<String> {
        validate_no_newlines(&self.name, "action name")?;
        let mut wire = format!("Action: {}{}", self.name, CRLF);
        for (key, value) in &self.params {
            validate_no_newlines(key, "parameter name")?;
            validate_no_newlines(value, "parameter value")?;
            let _ = write!(wire, "{}: {}{}", key, value, CRLF);
        }
        wire.push_str(CRLF);
        Ok(wire)
    }

    // --- Bundled action constructors ------------------------------------

    /// `Login` with username and secret.
    pub fn login(username: &str, secret: &str) -> Self {
        Self::new("Login")
            .param(ManagerHeader::Username, username)
            .param(ManagerHeader::Secret, secret)
    }

    /// `Logoff`. The server answers `Response: Goodbye` and closes.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// `Ping` keepalive.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Events` — set the event mask (`on`, `off`, or a comma list like
    /// `call,system`).
    pub fn events(mask: &str) -> Self {
        Self::new("Events").param("EventMask", mask)
    }

    /// `Hold` a channel.
    pub fn hold(channel: &str) -> Self {
        Self::new("Hold").param(ManagerHeader::Channel, channel)
    }

    /// `Park` a channel. `timeout_ms` bounds how long the call waits in the
    /// parking lot.
    pub fn park(channel: &str, timeout_ms: Option<u64>) -> Self {
        let mut action = Self::new("Park").param(ManagerHeader::Channel, channel);
        if let Some(ms) = timeout_ms {
            action.set_param(ManagerHeader::Timeout, ms.to_string());
        }
        action
    }

    /// `Hangup` a channel, optionally with a cause code.
    pub fn hangup(channel: &str, cause: Option<u8>) -> Self {
        let mut action = Self::new("Hangup").param(ManagerHeader::Channel, channel);
        if let Some(code) = cause {
            action.set_param(ManagerHeader::Cause, code.to_string());
        }
        action
    }

    /// Asynchronous `Originate` into a dialplan extension. The terminal
    /// outcome arrives as an `OriginateResponse` event correlated by
    /// ActionID.
    pub fn originate(channel: &str, context: &str, exten: &str, priority: u32) -> Self {
        Self::new("Originate")
            .param(ManagerHeader::Channel, channel)
            .param(ManagerHeader::Context, context)
            .param(ManagerHeader::Exten, exten)
            .param(ManagerHeader::Priority, priority.to_string())
            .param("Async", "true")
    }

    /// `BridgeList`, optionally filtered by bridge type.
    pub fn bridge_list(bridge_type: Option<&str>) -> Self {
        let mut action = Self::new("BridgeList");
        if let Some(t) = bridge_type {
            action.set_param(ManagerHeader::BridgeType, t);
        }
        action
    }

    /// `ParkedCalls` enumeration.
    pub fn parked_calls() -> Self {
        Self::new("ParkedCalls")
    }

    /// `Command` — run a CLI command, output returned as raw lines.
    pub fn command(command: &str) -> Self {
        Self::new("Command").param("Command", command)
    }

    /// `ProxyCompression` — ask the peer to gzip all subsequent traffic.
    pub fn proxy_compression(compression_type: &str) -> Self {
        Self::new("ProxyCompression").param("Type", compression_type)
    }
}
