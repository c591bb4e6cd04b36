//! Typed header names used in manager actions, responses and events.

/// Error returned when parsing an unrecognized header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHeaderError(pub String);

impl std::fmt::Display for ParseHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown header: {}", self.0)
    }
}

impl std::error::Error for ParseHeaderError {}

define_wire_enum! {
    error_type: ParseHeaderError,
    /// Well-known header names on the manager wire.
    ///
    /// Header names are case-insensitive on the wire; these are the canonical
    /// spellings Asterisk sends. Use with [`ManagerEvent::field()`] and
    /// [`ManagerResponse::field()`] for type-safe lookups.
    ///
    /// [`ManagerEvent::field()`]: crate::ManagerEvent::field
    /// [`ManagerResponse::field()`]: crate::ManagerResponse::field
    pub enum ManagerHeader {
        Action => "Action",
        ActionId => "ActionID",
        Event => "Event",
        Response => "Response",
        Message => "Message",
        Username => "Username",
        Secret => "Secret",
        Events => "Events",
        EventList => "EventList",
        ListItems => "ListItems",
        Privilege => "Privilege",
        Channel => "Channel",
        Uniqueid => "Uniqueid",
        CallerIdNum => "CallerIDNum",
        CallerIdName => "CallerIDName",
        ConnectedLineNum => "ConnectedLineNum",
        ConnectedLineName => "ConnectedLineName",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
        Context => "Context",
        Exten => "Exten",
        Priority => "Priority",
        Application => "Application",
        Data => "Data",
        Timeout => "Timeout",
        Variable => "Variable",
        Reason => "Reason",
        ParkingSpace => "ParkingSpace",
        ParkingLot => "ParkingLot",
        ParkeeChannel => "ParkeeChannel",
        BridgeUniqueid => "BridgeUniqueid",
        BridgeType => "BridgeType",
        BridgeTechnology => "BridgeTechnology",
        BridgeCreator => "BridgeCreator",
        BridgeName => "BridgeName",
        BridgeNumChannels => "BridgeNumChannels",
    }
}
