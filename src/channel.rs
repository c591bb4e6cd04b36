//! Channel identity and hangup causes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A channel name such as `SIP/100-00000001`.
///
/// Channel names carry a technology prefix (`SIP`, `PJSIP`, `Local`, …), a
/// resource, and usually a per-instance dash suffix appended by the server.
/// Actions are often issued with the bare endpoint (`SIP/100`) while events
/// report the suffixed instance, so identity comparison must tolerate the
/// suffix instead of using raw string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName {
    raw: String,
}

impl ChannelName {
    /// Wrap a raw channel name.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The full name as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The technology prefix (`SIP` in `SIP/100-1`), if present.
    pub fn technology(&self) -> Option<&str> {
        self.raw.split_once('/').map(|(tech, _)| tech)
    }

    /// The name with any per-instance dash suffix stripped
    /// (`SIP/100` for `SIP/100-00000001`).
    pub fn endpoint(&self) -> &str {
        match self.raw.rsplit_once('-') {
            Some((head, suffix))
                if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_hexdigit()) =>
            {
                head
            }
            _ => &self.raw,
        }
    }

    /// Whether the name carries a per-instance suffix.
    fn has_suffix(&self) -> bool {
        self.endpoint().len() != self.raw.len()
    }

    /// Channel identity comparison.
    ///
    /// Two names are the same channel when they match in full
    /// (case-insensitive), or when one is the bare endpoint of the other's
    /// suffixed instance. Two *different* suffixed instances of the same
    /// endpoint are distinct channels.
    pub fn is_same(&self, other: &ChannelName) -> bool {
        if self.raw.eq_ignore_ascii_case(&other.raw) {
            return true;
        }
        if self.has_suffix() == other.has_suffix() {
            return false;
        }
        self.endpoint().eq_ignore_ascii_case(other.endpoint())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for ChannelName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ChannelName {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// Hangup cause codes from `include/asterisk/causes.h`, carried in the
/// numeric `Cause` field of hangup events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
#[allow(missing_docs)]
pub enum HangupCause {
    Unallocated = 1,
    NoRouteTransitNet = 2,
    NoRouteDestination = 3,
    MisdialledTrunkPrefix = 5,
    ChannelUnacceptable = 6,
    CallAwardedDelivered = 7,
    NumberPortedNotHere = 14,
    NormalClearing = 16,
    UserBusy = 17,
    NoUserResponse = 18,
    NoAnswer = 19,
    SubscriberAbsent = 20,
    CallRejected = 21,
    NumberChanged = 22,
    RedirectedToNewDestination = 23,
    AnsweredElsewhere = 26,
    DestinationOutOfOrder = 27,
    InvalidNumberFormat = 28,
    FacilityRejected = 29,
    ResponseToStatusEnquiry = 30,
    NormalUnspecified = 31,
    NormalCircuitCongestion = 34,
    NetworkOutOfOrder = 38,
    NormalTemporaryFailure = 41,
    SwitchCongestion = 42,
    AccessInfoDiscarded = 43,
    RequestedChanUnavail = 44,
    PreEmpted = 45,
    FacilityNotSubscribed = 50,
    OutgoingCallBarred = 52,
    IncomingCallBarred = 54,
    BearerCapabilityNotAuth = 57,
    BearerCapabilityNotAvail = 58,
    BearerCapabilityNotImpl = 65,
    ChanNotImplemented = 66,
    FacilityNotImplemented = 69,
    InvalidCallReference = 81,
    IncompatibleDestination = 88,
    InvalidMsgUnspecified = 95,
    MandatoryIeMissing = 96,
    MessageTypeNonexist = 97,
    WrongMessage = 98,
    IeNonexist = 99,
    InvalidIeContents = 100,
    WrongCallState = 101,
    RecoveryOnTimerExpire = 102,
    MandatoryIeLengthError = 103,
    ProtocolError = 111,
    Interworking = 127,
}

impl HangupCause {
    /// Parse from the numeric `Cause` field value.
    pub fn from_code(code: u8) -> Option<Self> {
        use HangupCause::*;
        Some(match code {
            1 => Unallocated,
            2 => NoRouteTransitNet,
            3 => NoRouteDestination,
            5 => MisdialledTrunkPrefix,
            6 => ChannelUnacceptable,
            7 => CallAwardedDelivered,
            14 => NumberPortedNotHere,
            16 => NormalClearing,
            17 => UserBusy,
            18 => NoUserResponse,
            19 => NoAnswer,
            20 => SubscriberAbsent,
            21 => CallRejected,
            22 => NumberChanged,
            23 => RedirectedToNewDestination,
            26 => AnsweredElsewhere,
            27 => DestinationOutOfOrder,
            28 => InvalidNumberFormat,
            29 => FacilityRejected,
            30 => ResponseToStatusEnquiry,
            31 => NormalUnspecified,
            34 => NormalCircuitCongestion,
            38 => NetworkOutOfOrder,
            41 => NormalTemporaryFailure,
            42 => SwitchCongestion,
            43 => AccessInfoDiscarded,
            44 => RequestedChanUnavail,
            45 => PreEmpted,
            50 => FacilityNotSubscribed,
            52 => OutgoingCallBarred,
            54 => IncomingCallBarred,
            57 => BearerCapabilityNotAuth,
            58 => BearerCapabilityNotAvail,
            65 => BearerCapabilityNotImpl,
            66 => ChanNotImplemented,
            69 => FacilityNotImplemented,
            81 => InvalidCallReference,
            88 => IncompatibleDestination,
            95 => InvalidMsgUnspecified,
            96 => MandatoryIeMissing,
            97 => MessageTypeNonexist,
            98 => WrongMessage,
            99 => IeNonexist,
            100 => InvalidIeContents,
            101 => WrongCallState,
            102 => RecoveryOnTimerExpire,
            103 => MandatoryIeLengthError,
            111 => ProtocolError,
            127 => Interworking,
            _ => return None,
        })
    }

    /// Numeric cause code matching `causes.h`.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for HangupCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
