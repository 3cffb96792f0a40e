//! Typed field names and event types for AMI packets.

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFieldError(pub String);

impl std::fmt::Display for ParseFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown AMI field: {}", self.0)
    }
}

impl std::error::Error for ParseFieldError {}

define_wire_enum! {
    error_type: ParseFieldError,
    /// Field names used by the actions, responses and events this crate
    /// understands.
    ///
    /// Use with [`Packet::get()`](crate::Packet::get) for typed lookups; any
    /// other field is still reachable by its raw name.
    pub enum Field {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Message => "Message",
        Event => "Event",
        Username => "Username",
        Secret => "Secret",
        Channel => "Channel",
        Channel2 => "Channel2",
        Exten => "Exten",
        Context => "Context",
        Priority => "Priority",
        Timeout => "Timeout",
        Async => "Async",
        Variable => "Variable",
        CallerId => "CallerID",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
        ParkingLot => "ParkingLot",
        Uniqueid => "Uniqueid",
        Linkedid => "Linkedid",
        DestChannel => "DestChannel",
        DialStatus => "DialStatus",
        EventMask => "EventMask",
        Command => "Command",
        Output => "Output",
    }
}

/// Error returned when parsing an event name this crate has no variant for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventTypeError(pub String);

impl std::fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}

define_wire_enum! {
    error_type: ParseEventTypeError,
    /// Call-state events forwarded to the CRM.
    ///
    /// Events outside this list are still delivered to wildcard handlers;
    /// they simply have no typed variant.
    pub enum AmiEventType {
        Newchannel => "Newchannel",
        Hangup => "Hangup",
        DialBegin => "DialBegin",
        DialEnd => "DialEnd",
        Hold => "Hold",
        Unhold => "Unhold",
        BridgeEnter => "BridgeEnter",
        BridgeLeave => "BridgeLeave",
        AgentCalled => "AgentCalled",
        AgentConnect => "AgentConnect",
        AgentComplete => "AgentComplete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(Field::ActionId.to_string(), "ActionID");
        assert_eq!(Field::CauseTxt.to_string(), "Cause-txt");
        assert_eq!(AmiEventType::DialBegin.to_string(), "DialBegin");
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!("actionid".parse::<Field>(), Ok(Field::ActionId));
        assert_eq!("HANGUP".parse::<AmiEventType>(), Ok(AmiEventType::Hangup));
        assert_eq!(" Newchannel ".parse::<AmiEventType>(), Ok(AmiEventType::Newchannel));
    }

    #[test]
    fn from_str_unknown() {
        let err = "VarSet"
            .parse::<AmiEventType>()
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown event type: VarSet");
    }

    #[test]
    fn every_event_type_parses_back() {
        assert_eq!(AmiEventType::ALL.len(), 11);
        for v in AmiEventType::ALL {
            let parsed: AmiEventType = v
                .as_str()
                .parse()
                .unwrap();
            assert_eq!(parsed, *v);
        }
    }
}
