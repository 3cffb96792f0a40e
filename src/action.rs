//! Action encoding and the well-known action builders

use crate::{
    constants::{
        ACTION_ID_PREFIX, DEFAULT_CONTEXT, DEFAULT_HANGUP_CAUSE, DEFAULT_ORIGINATE_TIMEOUT_MS,
        DEFAULT_PRIORITY, LINE_TERMINATOR,
    },
    error::{AmiError, AmiResult},
    headers::Field,
};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Reject values that would let a caller inject extra protocol lines.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::InvalidAction {
            message: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

/// Produces `ActionID`s of the form `ami-<sequence>-<unix seconds>`.
///
/// One generator lives per connection; the sequence alone keeps ids unique
/// for the connection's lifetime, the timestamp keeps them distinct across
/// reconnects.
#[derive(Debug, Default)]
pub struct ActionIdGenerator {
    sequence: u64,
}

impl ActionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; the sequence starts at 1.
    pub fn next_id(&mut self) -> String {
        self.sequence += 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        format!("{}{}-{}", ACTION_ID_PREFIX, self.sequence, now)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.sequence
    }
}

/// An ordered set of fields sent to the server.
///
/// The first field is always `Action`. Fields are written in insertion
/// order; `ActionID` is appended by the client at send time.
///
/// ```
/// use asterisk_ami_tokio::Action;
///
/// let action = Action::new("Ping").field("X-Trace", "1").unwrap();
/// let wire = action.to_wire_format("ami-1-1700000000").unwrap();
/// assert_eq!(wire, "Action: Ping\r\nX-Trace: 1\r\nActionID: ami-1-1700000000\r\n\r\n");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Action {
    fields: Vec<(String, String)>,
}

impl Action {
    /// Start an action with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            fields: vec![(Field::Action.to_string(), name.into())],
        }
    }

    /// Append a field.
    ///
    /// Returns an error if the name or value contains newline characters.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> AmiResult<Self> {
        let name = name.into();
        let value = value.into();
        validate_no_newlines(&name, "field name")?;
        validate_no_newlines(&value, "field value")?;
        if name.contains(':') {
            return Err(AmiError::InvalidAction {
                message: format!("field name {:?} must not contain ':'", name),
            });
        }
        self.fields
            .push((name, value));
        Ok(self)
    }

    /// Append a field only when `value` is `Some`.
    pub fn optional_field(
        self,
        name: impl Into<String>,
        value: Option<impl Into<String>>,
    ) -> AmiResult<Self> {
        match value {
            Some(v) => self.field(name, v),
            None => Ok(self),
        }
    }

    /// Value of the `Action` field.
    pub fn name(&self) -> &str {
        &self.fields[0].1
    }

    /// Look up a field by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name.as_ref())
            .map(|(_, v)| v.as_str())
    }

    /// Fields in send order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Serialize with the given `ActionID`, terminated by a blank line.
    pub fn to_wire_format(&self, action_id: &str) -> AmiResult<String> {
        use std::fmt::Write;

        validate_no_newlines(action_id, "ActionID")?;
        let mut out = String::new();
        for (k, v) in &self.fields {
            let _ = write!(out, "{}: {}{}", k, v, LINE_TERMINATOR);
        }
        let _ = write!(
            out,
            "{}: {}{}",
            Field::ActionId,
            action_id,
            LINE_TERMINATOR
        );
        out.push_str(LINE_TERMINATOR);
        Ok(out)
    }

    /// `Login` with username and secret.
    pub fn login(username: &str, secret: &str) -> AmiResult<Self> {
        Self::new("Login")
            .field(Field::Username, username)?
            .field(Field::Secret, secret)
    }

    /// `Logoff`.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// `Ping` keepalive.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Hangup`; the cause defaults to 16 (normal clearing).
    pub fn hangup(channel: &str, cause: Option<u16>) -> AmiResult<Self> {
        Self::new("Hangup")
            .field(Field::Channel, channel)?
            .field(Field::Cause, cause.unwrap_or(DEFAULT_HANGUP_CAUSE).to_string())
    }

    /// `Redirect` (blind transfer); context defaults to `default`, priority to 1.
    pub fn redirect(
        channel: &str,
        exten: &str,
        context: Option<&str>,
        priority: Option<u32>,
    ) -> AmiResult<Self> {
        Self::new("Redirect")
            .field(Field::Channel, channel)?
            .field(Field::Exten, exten)?
            .field(Field::Context, context.unwrap_or(DEFAULT_CONTEXT))?
            .field(
                Field::Priority,
                priority
                    .unwrap_or(DEFAULT_PRIORITY)
                    .to_string(),
            )
    }

    /// `Park` `channel`, announcing to `announce_channel`; the lot defaults to `default`.
    pub fn park(
        channel: &str,
        announce_channel: &str,
        parking_lot: Option<&str>,
    ) -> AmiResult<Self> {
        Self::new("Park")
            .field(Field::Channel, channel)?
            .field(Field::Channel2, announce_channel)?
            .field(Field::ParkingLot, parking_lot.unwrap_or(DEFAULT_CONTEXT))
    }

    /// `Status`, for one channel or all of them.
    pub fn status(channel: Option<&str>) -> AmiResult<Self> {
        Self::new("Status").optional_field(Field::Channel, channel)
    }

    /// `CoreShowChannels`.
    pub fn core_show_channels() -> Self {
        Self::new("CoreShowChannels")
    }

    /// `Events` with the given event mask (`on`, `off`, `call,agent`, ...).
    pub fn events(mask: &str) -> AmiResult<Self> {
        Self::new("Events").field(Field::EventMask, mask)
    }

    /// `Command` running an Asterisk CLI command.
    pub fn command(command: &str) -> AmiResult<Self> {
        Self::new("Command").field(Field::Command, command)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for (k, v) in &self.fields {
            if k.eq_ignore_ascii_case(Field::Secret.as_str()) {
                list.entry(k, &"[REDACTED]");
            } else {
                list.entry(k, v);
            }
        }
        list.finish()
    }
}

/// Parameters of an `Originate` action.
///
/// `Async` is always sent as `true` so the response arrives as soon as the
/// call is queued; the outcome shows up later as events.
///
/// ```
/// use asterisk_ami_tokio::Originate;
///
/// let action = Originate::new("SIP/8001", "5551234", "from-crm")
///     .variable("CRM_CALL_ID", "42")
///     .into_action()
///     .unwrap();
/// assert_eq!(action.get("Variable"), Some("CRM_CALL_ID=42"));
/// assert_eq!(action.get("Timeout"), Some("30000"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Originate {
    pub channel: String,
    pub exten: String,
    pub context: String,
    pub priority: u32,
    /// Ring timeout in milliseconds.
    pub timeout_ms: u64,
    pub caller_id: Option<String>,
    /// Channel variables, sent as `Variable: K=V,K=V`.
    pub variables: Vec<(String, String)>,
}

impl Originate {
    pub fn new(
        channel: impl Into<String>,
        exten: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            exten: exten.into(),
            context: context.into(),
            priority: DEFAULT_PRIORITY,
            timeout_ms: DEFAULT_ORIGINATE_TIMEOUT_MS,
            caller_id: None,
            variables: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Add a channel variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .push((name.into(), value.into()));
        self
    }

    /// Build the `Originate` action.
    pub fn into_action(self) -> AmiResult<Action> {
        let variables = if self
            .variables
            .is_empty()
        {
            None
        } else {
            Some(
                self.variables
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };

        Action::new("Originate")
            .field(Field::Channel, self.channel)?
            .field(Field::Exten, self.exten)?
            .field(Field::Context, self.context)?
            .field(Field::Priority, self.priority.to_string())?
            .field(Field::Timeout, self.timeout_ms.to_string())?
            .field(Field::Async, "true")?
            .optional_field(Field::CallerId, self.caller_id)?
            .optional_field(Field::Variable, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_action_ids_unique_and_shaped() {
        let mut ids = ActionIdGenerator::new();
        let issued: Vec<String> = (0..100)
            .map(|_| ids.next_id())
            .collect();
        let distinct: HashSet<_> = issued
            .iter()
            .collect();
        assert_eq!(distinct.len(), 100);
        assert_eq!(ids.issued(), 100);

        let first = &issued[0];
        assert!(first.starts_with("ami-1-"), "{first}");
        let ts = first.rsplit('-').next().unwrap();
        assert!(ts.parse::<u64>().unwrap() > 1_600_000_000);
    }

    #[test]
    fn test_wire_format_order() {
        let wire = Action::hangup("SIP/8001-1", None)
            .unwrap()
            .to_wire_format("ami-7-1700000000")
            .unwrap();
        assert_eq!(
            wire,
            "Action: Hangup\r\nChannel: SIP/8001-1\r\nCause: 16\r\nActionID: ami-7-1700000000\r\n\r\n"
        );
    }

    #[test]
    fn test_newline_injection_rejected() {
        assert!(Action::new("Ping")
            .field("X", "a\r\nAction: Logoff")
            .is_err());
        assert!(Action::new("Ping")
            .field("Bad\nName", "v")
            .is_err());
        assert!(Action::new("Ping")
            .field("Bad: Name", "v")
            .is_err());
    }

    #[test]
    fn test_hangup_explicit_cause() {
        let a = Action::hangup("SIP/1", Some(17)).unwrap();
        assert_eq!(a.get("Cause"), Some("17"));
    }

    #[test]
    fn test_redirect_defaults() {
        let a = Action::redirect("SIP/1", "200", None, None).unwrap();
        assert_eq!(a.name(), "Redirect");
        assert_eq!(a.get("Context"), Some("default"));
        assert_eq!(a.get("Priority"), Some("1"));

        let a = Action::redirect("SIP/1", "200", Some("agents"), Some(3)).unwrap();
        assert_eq!(a.get("Context"), Some("agents"));
        assert_eq!(a.get("Priority"), Some("3"));
    }

    #[test]
    fn test_park_default_lot() {
        let a = Action::park("SIP/1", "SIP/2", None).unwrap();
        assert_eq!(a.get("Channel2"), Some("SIP/2"));
        assert_eq!(a.get("ParkingLot"), Some("default"));
    }

    #[test]
    fn test_status_optional_channel() {
        assert_eq!(Action::status(None).unwrap().fields().len(), 1);
        assert_eq!(
            Action::status(Some("SIP/1"))
                .unwrap()
                .get("Channel"),
            Some("SIP/1")
        );
    }

    #[test]
    fn test_originate_fields() {
        let a = Originate::new("SIP/8001", "100", "internal")
            .priority(2)
            .timeout_ms(15000)
            .caller_id("CRM <100>")
            .variable("A", "1")
            .variable("B", "2")
            .into_action()
            .unwrap();
        let names: Vec<&str> = a
            .fields()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "Action", "Channel", "Exten", "Context", "Priority", "Timeout", "Async",
                "CallerID", "Variable"
            ]
        );
        assert_eq!(a.get("Variable"), Some("A=1,B=2"));
        assert_eq!(a.get("Async"), Some("true"));
        assert_eq!(a.get("Timeout"), Some("15000"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let a = Action::login("admin", "hunter2").unwrap();
        let dbg = format!("{:?}", a);
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("[REDACTED]"));
        assert!(dbg.contains("admin"));
    }
}
