//! Protocol constants and configuration defaults

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from the TCP stream (16KB)
pub const SOCKET_BUF_SIZE: usize = 16 * 1024;

/// Maximum length of a single protocol line (64KB).
///
/// AMI lines are short; anything larger means the peer is not speaking AMI
/// or the stream is corrupted.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Line terminator written on the wire
pub const LINE_TERMINATOR: &str = "\r\n";

/// Prefix of every client-generated `ActionID`
pub const ACTION_ID_PREFIX: &str = "ami-";

/// Prefix of the banner line sent by Asterisk on connect
pub const GREETING_PREFIX: &str = "Asterisk Call Manager";

/// `Response` value for a successful action (compared case-insensitively)
pub const RESPONSE_SUCCESS: &str = "Success";

/// Connection timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Read timeout in milliseconds; bounds stop latency of the listener
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Fixed delay between reconnect attempts in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Timeout applied by the HTTP relay to each POST in milliseconds
pub const DEFAULT_RELAY_TIMEOUT_MS: u64 = 3000;

/// Hangup cause sent when none is given (16 = normal clearing)
pub const DEFAULT_HANGUP_CAUSE: u16 = 16;

/// Context used by redirect and parking lot used by park when none is given
pub const DEFAULT_CONTEXT: &str = "default";

/// Dialplan priority used by redirect and originate when none is given
pub const DEFAULT_PRIORITY: u32 = 1;

/// Originate ring timeout in milliseconds when none is given
pub const DEFAULT_ORIGINATE_TIMEOUT_MS: u64 = 30_000;

/// Registry key reserved for handlers that receive every event
pub const WILDCARD: &str = "*";
