//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port.
pub const DEFAULT_MANAGER_PORT: u16 = 5038;

/// Default FastAGI listener port.
pub const DEFAULT_AGI_PORT: u16 = 4573;

/// Socket buffer size for reading from the TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Initial line buffer size. Doubles on demand up to [`LINE_BUFFER_LIMIT`].
pub const INITIAL_LINE_BUFFER: usize = 512;

/// Hard ceiling for a single buffered line (8MB). A peer sending an unbounded
/// line is misbehaving; growing past this raises `OversizedLine`.
pub const LINE_BUFFER_LIMIT: usize = 8 * 1024 * 1024;

/// Manager protocol line terminator (strict two-byte match).
pub const CRLF: &str = "\r\n";

/// FastAGI line terminator.
pub const LF: &str = "\n";

/// Prefix of the greeting banner sent by the server on connect.
pub const BANNER_PREFIX: &str = "Asterisk Call Manager";

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default write timeout in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Default action response timeout in milliseconds (5 seconds).
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5000;

/// Maximum socket read timeout: 70 minutes. Held channels can sit idle for
/// a very long time between events on the same socket as short-deadline
/// control actions.
pub const MAX_SOCKET_READ_TIMEOUT_MS: u64 = 4_200_000;
