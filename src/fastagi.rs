//! FastAGI server-side plumbing.
//!
//! The scripting protocol shares the manager's `key: value` line syntax but
//! frames with a single LF and runs one session per dialplan invocation:
//! the peer connects, sends an `agi_*` request block terminated by a blank
//! line, then answers one status line per command. The command catalogue is
//! the consumer's concern; this module parses the request, writes commands
//! verbatim and decodes the status replies.

use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::constants::{DEFAULT_WRITE_TIMEOUT_MS, MAX_SOCKET_READ_TIMEOUT_MS, SOCKET_BUF_SIZE};
use crate::error::{AmiError, AmiResult};
use crate::framer::{read_line, LineDelimiter, LineFramer};
use crate::transport::TimedSocket;

/// One parsed `agi_*` request block.
#[derive(Debug, Clone)]
pub struct AgiRequest {
    fields: HashMap<String, String>,
    arguments: Vec<String>,
    parameters: HashMap<String, String>,
}

impl AgiRequest {
    /// Parse the request from its `agi_*` lines.
    fn from_lines(lines: &[String]) -> AmiResult<Self> {
        let mut fields = HashMap::new();
        let mut arguments: Vec<(u32, String)> = Vec::new();

        for line in lines {
            let Some(colon) = line.find(':') else {
                return Err(AmiError::malformed(format!(
                    "request line without separator: {:?}",
                    line
                )));
            };
            let key = line[..colon].trim().to_ascii_lowercase();
            let value = line[colon + 1..].trim().to_string();

            if let Some(index) = key.strip_prefix("agi_arg_") {
                if let Ok(index) = index.parse::<u32>() {
                    arguments.push((index, value));
                    continue;
                }
            }
            fields.insert(key, value);
        }

        if !fields.keys().any(|k| k.starts_with("agi_")) {
            return Err(AmiError::malformed("block carries no agi_ fields"));
        }

        arguments.sort_by_key(|(index, _)| *index);
        let arguments = arguments.into_iter().map(|(_, value)| value).collect();

        let parameters = fields
            .get("agi_request")
            .and_then(|url| url.split_once('?'))
            .map(|(_, query)| parse_query(query))
            .unwrap_or_default();

        Ok(Self {
            fields,
            arguments,
            parameters,
        })
    }

    /// Raw request field by name, without the `agi_` prefix
    /// (`request`, `channel`, …).
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&format!("agi_{}", name.to_ascii_lowercase()))
            .map(|s| s.as_str())
    }

    /// Script name, query string stripped (`hello.agi`).
    pub fn script(&self) -> Option<&str> {
        let script = self.field("network_script")?;
        Some(script.split_once('?').map(|(s, _)| s).unwrap_or(script))
    }

    /// Full request URL (`agi://host/hello.agi?key=value`).
    pub fn request_url(&self) -> Option<&str> {
        self.field("request")
    }

    /// Name of the channel the script runs on.
    pub fn channel(&self) -> Option<&str> {
        self.field("channel")
    }

    /// Unique id of the channel.
    pub fn unique_id(&self) -> Option<&str> {
        self.field("uniqueid")
    }

    /// Channel technology (`SIP`).
    pub fn channel_type(&self) -> Option<&str> {
        self.field("type")
    }

    /// Language configured for the channel.
    pub fn language(&self) -> Option<&str> {
        self.field("language")
    }

    /// Caller ID number, `None` when unset or `unknown`.
    pub fn caller_id_number(&self) -> Option<&str> {
        self.field("callerid").filter(|v| *v != "unknown")
    }

    /// Caller ID name, `None` when unset or `unknown`.
    pub fn caller_id_name(&self) -> Option<&str> {
        self.field("calleridname").filter(|v| *v != "unknown")
    }

    /// Dialed number identifier.
    pub fn dnid(&self) -> Option<&str> {
        self.field("dnid")
    }

    /// Redirecting number.
    pub fn rdnis(&self) -> Option<&str> {
        self.field("rdnis")
    }

    /// Dialplan context the script was called from.
    pub fn context(&self) -> Option<&str> {
        self.field("context")
    }

    /// Dialplan extension.
    pub fn extension(&self) -> Option<&str> {
        self.field("extension")
    }

    /// Dialplan priority.
    pub fn priority(&self) -> Option<&str> {
        self.field("priority")
    }

    /// Positional `agi_arg_N` arguments, in order.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Query-string parameter from the request URL.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Decoded status line of a command reply (`200 result=1 (timeout)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgiReply {
    /// Status code; `200` for success, `510` for an unknown command.
    pub code: u16,
    /// The `result=` value, when present and numeric.
    pub result: Option<i64>,
    /// Parenthesized extra data, when present.
    pub extra: Option<String>,
    /// The raw status line.
    pub raw: String,
}

impl AgiReply {
    fn parse(line: &str) -> AmiResult<Self> {
        let mut parts = line.splitn(2, ' ');
        let code = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| AmiError::malformed(format!("unparseable reply: {:?}", line)))?;
        let rest = parts.next().unwrap_or("");

        let result = rest
            .split_whitespace()
            .find_map(|token| token.strip_prefix("result="))
            .and_then(|value| value.parse().ok());
        let extra = rest
            .find('(')
            .and_then(|open| rest[open..].find(')').map(|close| (open, open + close)))
            .map(|(open, close)| rest[open + 1..close].to_string());

        Ok(Self {
            code,
            result,
            extra,
            raw: line.to_string(),
        })
    }

    /// Whether the command was accepted.
    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// Listener accepting FastAGI invocations from the dialplan.
pub struct AgiServer {
    listener: TcpListener,
}

impl AgiServer {
    /// Bind the listener, e.g. to `0.0.0.0:4573`.
    pub async fn bind(addr: &str) -> AmiResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(AmiError::Io)?;
        info!("FastAGI listening on {}", addr);
        Ok(Self { listener })
    }

    /// Bound local address.
    pub fn local_addr(&self) -> AmiResult<std::net::SocketAddr> {
        self.listener.local_addr().map_err(AmiError::Io)
    }

    /// Accept the next invocation and read its request block.
    pub async fn accept(&self) -> AmiResult<AgiConnection> {
        let (stream, addr) = self.listener.accept().await.map_err(AmiError::Io)?;
        debug!("accepted FastAGI invocation from {}", addr);

        let socket = TimedSocket::from_stream(
            stream,
            Duration::from_millis(MAX_SOCKET_READ_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        );
        let mut connection = AgiConnection {
            socket,
            framer: LineFramer::new(LineDelimiter::Lf),
            read_buffer: vec![0u8; SOCKET_BUF_SIZE],
            request: None,
        };
        connection.read_request().await?;
        Ok(connection)
    }
}

/// One FastAGI invocation: the request block plus the command/reply loop.
pub struct AgiConnection {
    socket: TimedSocket,
    framer: LineFramer,
    read_buffer: Vec<u8>,
    request: Option<AgiRequest>,
}

impl AgiConnection {
    /// The request block sent by the peer at connect.
    pub fn request(&self) -> Option<&AgiRequest> {
        self.request.as_ref()
    }

    async fn read_request(&mut self) -> AmiResult<()> {
        let mut lines = Vec::new();
        loop {
            let line = read_line(&mut self.socket, &mut self.framer, &mut self.read_buffer)
                .await?
                .ok_or(AmiError::ConnectionClosed)?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        self.request = Some(AgiRequest::from_lines(&lines)?);
        Ok(())
    }

    /// Send one scripting command and decode its status reply.
    pub async fn send_command(&mut self, command: &str) -> AmiResult<AgiReply> {
        if command.contains('\n') || command.contains('\r') {
            return Err(AmiError::malformed("command must not contain newlines"));
        }
        self.socket
            .write_all(format!("{}\n", command).as_bytes())
            .await?;

        let line = read_line(&mut self.socket, &mut self.framer, &mut self.read_buffer)
            .await?
            .ok_or(AmiError::ConnectionClosed)?;
        AgiReply::parse(&line)
    }

    /// Close the invocation.
    pub fn close(&mut self) {
        self.socket.close();
    }
}

impl std::fmt::Debug for AgiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgiConnection")
            .field("script", &self.request.as_ref().and_then(|r| r.script()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> AgiRequest {
        let lines: Vec<String> = [
            "agi_network: yes",
            "agi_network_script: hello.agi?firstname=Pickle&lastname=Rick",
            "agi_request: agi://127.0.0.1/hello.agi?firstname=Pickle&lastname=Rick",
            "agi_channel: SIP/1234-d715",
            "agi_language: en",
            "agi_type: SIP",
            "agi_uniqueid: 1239575037.3",
            "agi_callerid: 1234",
            "agi_calleridname: John Doe",
            "agi_dnid: 8002",
            "agi_rdnis: unknown",
            "agi_context: mycontext",
            "agi_extension: 8002",
            "agi_priority: 1",
            "agi_arg_1: foo",
            "agi_arg_2: bar",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        AgiRequest::from_lines(&lines).unwrap()
    }

    #[test]
    fn request_fields() {
        let request = sample_request();
        assert_eq!(request.script(), Some("hello.agi"));
        assert_eq!(
            request.request_url(),
            Some("agi://127.0.0.1/hello.agi?firstname=Pickle&lastname=Rick")
        );
        assert_eq!(request.channel(), Some("SIP/1234-d715"));
        assert_eq!(request.channel_type(), Some("SIP"));
        assert_eq!(request.unique_id(), Some("1239575037.3"));
        assert_eq!(request.context(), Some("mycontext"));
        assert_eq!(request.extension(), Some("8002"));
        assert_eq!(request.priority(), Some("1"));
        assert_eq!(request.dnid(), Some("8002"));
    }

    #[test]
    fn unknown_caller_id_is_none() {
        let request = sample_request();
        assert_eq!(request.caller_id_number(), Some("1234"));
        assert_eq!(request.caller_id_name(), Some("John Doe"));
        // rdnis keeps the raw value; only caller id filters "unknown".
        assert_eq!(request.rdnis(), Some("unknown"));
    }

    #[test]
    fn positional_arguments_in_order() {
        let request = sample_request();
        assert_eq!(request.arguments(), &["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn query_parameters() {
        let request = sample_request();
        assert_eq!(request.parameter("firstname"), Some("Pickle"));
        assert_eq!(request.parameter("lastname"), Some("Rick"));
        assert_eq!(request.parameter("missing"), None);
    }

    #[test]
    fn non_agi_block_rejected() {
        let lines = vec!["host: example".to_string()];
        assert!(AgiRequest::from_lines(&lines).is_err());
    }

    #[test]
    fn reply_parse_success() {
        let reply = AgiReply::parse("200 result=1 (timeout)").unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.result, Some(1));
        assert_eq!(reply.extra.as_deref(), Some("timeout"));
    }

    #[test]
    fn reply_parse_error_code() {
        let reply = AgiReply::parse("510 Invalid or unknown command").unwrap();
        assert!(!reply.is_success());
        assert_eq!(reply.result, None);
    }

    #[test]
    fn reply_parse_negative_result() {
        let reply = AgiReply::parse("200 result=-1").unwrap();
        assert_eq!(reply.result, Some(-1));
        assert_eq!(reply.extra, None);
    }

    #[test]
    fn reply_parse_garbage() {
        assert!(AgiReply::parse("not a reply").is_err());
    }
}
