//! Asterisk Manager Interface (AMI) and FastAGI client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface,
//! allowing applications to connect to a PBX, issue actions, react to
//! asynchronous events, and drive multi-step call flows — plus the
//! server-side plumbing for the companion FastAGI scripting protocol.
//!
//! # Architecture
//!
//! The library uses a split reader/writer design:
//! - [`ManagerClient`] (Clone + Send) — send actions from any task;
//!   responses are correlated back by `ActionID`
//! - [`ManagerEventStream`] — passively observe events from the background
//!   reader task
//! - [`EventDispatcher`] — prioritized listeners driven by the reader task;
//!   activities register here for the duration of one operation
//!
//! # Examples
//!
//! ## Connecting and issuing actions
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AmiError, ManagerAction, ManagerClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let (client, mut events) = ManagerClient::connect(
//!         "localhost", 5038, "admin", "secret",
//!     ).await?;
//!
//!     client.ping().await?;
//!     let response = client
//!         .send_action(ManagerAction::hold("SIP/100-1"))
//!         .await?;
//!     println!("held: {}", response.is_success());
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Call-control activities
//!
//! Activities register as event listeners for the duration of one
//! operation, bound their wait by a caller-supplied deadline, and always
//! remove their registration on exit:
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AmiError, DialActivity, ManagerClient};
//! use std::time::Duration;
//!
//! # async fn example(client: &ManagerClient) -> Result<(), AmiError> {
//! let dial = DialActivity::new("SIP/100", "SIP/200", "internal", "dial", 1)
//!     .caller_id("Reception <100>");
//! let result = dial.run(client, Duration::from_secs(60)).await?;
//! println!("bridged {} legs", result.legs.len());
//! # Ok(())
//! # }
//! ```
//!
//! If the second leg fails to originate, the first is hung up before the
//! failure is reported — partial success is never left in place.
//!
//! ## List sequences
//!
//! List-style actions return a begin/item*/complete sequence validated
//! against the declared item count:
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AmiError, ManagerAction, ManagerClient};
//!
//! # async fn example(client: &ManagerClient) -> Result<(), AmiError> {
//! let bridges = client
//!     .send_list_action(ManagerAction::bridge_list(None))
//!     .await?;
//! for bridge in &bridges.items {
//!     println!("{:?}", bridge.field("BridgeUniqueid"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## FastAGI
//!
//! ```rust,no_run
//! use asterisk_manager_tokio::{AgiServer, AmiError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let server = AgiServer::bind("0.0.0.0:4573").await?;
//!     loop {
//!         let mut agi = server.accept().await?;
//!         if let Some(request) = agi.request() {
//!             println!("script: {:?}", request.script());
//!         }
//!         agi.send_command("ANSWER").await?;
//!     }
//! }
//! ```

#[macro_use]
mod macros;

pub mod action;
pub mod activity;
pub mod channel;
pub mod connection;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod fastagi;
pub mod headers;
pub mod protocol;
pub mod version;

pub(crate) mod framer;
pub(crate) mod transport;

pub use action::ManagerAction;
pub use activity::{
    wait_for_hangup, ActivityState, BridgeListActivity, CallLeg, DialActivity, DialResult,
    HoldActivity, ParkActivity,
};
pub use channel::{ChannelName, HangupCause};
pub use connection::{
    ActionOutcome, ConnectionStatus, DisconnectReason, ManagerClient, ManagerConnectOptions,
    ManagerEventStream,
};
pub use constants::{DEFAULT_AGI_PORT, DEFAULT_MANAGER_PORT};
pub use dispatcher::{
    EventDispatcher, EventListener, Interest, ListenerGuard, ListenerHandle, ListenerPriority,
};
pub use error::{AmiError, AmiResult};
pub use event::{EventName, ManagerEvent, DISCONNECT_EVENT};
pub use fastagi::{AgiConnection, AgiReply, AgiRequest, AgiServer};
pub use framer::{LineDelimiter, LineFramer};
pub use headers::ManagerHeader;
pub use protocol::{
    ActionRegistry, EventList, ManagerMessage, ManagerResponse, MessageDecoder, ResponseShape,
    ResponseStatus,
};
pub use version::ProtocolBanner;
