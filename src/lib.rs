//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's manager interface
//! (TCP port 5038) and a self-healing listener that keeps one session open,
//! dispatching every event to registered handlers.
//!
//! # Architecture
//!
//! - [`AmiClient`]: one connection, one action at a time, each answered by
//!   a response matched on `ActionID`
//! - [`AmiListener`]: connect → login → read loop, reconnecting after a
//!   fixed delay on any failure until its [`StopHandle`] fires
//! - [`HandlerRegistry`]: wildcard handlers first, then handlers for the
//!   exact event type, each isolated from the others' failures
//!
//! # Examples
//!
//! ## One-shot actions
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiClient, AmiError, Originate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let mut client = AmiClient::connect("127.0.0.1", 5038).await?;
//!     if !client.login("crm", "s3cret").await? {
//!         return Ok(());
//!     }
//!
//!     let reply = client
//!         .originate(
//!             Originate::new("SIP/8001", "9000", "from-internal")
//!                 .caller_id("CRM <100>")
//!                 .variable("CRM_TICKET", "4711"),
//!         )
//!         .await?;
//!     println!("Originate: {:?}", reply.message());
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Listening for events
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiEventType, AmiListener, HandlerRegistry, ListenerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = HandlerRegistry::new();
//!     registry
//!         .register("*", |event| async move {
//!             println!("{:?}", event.event());
//!             Ok(())
//!         })
//!         .register(AmiEventType::Hangup, |event| async move {
//!             println!("hangup {:?} cause {:?}", event.channel(), event.get("Cause"));
//!             Ok(())
//!         });
//!
//!     let config = ListenerConfig::new("127.0.0.1", "crm", "s3cret");
//!     let listener = AmiListener::new(config, registry);
//!     listener.run().await;
//! }
//! ```

#[macro_use]
mod macros;

pub mod action;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod listener;
pub mod packet;
pub mod protocol;
pub mod relay;

pub(crate) mod buffer;

pub use action::{Action, ActionIdGenerator, Originate};
pub use config::{AmiConfig, Config, RelayConfig};
pub use connection::{AmiClient, ConnectOptions, ConnectionState};
pub use constants::DEFAULT_AMI_PORT;
pub use dispatch::{
    BoxFuture, DispatchReport, EventHandler, EventKey, HandlerRegistry, HandlerResult,
};
pub use error::{AmiError, AmiResult, BoxError};
pub use headers::{AmiEventType, Field, ParseEventTypeError, ParseFieldError};
pub use listener::{AmiListener, ListenerConfig, ListenerState, ListenerStats, StopHandle};
pub use packet::Packet;
pub use protocol::{AmiParser, Frame};
pub use relay::{HttpRelay, Notifier, RelayHandler};
