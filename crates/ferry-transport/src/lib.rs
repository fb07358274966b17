//! # ferry-transport
//!
//! A minimal reliable transport in the spirit of TCP, written as pure
//! protocol logic. Nothing here opens a socket or spawns a thread: the
//! embedding application hands raw segments to a [`Dispatcher`], drives its
//! retransmit timers, and supplies a [`Network`] that carries outbound
//! segments.
//!
//! ```text
//!   Network ──raw──▶ Dispatcher ──(seq, ack, flags, payload)──▶ Connection
//!      ▲                 │                                         │
//!      └──── flush ◀─────┴──────────────── outbox ◀────────────────┘
//! ```
//!
//! ## Crate structure
//!
//! - [`segment`]: Header codec, flag bits, pseudo-header checksum
//! - [`seq`]: Wrapping sequence-number comparisons
//! - [`rtt`]: Jacobson/Karels RTT estimator
//! - [`congestion`]: Segment-counting congestion window
//! - [`send_buffer`]: Unacknowledged segment records
//! - [`timer`]: Per-connection retransmit timer
//! - [`connection`]: Per-flow state machine
//! - [`dispatcher`]: Demultiplexer and connection registry
//! - [`config`]: TOML-loadable tunables
//! - [`stats`]: Connection and dispatcher counters
//! - [`error`]: Error types

pub mod config;
pub mod congestion;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod rtt;
pub mod segment;
pub mod send_buffer;
pub mod seq;
pub mod stats;
pub mod timer;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionId, ConnectionState, Outbound};
pub use dispatcher::{Dispatcher, Network};
pub use error::{DecodeError, TransportError, TransportResult};
pub use segment::{Flags, Segment, SegmentHeader};
pub use stats::{ConnectionStats, DispatcherStats};
