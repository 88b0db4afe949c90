//! Test harness for pushing HL7v2 messages at an MLLP listener and checking
//! what comes back.
//!
//! The pieces, from the wire up:
//! - [`transport`] frames messages and performs one blocking exchange per call.
//! - [`hl7`] splits pasted text into messages, reads ACK codes and rewrites
//!   control ids.
//! - [`fake_ack`] answers locally when no listener should be involved.
//! - [`batch`] drives messages and repeats through either of the above,
//!   stopping at the first transport failure.
//! - [`report`] shapes a batch result for display.

pub mod batch;
pub mod config;
pub mod error;
pub mod fake_ack;
pub mod hl7;
pub mod report;
pub mod transport;

pub use batch::{run_batch, AckRecord, BatchOptions, BatchResult, MetricsHistory};
pub use config::Settings;
pub use error::{ConfigError, TransportError};
pub use hl7::{parse_status, rewrite_control_id, split_messages, AckStatus};
pub use transport::{Endpoint, MllpClient, Transport};
