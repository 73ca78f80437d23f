//! Wire codec and topic matching for the MQTT 3.1 / 3.1.1 protocol.
//!
//! This crate owns everything that touches raw protocol bytes: the fixed
//! header and remaining-length framing, sequential payload accessors, and
//! topic-name/topic-filter matching. It knows nothing about sessions or
//! routing; the broker crate builds those on top.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod encoding;
pub mod error;
pub mod packet;
pub mod payload;
pub mod topic;

pub use error::{ProtocolError, Result};
pub use packet::{read_packet, write_packet, Packet, PacketType};
pub use payload::{PayloadReader, PayloadWriter};
pub use topic::{split, TopicFilter, TopicName};
