//! A lightweight MQTT 3.1 / 3.1.1 broker.
//!
//! The hub ([`Broker`]) owns the set of live sessions and the topic store;
//! each accepted connection runs a [`session::Session`] on its own task.
//! Delivery guarantees (QoS 0/1/2), retained messages, wills and keep-alive
//! reaping follow the 3.1.1 protocol as far as this broker implements it.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod management;
pub mod outstanding;
pub mod server;
pub mod session;
pub mod topics;

pub use config::BrokerConfig;
pub use management::ManagementServer;
pub use server::Broker;
