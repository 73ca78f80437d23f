//! Broker configuration.

use std::time::Duration;

/// Runtime knobs for the broker.
///
/// The timing fields default to the protocol-facing constants this broker
/// has always used; tests shrink them to keep wall-clock time down.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// MQTT listen address. A bare `:port` binds all interfaces.
    pub bind_addr: String,
    /// HTTP management endpoint address; `None` disables it.
    pub management_addr: Option<String>,
    /// When set, a topic filter only matches names of equal segment count
    /// (unless it ends in `#`). Off by default: a filter whose segments are
    /// all consumed accepts a longer name, e.g. `a/b` matches `a/b/c`.
    pub strict_filter_matching: bool,
    /// Per-read deadline on client connections.
    pub read_timeout: Duration,
    /// How often each session scans its in-flight tables for overdue
    /// retransmissions.
    pub retry_tick: Duration,
    /// Delay before the first retransmission of an unacknowledged message.
    pub retry_initial_delay: Duration,
    /// Upper bound on the retransmission back-off.
    pub retry_max_delay: Duration,
    /// How often the hub scans for sessions past their keep-alive deadline.
    pub reap_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind_addr: ":1883".to_string(),
            management_addr: Some("localhost:8883".to_string()),
            strict_filter_matching: false,
            read_timeout: Duration::from_secs(30),
            retry_tick: Duration::from_secs(1),
            retry_initial_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(60),
            reap_interval: Duration::from_secs(15),
        }
    }
}

impl BrokerConfig {
    /// The address handed to the listener; normalizes the bare `:port`
    /// form to an all-interfaces bind.
    pub fn listen_addr(&self) -> String {
        if self.bind_addr.starts_with(':') {
            format!("0.0.0.0{}", self.bind_addr)
        } else {
            self.bind_addr.clone()
        }
    }
}
