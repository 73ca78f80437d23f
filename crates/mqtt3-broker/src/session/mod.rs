//! Per-connection session handling.
//!
//! A session is born when a connection is accepted, becomes connected after
//! a successful CONNECT handshake, and closes on clean disconnect, read
//! error, protocol violation, or when the hub's reaper finds its keep-alive
//! deadline spent.

mod connect;
mod lifecycle;
mod publish;
mod subscribe;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::debug;

use mqtt3_protocol::{
    read_packet, write_packet, Packet, PacketType, ProtocolError, Result, TopicFilter, TopicName,
};

use crate::config::BrokerConfig;
use crate::outstanding::{OutstandingPubRec, OutstandingPubRel, OutstandingPublish};
use crate::server::Broker;
use crate::topics::TopicStore;

/// A topic filter the client has announced interest in.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: TopicFilter,
    pub qos: u8,
}

/// The message published on the client's behalf if the session ends
/// without a clean disconnect.
#[derive(Debug, Clone)]
pub(crate) struct Will {
    pub retain: bool,
    pub qos: u8,
    pub topic: TopicName,
    pub payload: Bytes,
}

/// Everything a session mutates after the handshake, under one lock.
///
/// The lock is held only to mutate; connection writes always happen after
/// it is released.
pub(crate) struct SessionState {
    pub connected: bool,
    pub keep_alive: Duration,
    next_packet_id: u16,
    pub subscriptions: HashMap<TopicFilter, Subscription>,
    pub will: Option<Will>,
    pub last_message_received: Instant,
    pub unacked_publishes: HashMap<u16, OutstandingPublish>,
    pub unacked_pubrels: HashMap<u16, OutstandingPubRel>,
    pub unacked_pubrecs: HashMap<u16, OutstandingPubRec>,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            connected: false,
            keep_alive: Duration::ZERO,
            next_packet_id: 1,
            subscriptions: HashMap::new(),
            will: None,
            last_message_received: Instant::now(),
            unacked_publishes: HashMap::new(),
            unacked_pubrels: HashMap::new(),
            unacked_pubrecs: HashMap::new(),
        }
    }

    /// Monotonic per-session packet id; wraps with the u16.
    pub(crate) fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        id
    }
}

/// One accepted connection.
///
/// The read loop owns the read half; the write half sits behind an async
/// mutex so the retry tick and fan-out deliveries from other sessions
/// interleave whole packets on the wire.
pub struct Session {
    id: u32,
    addr: SocketAddr,
    created_at: Instant,
    config: Arc<BrokerConfig>,
    topics: Arc<TopicStore>,
    hub: Weak<Broker>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pub(crate) state: Mutex<SessionState>,
    closed: AtomicBool,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(
        id: u32,
        addr: SocketAddr,
        writer: OwnedWriteHalf,
        config: Arc<BrokerConfig>,
        topics: Arc<TopicStore>,
        hub: Weak<Broker>,
    ) -> Self {
        Session {
            id,
            addr,
            created_at: Instant::now(),
            config,
            topics,
            hub,
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(SessionState::new()),
            closed: AtomicBool::new(false),
            retry_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the keep-alive idleness budget has been spent.
    ///
    /// The deadline is `last_message_received + keep_alive`. Sessions that
    /// have not completed the handshake are excluded; the first-read
    /// timeout bounds those instead.
    pub(crate) fn deadline_exceeded(&self) -> bool {
        let state = self.state.lock();
        state.connected && state.last_message_received + state.keep_alive < Instant::now()
    }

    /// The QoS of the first subscription matching `topic`, if any.
    pub(crate) fn matching_subscription_qos(&self, topic: &TopicName) -> Option<u8> {
        let state = self.state.lock();
        state
            .subscriptions
            .values()
            .find(|sub| self.filter_matches(&sub.filter, topic))
            .map(|sub| sub.qos)
    }

    fn filter_matches(&self, filter: &TopicFilter, name: &TopicName) -> bool {
        if self.config.strict_filter_matching {
            filter.matches_strict(name)
        } else {
            filter.matches(name)
        }
    }

    async fn write(&self, packet: Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_packet(&mut *writer, &packet).await
    }

    /// Drives the session to completion: handshake, then the dispatch
    /// loop. Always leaves the session closed.
    pub(crate) async fn run(self: Arc<Self>, mut reader: OwnedReadHalf) {
        match read_packet(&mut reader, self.config.read_timeout).await {
            Ok(packet) if packet.packet_type == PacketType::Connect => {
                self.state.lock().last_message_received = Instant::now();
                if let Err(err) = self.handle_connect(&packet).await {
                    debug!(session = self.id, error = %err, "handshake failed");
                    self.close().await;
                    return;
                }
            }
            Ok(packet) => {
                debug!(
                    session = self.id,
                    packet_type = ?packet.packet_type,
                    "first packet is not CONNECT"
                );
                self.close().await;
                return;
            }
            Err(err) => {
                debug!(session = self.id, error = %err, "no CONNECT received");
                self.close().await;
                return;
            }
        }

        let retry_session = Arc::clone(&self);
        *self.retry_task.lock() = Some(tokio::spawn(retry_session.retry_loop()));

        loop {
            // The reaper may have closed this session from its own task.
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            match read_packet(&mut reader, self.config.read_timeout).await {
                Ok(packet) => {
                    self.state.lock().last_message_received = Instant::now();
                    match self.dispatch(packet).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => {
                            debug!(session = self.id, error = %err, "terminating session");
                            break;
                        }
                    }
                }
                Err(ProtocolError::Timeout) => continue,
                Err(ProtocolError::Eof) => {
                    debug!(session = self.id, "connection closed by peer");
                    break;
                }
                Err(err) => {
                    debug!(session = self.id, error = %err, "read failed, terminating session");
                    break;
                }
            }
        }

        self.close().await;
    }

    /// Returns `Ok(false)` when the loop should stop (disconnect).
    async fn dispatch(&self, packet: Packet) -> Result<bool> {
        match packet.packet_type {
            PacketType::Publish => self.handle_publish(&packet).await?,
            PacketType::PubAck => self.handle_puback(&packet)?,
            PacketType::PubRec => self.handle_pubrec(&packet).await?,
            PacketType::PubRel => self.handle_pubrel(&packet).await?,
            PacketType::PubComp => self.handle_pubcomp(&packet)?,
            PacketType::PingReq => self.handle_pingreq().await?,
            PacketType::Subscribe => self.handle_subscribe(&packet).await?,
            PacketType::Unsubscribe => self.handle_unsubscribe(&packet).await?,
            PacketType::Disconnect => return self.handle_disconnect(&packet).map(|()| false),
            other => {
                debug!(session = self.id, packet_type = ?other, "ignoring unexpected packet");
            }
        }
        Ok(true)
    }
}
