//! The broker hub: owns the live sessions and the topic store, accepts
//! connections, fans out publishes, and reaps idle sessions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mqtt3_protocol::{ProtocolError, Result, TopicName};

use crate::config::BrokerConfig;
use crate::session::Session;
use crate::topics::TopicStore;

pub struct Broker {
    config: Arc<BrokerConfig>,
    topics: Arc<TopicStore>,
    sessions: Mutex<Vec<Arc<Session>>>,
    next_session_id: AtomicU32,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
}

impl Broker {
    /// Binds the listener and builds the hub; `run` starts serving.
    pub async fn bind(config: BrokerConfig) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Arc::new(Broker {
            topics: Arc::new(TopicStore::new(config.strict_filter_matching)),
            config: Arc::new(config),
            sessions: Mutex::new(Vec::new()),
            next_session_id: AtomicU32::new(0),
            listener: Mutex::new(Some(listener)),
            local_addr,
            shutdown,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Signals the accept loop, and the management endpoint if one is
    /// attached, to shut down.
    pub fn stop(&self) {
        info!("broker stop requested");
        let _ = self.shutdown.send(());
    }

    pub(crate) fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Accepts connections until `stop` is called, one task per session,
    /// with the reaper running alongside.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| ProtocolError::Io("broker is already running".to_string()))?;
        info!(addr = %self.local_addr, "listening");

        let reaper = tokio::spawn(Arc::clone(&self).reaper_loop());

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => Self::accept_connection(&self, stream, addr),
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        reaper.abort();
        info!("broker stopped");
        Ok(())
    }

    fn accept_connection(hub: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let id = hub.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();
        let session = Arc::new(Session::new(
            id,
            addr,
            writer,
            Arc::clone(&hub.config),
            Arc::clone(&hub.topics),
            Arc::downgrade(hub),
        ));
        hub.sessions.lock().push(Arc::clone(&session));
        debug!(session = id, %addr, "session accepted");

        let hub = Arc::clone(hub);
        tokio::spawn(async move {
            let session_id = session.id();
            session.run(reader).await;
            hub.remove(session_id);
        });
    }

    pub(crate) fn remove(&self, id: u32) {
        let mut sessions = self.sessions.lock();
        if let Some(pos) = sessions.iter().position(|s| s.id() == id) {
            sessions.swap_remove(pos);
            debug!(session = id, remaining = sessions.len(), "session removed");
        }
    }

    /// Delivers a publish to every other session with a matching
    /// subscription.
    ///
    /// Iterates a snapshot taken under the list lock. The delivered copy
    /// never carries the retain flag, and its QoS is capped by the first
    /// matching subscription's QoS.
    pub(crate) async fn fan_out(
        &self,
        source_id: u32,
        topic: &TopicName,
        payload: &Bytes,
        qos: u8,
    ) {
        let snapshot: Vec<Arc<Session>> = self.sessions.lock().clone();
        for session in snapshot {
            if session.id() == source_id {
                continue;
            }
            let Some(subscription_qos) = session.matching_subscription_qos(topic) else {
                continue;
            };
            let delivery_qos = qos.min(subscription_qos);
            if let Err(err) = session
                .send_publish(topic.clone(), payload.clone(), delivery_qos, false)
                .await
            {
                debug!(session = session.id(), error = %err, "fan-out delivery failed");
            }
        }
    }

    async fn reaper_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.reap_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.reap().await;
        }
    }

    /// Closes and removes every session whose keep-alive deadline passed.
    async fn reap(&self) {
        let snapshot: Vec<Arc<Session>> = self.sessions.lock().clone();
        for session in snapshot {
            if session.deadline_exceeded() {
                info!(session = session.id(), "keep-alive deadline exceeded, closing");
                session.close().await;
                self.remove(session.id());
            }
        }
    }
}
