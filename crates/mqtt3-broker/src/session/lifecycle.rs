//! Session lifecycle: ping, disconnect, the retry tick, and close.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use mqtt3_protocol::{Packet, PacketType, Result};

use super::Session;

impl Session {
    pub(super) async fn handle_pingreq(&self) -> Result<()> {
        debug!(session = self.id, "PINGREQ");
        self.write(Packet::new(PacketType::PingResp, 0)).await
    }

    /// Non-zero flags are a protocol violation worth logging, but the will
    /// is disarmed and the session closed in any case, so no will fires on
    /// a DISCONNECT.
    pub(super) fn handle_disconnect(&self, packet: &Packet) -> Result<()> {
        if packet.flags != 0 {
            warn!(
                session = self.id,
                flags = packet.flags,
                "DISCONNECT with non-zero flags, closing"
            );
        }
        debug!(session = self.id, "disconnect");
        self.state.lock().will = None;
        Ok(())
    }

    /// Walks the three in-flight tables every tick and retransmits
    /// anything overdue. Stopped by `close` aborting the task.
    pub(super) async fn retry_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.retry_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.resend_overdue().await;
        }
    }

    async fn resend_overdue(&self) {
        let now = Instant::now();
        let initial = self.config.retry_initial_delay;
        let max = self.config.retry_max_delay;

        // Collect under the lock, write after releasing it.
        let mut due = Vec::new();
        {
            let mut state = self.state.lock();
            for msg in state.unacked_publishes.values_mut() {
                if msg.retry.is_due(now) {
                    msg.retry.advance(initial, max);
                    msg.dup = true;
                    debug!(
                        session = self.id,
                        packet_id = msg.packet_id,
                        send_count = msg.retry.send_count,
                        "resending PUBLISH"
                    );
                    due.push(msg.to_packet());
                }
            }
            for msg in state.unacked_pubrels.values_mut() {
                if msg.retry.is_due(now) {
                    msg.retry.advance(initial, max);
                    debug!(session = self.id, packet_id = msg.packet_id, "resending PUBREL");
                    due.push(msg.to_packet());
                }
            }
            for msg in state.unacked_pubrecs.values_mut() {
                if msg.retry.is_due(now) {
                    msg.retry.advance(initial, max);
                    debug!(session = self.id, packet_id = msg.packet_id, "resending PUBREC");
                    due.push(msg.to_packet());
                }
            }
        }

        for packet in due {
            if let Err(err) = self.write(packet).await {
                debug!(session = self.id, error = %err, "retry write failed");
                return;
            }
        }
    }

    /// Tears the session down: stops the retry tick, publishes the will if
    /// one is still armed, and shuts the connection. Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.retry_task.lock().take() {
            task.abort();
        }

        let will = self.state.lock().will.take();
        if let Some(will) = will {
            info!(session = self.id, topic = %will.topic, "publishing will");
            if let Some(hub) = self.hub.upgrade() {
                hub.fan_out(self.id, &will.topic, &will.payload, will.qos)
                    .await;
            }
        }

        debug!(
            session = self.id,
            addr = %self.addr,
            uptime = ?self.created_at.elapsed(),
            "session closed"
        );

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
