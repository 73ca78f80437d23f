//! Inbound and outbound PUBLISH traffic and the acknowledgement flows.

use bytes::Bytes;
use tracing::debug;

use mqtt3_protocol::{Packet, PacketType, PayloadWriter, ProtocolError, Result, TopicName};

use crate::outstanding::{OutstandingPubRec, OutstandingPubRel, OutstandingPublish, RetrySchedule};

use super::Session;

impl Session {
    pub(super) async fn handle_publish(&self, packet: &Packet) -> Result<()> {
        let dup = packet.flags & 0x08 != 0;
        let qos = (packet.flags >> 1) & 0x03;
        let retain = packet.flags & 0x01 != 0;
        if qos > 2 {
            return Err(ProtocolError::MalformedPacket(format!(
                "invalid publish QoS {qos}"
            )));
        }

        let mut reader = packet.reader();
        let topic = TopicName::from(reader.read_string()?);
        let packet_id = if qos > 0 { reader.read_u16()? } else { 0 };
        let payload = Bytes::copy_from_slice(reader.remaining());

        debug!(
            session = self.id,
            topic = %topic,
            qos,
            retain,
            dup,
            packet_id,
            payload_len = payload.len(),
            "PUBLISH received"
        );

        if retain {
            self.topics.retain(&topic, &payload, qos);
        }

        if let Some(hub) = self.hub.upgrade() {
            hub.fan_out(self.id, &topic, &payload, qos).await;
        }

        match qos {
            0 => {}
            1 => self.send_puback(packet_id).await?,
            _ => self.send_pubrec(packet_id).await?,
        }
        Ok(())
    }

    pub(super) fn handle_puback(&self, packet: &Packet) -> Result<()> {
        let packet_id = packet.reader().read_u16()?;
        let mut state = self.state.lock();
        match state.unacked_publishes.get(&packet_id).map(|p| p.qos) {
            Some(1) => {
                state.unacked_publishes.remove(&packet_id);
                debug!(session = self.id, packet_id, "PUBACK settled publish");
            }
            Some(qos) => {
                debug!(
                    session = self.id,
                    packet_id, qos, "PUBACK for non-QoS-1 publish, ignoring"
                );
            }
            None => {
                debug!(
                    session = self.id,
                    packet_id, "PUBACK without outstanding publish, ignoring"
                );
            }
        }
        Ok(())
    }

    pub(super) async fn handle_pubrec(&self, packet: &Packet) -> Result<()> {
        let packet_id = packet.reader().read_u16()?;
        let known = self
            .state
            .lock()
            .unacked_publishes
            .remove(&packet_id)
            .is_some();
        if !known {
            debug!(
                session = self.id,
                packet_id, "PUBREC without outstanding publish, ignoring"
            );
            return Ok(());
        }
        self.send_pubrel(packet_id).await
    }

    pub(super) async fn handle_pubrel(&self, packet: &Packet) -> Result<()> {
        let packet_id = packet.reader().read_u16()?;
        let known = self
            .state
            .lock()
            .unacked_pubrecs
            .remove(&packet_id)
            .is_some();
        if !known {
            debug!(
                session = self.id,
                packet_id, "PUBREL without outstanding PUBREC, ignoring"
            );
            return Ok(());
        }
        let mut writer = PayloadWriter::new();
        writer.put_u16(packet_id);
        self.write(Packet::with_payload(
            PacketType::PubComp,
            0,
            writer.into_payload(),
        ))
        .await
    }

    pub(super) fn handle_pubcomp(&self, packet: &Packet) -> Result<()> {
        let packet_id = packet.reader().read_u16()?;
        if self
            .state
            .lock()
            .unacked_pubrels
            .remove(&packet_id)
            .is_none()
        {
            debug!(
                session = self.id,
                packet_id, "PUBCOMP without outstanding PUBREL, ignoring"
            );
        }
        Ok(())
    }

    /// Sends a PUBLISH to this session's client.
    ///
    /// A QoS > 0 message is placed in the in-flight table, first retry
    /// scheduled, before its bytes hit the wire.
    pub(crate) async fn send_publish(
        &self,
        topic: TopicName,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) -> Result<()> {
        let mut message = OutstandingPublish::new(topic, payload, qos, retain);
        if qos > 0 {
            let mut state = self.state.lock();
            message.packet_id = state.allocate_packet_id();
            message.retry = RetrySchedule::first_send(self.config.retry_initial_delay);
            state
                .unacked_publishes
                .insert(message.packet_id, message.clone());
        }
        debug!(
            session = self.id,
            topic = %message.topic,
            qos,
            retain,
            packet_id = message.packet_id,
            "PUBLISH out"
        );
        self.write(message.to_packet()).await
    }

    async fn send_puback(&self, packet_id: u16) -> Result<()> {
        let mut writer = PayloadWriter::new();
        writer.put_u16(packet_id);
        self.write(Packet::with_payload(
            PacketType::PubAck,
            0,
            writer.into_payload(),
        ))
        .await
    }

    async fn send_pubrec(&self, packet_id: u16) -> Result<()> {
        let pubrec = OutstandingPubRec {
            packet_id,
            retry: RetrySchedule::first_send(self.config.retry_initial_delay),
        };
        let packet = pubrec.to_packet();
        self.state.lock().unacked_pubrecs.insert(packet_id, pubrec);
        self.write(packet).await
    }

    async fn send_pubrel(&self, packet_id: u16) -> Result<()> {
        let pubrel = OutstandingPubRel {
            packet_id,
            retry: RetrySchedule::first_send(self.config.retry_initial_delay),
        };
        let packet = pubrel.to_packet();
        self.state.lock().unacked_pubrels.insert(packet_id, pubrel);
        self.write(packet).await
    }
}
