//! SUBSCRIBE and UNSUBSCRIBE handling.

use tracing::debug;

use mqtt3_protocol::{Packet, PacketType, PayloadWriter, ProtocolError, Result, TopicFilter};

use super::{Session, Subscription};

impl Session {
    /// Installs each requested subscription, forwards matching retained
    /// messages, and acknowledges with a single granted-QoS byte equal to
    /// the highest requested QoS.
    pub(super) async fn handle_subscribe(&self, packet: &Packet) -> Result<()> {
        if packet.flags != 2 {
            return Err(ProtocolError::MalformedPacket(format!(
                "SUBSCRIBE flags must be 2, got {}",
                packet.flags
            )));
        }

        let mut reader = packet.reader();
        let packet_id = reader.read_u16()?;

        let mut granted: Option<u8> = None;
        let mut retained = Vec::new();
        while !reader.at_end() {
            let filter = TopicFilter::from(reader.read_string()?);
            let qos = reader.read_u8()?;
            if qos > 2 {
                return Err(ProtocolError::MalformedPacket(format!(
                    "invalid requested QoS {qos}"
                )));
            }
            granted = Some(granted.map_or(qos, |g| g.max(qos)));
            debug!(session = self.id, filter = %filter, qos, "subscription added");

            // Matching retained messages go out before the SUBACK, capped
            // at the requested QoS.
            for (name, message) in self.topics.retained_matching(&filter) {
                retained.push((name, message.payload, qos.min(message.qos)));
            }

            self.state
                .lock()
                .subscriptions
                .insert(filter.clone(), Subscription { filter, qos });
        }

        let Some(granted) = granted else {
            return Err(ProtocolError::MalformedPacket(
                "SUBSCRIBE with no topic filters".to_string(),
            ));
        };

        for (name, payload, qos) in retained {
            self.send_publish(name, payload, qos, true).await?;
        }

        let mut writer = PayloadWriter::new();
        writer.put_u16(packet_id);
        writer.put_u8(granted);
        self.write(Packet::with_payload(
            PacketType::SubAck,
            0,
            writer.into_payload(),
        ))
        .await
    }

    pub(super) async fn handle_unsubscribe(&self, packet: &Packet) -> Result<()> {
        if packet.flags != 2 {
            return Err(ProtocolError::MalformedPacket(format!(
                "UNSUBSCRIBE flags must be 2, got {}",
                packet.flags
            )));
        }

        let mut reader = packet.reader();
        let packet_id = reader.read_u16()?;

        let mut filters = Vec::new();
        while !reader.at_end() {
            filters.push(TopicFilter::from(reader.read_string()?));
        }
        if filters.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "UNSUBSCRIBE with no topic filters".to_string(),
            ));
        }

        {
            let mut state = self.state.lock();
            for filter in &filters {
                // Removing an unknown filter is a no-op.
                if state.subscriptions.remove(filter).is_some() {
                    debug!(session = self.id, filter = %filter, "subscription removed");
                }
            }
        }

        let mut writer = PayloadWriter::new();
        writer.put_u16(packet_id);
        self.write(Packet::with_payload(
            PacketType::UnsubAck,
            0,
            writer.into_payload(),
        ))
        .await
    }
}
