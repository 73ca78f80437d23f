//! In-flight records for the acknowledgement-requiring flows.
//!
//! An entry lives in one of the session's three tables from the moment its
//! packet is first sent until the matching acknowledgement arrives; the
//! retry tick retransmits overdue entries with a growing back-off.

use std::time::{Duration, Instant};

use bytes::Bytes;

use mqtt3_protocol::{Packet, PacketType, PayloadWriter, TopicName};

/// Retransmission bookkeeping shared by all three in-flight record kinds.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    pub next_send_time: Instant,
    pub send_count: u32,
}

impl RetrySchedule {
    /// The schedule right after the first transmission: one send done, the
    /// first retry due after `initial_delay`.
    pub fn first_send(initial_delay: Duration) -> Self {
        RetrySchedule {
            next_send_time: Instant::now() + initial_delay,
            send_count: 1,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_send_time < now
    }

    /// Counts the retransmission and pushes the deadline out by
    /// `initial_delay × send_count`, capped at `max_delay`.
    pub fn advance(&mut self, initial_delay: Duration, max_delay: Duration) {
        self.send_count += 1;
        let delay = (initial_delay * self.send_count).min(max_delay);
        self.next_send_time += delay;
    }
}

/// A PUBLISH awaiting PUBACK (QoS 1) or PUBREC (QoS 2).
///
/// Also doubles as the retained-message payload carrier; the retained and
/// fan-out paths clone the record and mutate the clone.
#[derive(Debug, Clone)]
pub struct OutstandingPublish {
    pub packet_id: u16,
    pub topic: TopicName,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    pub retry: RetrySchedule,
}

impl OutstandingPublish {
    pub fn new(topic: TopicName, payload: Bytes, qos: u8, retain: bool) -> Self {
        OutstandingPublish {
            packet_id: 0,
            topic,
            payload,
            qos,
            retain,
            dup: false,
            retry: RetrySchedule {
                next_send_time: Instant::now(),
                send_count: 0,
            },
        }
    }

    pub fn to_packet(&self) -> Packet {
        let mut flags = (self.qos & 0x03) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        let mut writer = PayloadWriter::new();
        writer.put_string(self.topic.as_str());
        if self.qos > 0 {
            writer.put_u16(self.packet_id);
        }
        writer.put_raw(&self.payload);
        Packet::with_payload(PacketType::Publish, flags, writer.into_payload())
    }
}

/// A PUBREL awaiting PUBCOMP (outgoing side of the QoS 2 handshake).
#[derive(Debug, Clone)]
pub struct OutstandingPubRel {
    pub packet_id: u16,
    pub retry: RetrySchedule,
}

impl OutstandingPubRel {
    pub fn to_packet(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.put_u16(self.packet_id);
        // PUBREL is the one acknowledgement with mandated flags of 2.
        Packet::with_payload(PacketType::PubRel, 2, writer.into_payload())
    }
}

/// A PUBREC awaiting PUBREL (incoming side of the QoS 2 handshake).
#[derive(Debug, Clone)]
pub struct OutstandingPubRec {
    pub packet_id: u16,
    pub retry: RetrySchedule,
}

impl OutstandingPubRec {
    pub fn to_packet(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.put_u16(self.packet_id);
        Packet::with_payload(PacketType::PubRec, 0, writer.into_payload())
    }
}
