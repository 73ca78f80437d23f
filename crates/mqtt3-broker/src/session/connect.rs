//! The CONNECT handshake.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use mqtt3_protocol::{Packet, PacketType, ProtocolError, Result, TopicName};

use super::{Session, Will};

const CONNECT_ACCEPTED: u8 = 0x00;
const CONNECT_UNACCEPTABLE_PROTOCOL_VERSION: u8 = 0x01;

const FLAG_USER_NAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_WILL: u8 = 0x04;
const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_RESERVED: u8 = 0x01;

impl Session {
    /// Parses the CONNECT packet and, on success, marks the session
    /// connected and acknowledges it. Any error closes the connection; an
    /// unacceptable protocol version is the one case reported to the
    /// client first.
    pub(super) async fn handle_connect(&self, packet: &Packet) -> Result<()> {
        let mut reader = packet.reader();
        let protocol_name = reader.read_string()?;
        let protocol_version = reader.read_u8()?;

        match (protocol_name.as_str(), protocol_version) {
            ("MQIsdp", 3) | ("MQTT", 4) => {}
            ("MQIsdp" | "MQTT", version) => {
                info!(
                    session = self.id,
                    protocol = %protocol_name,
                    version,
                    "unacceptable protocol version"
                );
                self.send_connack(CONNECT_UNACCEPTABLE_PROTOCOL_VERSION, false)
                    .await?;
                return Err(ProtocolError::MalformedPacket(
                    "unacceptable protocol version".to_string(),
                ));
            }
            (other, _) => {
                info!(session = self.id, protocol = %other, "unknown protocol");
                return Err(ProtocolError::MalformedPacket(format!(
                    "unknown protocol {other:?}"
                )));
            }
        }

        let flags = reader.read_u8()?;
        // 3.1.1 requires the reserved bit to be clear; no CONNACK is owed.
        if protocol_name == "MQTT" && flags & FLAG_RESERVED != 0 {
            return Err(ProtocolError::MalformedPacket(
                "reserved connect flag is set".to_string(),
            ));
        }

        let keep_alive_secs = reader.read_u16()?;
        let client_id = reader.read_string()?;

        let will = if flags & FLAG_WILL != 0 {
            let topic = TopicName::from(reader.read_string()?);
            let payload = Bytes::copy_from_slice(reader.read_bytes()?);
            Some(Will {
                retain: flags & FLAG_WILL_RETAIN != 0,
                qos: (flags >> 3) & 0x03,
                topic,
                payload,
            })
        } else {
            None
        };

        // Credentials are read to keep the cursor aligned, then dropped.
        if flags & FLAG_USER_NAME != 0 {
            let user_name = reader.read_string()?;
            debug!(session = self.id, user_name = %user_name, "ignoring credentials");
        }
        if flags & FLAG_PASSWORD != 0 {
            let _password = reader.read_bytes()?;
        }

        let clean_session = flags & FLAG_CLEAN_SESSION != 0;
        info!(
            session = self.id,
            client_id = %client_id,
            protocol = %protocol_name,
            keep_alive_secs,
            clean_session,
            has_will = will.is_some(),
            "client connected"
        );

        {
            let mut state = self.state.lock();
            state.connected = true;
            state.keep_alive = Duration::from_secs(u64::from(keep_alive_secs));
            state.will = will;
            state.last_message_received = Instant::now();
        }

        self.send_connack(CONNECT_ACCEPTED, true).await
    }

    async fn send_connack(&self, result: u8, session_present: bool) -> Result<()> {
        let payload = Bytes::from(vec![u8::from(session_present), result]);
        self.write(Packet::with_payload(PacketType::ConnAck, 0, payload))
            .await
    }
}
