//! Framing: typed packets over a byte stream.
//!
//! A packet on the wire is one fixed-header byte (`type << 4 | flags`), a
//! remaining-length field, and that many payload bytes. The reader applies
//! its timeout as a fresh deadline at every read call, so a slow peer that
//! keeps trickling bytes is allowed to finish a packet.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::encoding::encode_remaining_length;
use crate::error::{ProtocolError, Result};
use crate::payload::PayloadReader;

/// The fourteen packet types of MQTT 3.1 / 3.1.1, carried in the upper
/// nibble of the fixed-header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            other => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "invalid packet type: {other}"
                )))
            }
        })
    }
}

/// One framed protocol packet. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub flags: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, flags: u8) -> Self {
        Packet {
            packet_type,
            flags,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(packet_type: PacketType, flags: u8, payload: Bytes) -> Self {
        Packet {
            packet_type,
            flags,
            payload,
        }
    }

    /// A sequential reader positioned at the start of the payload.
    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.payload)
    }

    /// Appends the wire encoding of this packet to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.packet_type as u8) << 4 | (self.flags & 0x0F));
        encode_remaining_length(self.payload.len(), buf);
        buf.put_slice(&self.payload);
    }
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R, deadline: Duration) -> Result<u8> {
    match timeout(deadline, reader.read_u8()).await {
        Ok(Ok(byte)) => Ok(byte),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Reads one packet from the stream.
///
/// `per_read_timeout` is applied as a deadline relative to now at each
/// underlying read, not to the packet as a whole. Returns
/// [`ProtocolError::Eof`] on a cleanly closed stream and
/// [`ProtocolError::Timeout`] when a deadline elapses.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    per_read_timeout: Duration,
) -> Result<Packet> {
    let first = read_byte(reader, per_read_timeout).await?;
    let packet_type = PacketType::try_from(first >> 4)?;
    let flags = first & 0x0F;

    let mut remaining = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = read_byte(reader, per_read_timeout).await?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(ProtocolError::MalformedRemainingLength);
        }
    }

    let mut payload = vec![0u8; remaining];
    if remaining > 0 {
        match timeout(per_read_timeout, reader.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(ProtocolError::Timeout),
        }
    }

    Ok(Packet {
        packet_type,
        flags,
        payload: Bytes::from(payload),
    })
}

/// Writes one packet as a single concatenated buffer.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    let mut buf = BytesMut::with_capacity(5 + packet.payload.len());
    packet.encode(&mut buf);
    writer.write_all(&buf).await?;
    Ok(())
}
