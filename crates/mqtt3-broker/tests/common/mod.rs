//! Shared helpers for the black-box broker tests: a broker on an ephemeral
//! port and raw packet builders, so every test speaks real protocol bytes
//! over TCP.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use mqtt3_broker::{Broker, BrokerConfig};
use mqtt3_protocol::{read_packet, write_packet, Packet, PacketType, PayloadWriter, ProtocolError};

/// Generous deadline for packets the broker is expected to send.
pub const READ: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mqtt3_broker=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        management_addr: None,
        ..BrokerConfig::default()
    }
}

pub async fn start_broker(config: BrokerConfig) -> (Arc<Broker>, SocketAddr) {
    init_tracing();
    let broker = Broker::bind(config).await.expect("bind broker");
    let addr = broker.local_addr();
    tokio::spawn(Arc::clone(&broker).run());
    (broker, addr)
}

pub fn connect_packet(client_id: &str, keep_alive: u16, will: Option<(&str, &[u8])>) -> Packet {
    let mut w = PayloadWriter::new();
    w.put_string("MQTT");
    w.put_u8(4);
    let mut flags = 0x02u8; // clean session
    if will.is_some() {
        flags |= 0x04;
    }
    w.put_u8(flags);
    w.put_u16(keep_alive);
    w.put_string(client_id);
    if let Some((topic, payload)) = will {
        w.put_string(topic);
        w.put_bytes(payload);
    }
    Packet::with_payload(PacketType::Connect, 0, w.into_payload())
}

pub fn publish_packet(
    topic: &str,
    payload: &[u8],
    qos: u8,
    retain: bool,
    packet_id: u16,
) -> Packet {
    let mut flags = (qos & 0x03) << 1;
    if retain {
        flags |= 0x01;
    }
    let mut w = PayloadWriter::new();
    w.put_string(topic);
    if qos > 0 {
        w.put_u16(packet_id);
    }
    w.put_raw(payload);
    Packet::with_payload(PacketType::Publish, flags, w.into_payload())
}

pub fn subscribe_packet(packet_id: u16, filters: &[(&str, u8)]) -> Packet {
    let mut w = PayloadWriter::new();
    w.put_u16(packet_id);
    for (filter, qos) in filters {
        w.put_string(filter);
        w.put_u8(*qos);
    }
    Packet::with_payload(PacketType::Subscribe, 2, w.into_payload())
}

pub fn unsubscribe_packet(packet_id: u16, filters: &[&str]) -> Packet {
    let mut w = PayloadWriter::new();
    w.put_u16(packet_id);
    for filter in filters {
        w.put_string(filter);
    }
    Packet::with_payload(PacketType::Unsubscribe, 2, w.into_payload())
}

pub fn ack_packet(packet_type: PacketType, flags: u8, packet_id: u16) -> Packet {
    let mut w = PayloadWriter::new();
    w.put_u16(packet_id);
    Packet::with_payload(packet_type, flags, w.into_payload())
}

/// Fields of a received PUBLISH, decoded the way a client would.
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: u16,
}

pub fn parse_publish(packet: &Packet) -> ReceivedPublish {
    assert_eq!(packet.packet_type, PacketType::Publish);
    let qos = (packet.flags >> 1) & 0x03;
    let mut reader = packet.reader();
    let topic = reader.read_string().expect("publish topic");
    let packet_id = if qos > 0 {
        reader.read_u16().expect("publish packet id")
    } else {
        0
    };
    ReceivedPublish {
        topic,
        payload: reader.remaining().to_vec(),
        qos,
        retain: packet.flags & 0x01 != 0,
        dup: packet.flags & 0x08 != 0,
        packet_id,
    }
}

pub async fn connect(addr: SocketAddr, client_id: &str) -> TcpStream {
    connect_with(addr, connect_packet(client_id, 60, None)).await
}

pub async fn connect_with(addr: SocketAddr, connect: Packet) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    write_packet(&mut stream, &connect)
        .await
        .expect("send CONNECT");
    let connack = read_packet(&mut stream, READ).await.expect("read CONNACK");
    assert_eq!(connack.packet_type, PacketType::ConnAck);
    assert_eq!(&connack.payload[..], &[0x01, 0x00]);
    stream
}

pub async fn subscribe(stream: &mut TcpStream, filter: &str, qos: u8) {
    write_packet(stream, &subscribe_packet(1, &[(filter, qos)]))
        .await
        .expect("send SUBSCRIBE");
    let suback = read_packet(stream, READ).await.expect("read SUBACK");
    assert_eq!(suback.packet_type, PacketType::SubAck);
}

/// Asserts that nothing arrives on `stream` for `window`.
pub async fn assert_silent(stream: &mut TcpStream, window: Duration) {
    match read_packet(stream, window).await {
        Err(ProtocolError::Timeout) => {}
        Ok(packet) => panic!("unexpected packet: {packet:?}"),
        Err(err) => panic!("unexpected error while expecting silence: {err}"),
    }
}

/// Asserts that the broker has closed `stream`.
pub async fn assert_closed(stream: &mut TcpStream) {
    match read_packet(stream, READ).await {
        Err(ProtocolError::Eof) => {}
        Ok(packet) => panic!("expected close, got packet: {packet:?}"),
        Err(err) => panic!("expected close, got error: {err}"),
    }
}
