//! Data packets carried hop by hop through the SPY overlay

use std::fmt::Display;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::flow::FlowKey;
use crate::wire::{
    ensure, get_addr, put_addr, read_type, DisjointHeader, MessageType, PositionHeader,
    TypeHeader, WireHeader,
};

/// Hop limit given to newly originated packets
pub const DEFAULT_TTL: u8 = 64;

/// An application packet together with its routing headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Originating node
    pub source: Ipv4Addr,
    /// Final destination
    pub destination: Ipv4Addr,
    /// Geographic routing state
    pub position: PositionHeader,
    /// Disjoint-path state
    pub disjoint: DisjointHeader,
    /// Remaining hops before the packet is discarded
    pub ttl: u8,
    /// Opaque application data
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a packet that has not been routed yet
    ///
    /// The routing headers are filled in by the first call to the router.
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            destination,
            position: PositionHeader::default(),
            disjoint: DisjointHeader::new(0, 0, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED),
            ttl: DEFAULT_TTL,
            payload: payload.into(),
        }
    }

    /// Flow this packet belongs to
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.source, self.destination, self.disjoint.path_id)
    }

    /// Total encoded length including the type byte
    pub fn serialized_size(&self) -> usize {
        1 + self.position.serialized_size() + self.disjoint.serialized_size() + 9 + self.payload.len()
    }

    /// Encode into a POSITION frame
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        TypeHeader::new(MessageType::Position).encode(&mut buf)?;
        self.position.encode(&mut buf)?;
        self.disjoint.encode(&mut buf)?;
        put_addr(&mut buf, self.source);
        put_addr(&mut buf, self.destination);
        buf.put_u8(self.ttl);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a POSITION frame; everything after the headers is payload
    pub fn decode(frame: &Bytes) -> Result<Self, WireError> {
        let mut buf = &frame[..];
        let kind = read_type(&mut buf)?;
        if kind != MessageType::Position {
            return Err(WireError::UnexpectedMessageType(kind.code()));
        }
        let position = PositionHeader::decode(&mut buf)?;
        let disjoint = DisjointHeader::decode(&mut buf)?;
        let source = get_addr(&mut buf, "packet addresses")?;
        let destination = get_addr(&mut buf, "packet addresses")?;
        ensure(&buf, "packet ttl", 1)?;
        let ttl = buf.get_u8();
        let payload = frame.slice(frame.len() - buf.len()..);

        Ok(Self {
            source,
            destination,
            position,
            disjoint,
            ttl,
            payload,
        })
    }
}

impl Display for DataPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{} path={} parity={} ({} bytes)",
            self.source,
            self.destination,
            self.disjoint.path_id,
            self.disjoint.parity,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;

    fn sample() -> DataPacket {
        let mut packet = DataPacket::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 9),
            Bytes::from_static(b"hello"),
        );
        packet.position = PositionHeader::new(
            Position::new(500.0, 20.0),
            3,
            Position::default(),
            false,
            Position::new(0.0, 0.0),
        );
        packet.disjoint = DisjointHeader::new(1, 1, packet.source, packet.source);
        packet
    }

    #[test]
    fn test_packet_frame_roundtrip() {
        let packet = sample();
        let frame = packet.encode().unwrap();
        assert_eq!(frame.len(), packet.serialized_size());
        assert_eq!(frame.len(), 1 + 53 + 10 + 8 + 1 + 5);
        assert_eq!(frame[0], MessageType::Position.code());

        let decoded = DataPacket::decode(&frame).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn test_empty_payload() {
        let mut packet = sample();
        packet.payload = Bytes::new();
        let frame = packet.encode().unwrap();
        assert_eq!(DataPacket::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_flow_key() {
        let packet = sample();
        let key = packet.flow_key();
        assert_eq!(key.source, packet.source);
        assert_eq!(key.destination, packet.destination);
        assert_eq!(key.path_bit, 1);
    }

    #[test]
    fn test_decode_rejects_control_frame() {
        let frame = Bytes::from_static(&[1, 0, 0]);
        assert_eq!(
            DataPacket::decode(&frame).unwrap_err(),
            WireError::UnexpectedMessageType(1)
        );
    }

    #[test]
    fn test_decode_truncated() {
        let frame = sample().encode().unwrap();
        let cut = frame.slice(..60);
        assert!(matches!(
            DataPacket::decode(&cut),
            Err(WireError::Truncated { .. })
        ));
    }
}
