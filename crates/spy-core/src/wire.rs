//! Wire format for SPY control-port frames
//!
//! Every frame starts with a one-byte [`TypeHeader`] followed by a fixed
//! sequence of headers for that message kind. All multi-byte fields are
//! big-endian.
//!
//! ```text
//! HELLO               type(1) || HelloHeader(16)
//! POSITION            type(1) || PositionHeader(53) || DisjointHeader(10)
//!                     || source(4) || destination(4) || ttl(1) || payload
//! NEIGH_INTERSECTION  type(1) || PathId(9) || probe source(4) || probe dest(4)
//! IN_ANALYSIS         || NeighIntersection(1 + 4N) || TakeShortcut(4)
//! TAKE_SHORTCUT       type(1) || PathId(9) || TakeShortcut(4) || probe source(4)
//!                     || probe dest(4) || NeighIntersection(1 + 4N) || TakeShortcut(4)
//! SET_PATH            type(1) || PathId(9) || TakeShortcut(4)
//! ```
//!
//! Coordinates travel as unsigned integers; see [`Position::to_wire`].

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::geometry::Position;

/// Maximum number of addresses a [`NeighIntersection`] can carry
pub const MAX_NEIGHBORS: usize = u8::MAX as usize;

/// A header with a binary encoding of known size
pub trait WireHeader: Sized {
    /// Human-readable name used in decode errors
    const NAME: &'static str;

    /// Number of bytes [`encode`](Self::encode) writes
    fn serialized_size(&self) -> usize;

    /// Append the encoded header to `buf`
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError>;

    /// Read the header fields from `buf` without the length check
    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError>;

    /// Read a header from `buf`, checking that exactly
    /// [`serialized_size`](Self::serialized_size) bytes were consumed.
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        let before = buf.remaining();
        let header = Self::decode_fields(buf)?;
        let consumed = before - buf.remaining();
        let expected = header.serialized_size();
        if consumed != expected {
            return Err(WireError::MalformedHeader {
                header: Self::NAME,
                expected,
                actual: consumed,
            });
        }
        Ok(header)
    }

    /// Encode into a fresh buffer
    fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

pub(crate) fn ensure<B: Buf>(buf: &B, header: &'static str, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            header,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

pub(crate) fn put_addr<B: BufMut>(buf: &mut B, addr: Ipv4Addr) {
    buf.put_u32(u32::from(addr));
}

pub(crate) fn get_addr<B: Buf>(buf: &mut B, header: &'static str) -> Result<Ipv4Addr, WireError> {
    ensure(buf, header, 4)?;
    Ok(Ipv4Addr::from(buf.get_u32()))
}

/// Message kinds carried on the control port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    Position = 2,
    NeighIntersection = 3,
    TakeShortcut = 4,
    InAnalysis = 5,
    SetPath = 6,
}

impl MessageType {
    /// Wire code for this message type
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a wire code to a message type
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Hello),
            2 => Some(Self::Position),
            3 => Some(Self::NeighIntersection),
            4 => Some(Self::TakeShortcut),
            5 => Some(Self::InAnalysis),
            6 => Some(Self::SetPath),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hello => "HELLO",
            Self::Position => "POSITION",
            Self::NeighIntersection => "NEIGH_INTERSECTION",
            Self::TakeShortcut => "TAKE_SHORTCUT",
            Self::InAnalysis => "IN_ANALYSIS",
            Self::SetPath => "SET_PATH",
        };
        f.write_str(name)
    }
}

/// Leading one-byte message tag
///
/// Decoding never fails on an unknown code; the header is kept with
/// [`is_valid`](Self::is_valid) returning false so the caller can drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeHeader {
    code: u8,
}

impl TypeHeader {
    pub fn new(kind: MessageType) -> Self {
        Self { code: kind.code() }
    }

    /// The message type, if the code was a known one
    pub fn get(&self) -> Option<MessageType> {
        MessageType::from_code(self.code)
    }

    pub fn is_valid(&self) -> bool {
        self.get().is_some()
    }

    /// The raw code as read from the wire
    pub fn code(&self) -> u8 {
        self.code
    }
}

impl WireHeader for TypeHeader {
    const NAME: &'static str = "TypeHeader";

    fn serialized_size(&self) -> usize {
        1
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        buf.put_u8(self.code);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 1)?;
        Ok(Self { code: buf.get_u8() })
    }
}

/// Position announcement broadcast by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HelloHeader {
    pub origin_x: u64,
    pub origin_y: u64,
}

impl HelloHeader {
    pub fn new(position: Position) -> Self {
        let (origin_x, origin_y) = position.to_wire();
        Self { origin_x, origin_y }
    }

    pub fn position(&self) -> Position {
        Position::from_wire(self.origin_x, self.origin_y)
    }
}

impl WireHeader for HelloHeader {
    const NAME: &'static str = "HelloHeader";

    fn serialized_size(&self) -> usize {
        16
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        buf.put_u64(self.origin_x);
        buf.put_u64(self.origin_y);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 16)?;
        Ok(Self {
            origin_x: buf.get_u64(),
            origin_y: buf.get_u64(),
        })
    }
}

/// Geographic routing state carried by every data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionHeader {
    /// Estimated destination position
    pub dst_x: u64,
    pub dst_y: u64,
    /// Whole-second stamp of the destination estimate
    pub updated: u32,
    /// Where the packet entered recovery mode
    pub recovery_x: u64,
    pub recovery_y: u64,
    /// Non-zero while the packet is in recovery mode
    pub in_recovery: u8,
    /// Position of the hop that sent the packet
    pub last_x: u64,
    pub last_y: u64,
}

impl PositionHeader {
    pub fn new(
        destination: Position,
        updated: u32,
        recovery: Position,
        in_recovery: bool,
        last_hop: Position,
    ) -> Self {
        let (dst_x, dst_y) = destination.to_wire();
        let (recovery_x, recovery_y) = recovery.to_wire();
        let (last_x, last_y) = last_hop.to_wire();
        Self {
            dst_x,
            dst_y,
            updated,
            recovery_x,
            recovery_y,
            in_recovery: u8::from(in_recovery),
            last_x,
            last_y,
        }
    }

    pub fn destination(&self) -> Position {
        Position::from_wire(self.dst_x, self.dst_y)
    }

    pub fn recovery_position(&self) -> Position {
        Position::from_wire(self.recovery_x, self.recovery_y)
    }

    pub fn last_position(&self) -> Position {
        Position::from_wire(self.last_x, self.last_y)
    }

    pub fn in_recovery(&self) -> bool {
        self.in_recovery != 0
    }
}

impl WireHeader for PositionHeader {
    const NAME: &'static str = "PositionHeader";

    fn serialized_size(&self) -> usize {
        53
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        buf.put_u64(self.dst_x);
        buf.put_u64(self.dst_y);
        buf.put_u32(self.updated);
        buf.put_u64(self.recovery_x);
        buf.put_u64(self.recovery_y);
        buf.put_u8(self.in_recovery);
        buf.put_u64(self.last_x);
        buf.put_u64(self.last_y);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 53)?;
        Ok(Self {
            dst_x: buf.get_u64(),
            dst_y: buf.get_u64(),
            updated: buf.get_u32(),
            recovery_x: buf.get_u64(),
            recovery_y: buf.get_u64(),
            in_recovery: buf.get_u8(),
            last_x: buf.get_u64(),
            last_y: buf.get_u64(),
        })
    }
}

/// Disjoint-path bookkeeping carried by every data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisjointHeader {
    /// Which of the two alternating paths this packet follows
    pub path_id: u8,
    /// Toggled at every hop
    pub parity: u8,
    pub last_hop: Ipv4Addr,
    pub last_forwarder: Ipv4Addr,
}

impl DisjointHeader {
    pub fn new(path_id: u8, parity: u8, last_hop: Ipv4Addr, last_forwarder: Ipv4Addr) -> Self {
        Self {
            path_id,
            parity,
            last_hop,
            last_forwarder,
        }
    }

    pub fn toggle_parity(&mut self) {
        self.parity = u8::from(self.parity == 0);
    }
}

impl WireHeader for DisjointHeader {
    const NAME: &'static str = "DisjointHeader";

    fn serialized_size(&self) -> usize {
        10
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        buf.put_u8(self.path_id);
        buf.put_u8(self.parity);
        put_addr(buf, self.last_hop);
        put_addr(buf, self.last_forwarder);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 10)?;
        let path_id = buf.get_u8();
        let parity = buf.get_u8();
        Ok(Self {
            path_id,
            parity,
            last_hop: get_addr(buf, Self::NAME)?,
            last_forwarder: get_addr(buf, Self::NAME)?,
        })
    }
}

/// Identifies the flow a shortcut message is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathId {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub id_bit: u8,
}

impl PathId {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, id_bit: u8) -> Self {
        Self {
            source,
            destination,
            id_bit,
        }
    }
}

impl WireHeader for PathId {
    const NAME: &'static str = "PathId";

    fn serialized_size(&self) -> usize {
        9
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        put_addr(buf, self.source);
        put_addr(buf, self.destination);
        buf.put_u8(self.id_bit);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 9)?;
        Ok(Self {
            source: get_addr(buf, Self::NAME)?,
            destination: get_addr(buf, Self::NAME)?,
            id_bit: buf.get_u8(),
        })
    }
}

/// Neighbor list exchanged while searching for a shortcut
///
/// Only the list itself is part of this header's encoding. `source` and
/// `destination` name the edge being probed and travel in the endpoints
/// block of the enclosing frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NeighIntersection {
    pub source: Option<Ipv4Addr>,
    pub destination: Option<Ipv4Addr>,
    pub neighbors: Vec<Ipv4Addr>,
}

impl NeighIntersection {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, neighbors: Vec<Ipv4Addr>) -> Self {
        Self {
            source: Some(source),
            destination: Some(destination),
            neighbors,
        }
    }

    /// Remove and return the last candidate in the list
    pub fn pop_next(&mut self) -> Option<Ipv4Addr> {
        self.neighbors.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    fn encode_endpoints<B: BufMut>(&self, buf: &mut B) {
        put_addr(buf, self.source.unwrap_or(Ipv4Addr::UNSPECIFIED));
        put_addr(buf, self.destination.unwrap_or(Ipv4Addr::UNSPECIFIED));
    }

    fn decode_endpoints<B: Buf>(buf: &mut B) -> Result<(Option<Ipv4Addr>, Option<Ipv4Addr>), WireError> {
        let source = get_addr(buf, "probe endpoints")?;
        let destination = get_addr(buf, "probe endpoints")?;
        Ok((non_zero(source), non_zero(destination)))
    }
}

fn non_zero(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    (!addr.is_unspecified()).then_some(addr)
}

impl WireHeader for NeighIntersection {
    const NAME: &'static str = "NeighIntersection";

    fn serialized_size(&self) -> usize {
        1 + 4 * self.neighbors.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        if self.neighbors.len() > MAX_NEIGHBORS {
            return Err(WireError::TooManyNeighbors(self.neighbors.len()));
        }
        buf.put_u8(self.neighbors.len() as u8);
        for addr in &self.neighbors {
            put_addr(buf, *addr);
        }
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure(buf, Self::NAME, 1)?;
        let count = buf.get_u8() as usize;
        ensure(buf, Self::NAME, 4 * count)?;
        let neighbors = (0..count)
            .map(|_| Ipv4Addr::from(buf.get_u32()))
            .collect();
        Ok(Self {
            source: None,
            destination: None,
            neighbors,
        })
    }
}

/// Names a node offering itself as a shortcut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeShortcut {
    pub shortcut: Ipv4Addr,
}

impl TakeShortcut {
    pub fn new(shortcut: Ipv4Addr) -> Self {
        Self { shortcut }
    }
}

impl WireHeader for TakeShortcut {
    const NAME: &'static str = "TakeShortcut";

    fn serialized_size(&self) -> usize {
        4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        put_addr(buf, self.shortcut);
        Ok(())
    }

    fn decode_fields<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        Ok(Self {
            shortcut: get_addr(buf, Self::NAME)?,
        })
    }
}

/// Body shared by NEIGH_INTERSECTION, IN_ANALYSIS and the inner part of
/// TAKE_SHORTCUT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionProbe {
    pub path: PathId,
    pub intersection: NeighIntersection,
    /// The node that issued this probe
    pub prober: TakeShortcut,
}

impl IntersectionProbe {
    pub fn new(path: PathId, intersection: NeighIntersection, prober: Ipv4Addr) -> Self {
        Self {
            path,
            intersection,
            prober: TakeShortcut::new(prober),
        }
    }

    fn serialized_size(&self) -> usize {
        self.path.serialized_size() + 8 + self.intersection.serialized_size() + 4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), WireError> {
        self.path.encode(buf)?;
        self.intersection.encode_endpoints(buf);
        self.intersection.encode(buf)?;
        self.prober.encode(buf)
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        let path = PathId::decode(buf)?;
        Self::decode_after_path(path, buf)
    }

    fn decode_after_path<B: Buf>(path: PathId, buf: &mut B) -> Result<Self, WireError> {
        let (source, destination) = NeighIntersection::decode_endpoints(buf)?;
        let mut intersection = NeighIntersection::decode(buf)?;
        intersection.source = source;
        intersection.destination = destination;
        let prober = TakeShortcut::decode(buf)?;
        Ok(Self {
            path,
            intersection,
            prober,
        })
    }
}

/// Decoded form of every non-data control-port frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello(HelloHeader),
    NeighIntersection(IntersectionProbe),
    /// A probe extended backwards, carrying the shortcut proposed by the
    /// node that could not answer it
    TakeShortcut {
        origin: TakeShortcut,
        probe: IntersectionProbe,
    },
    InAnalysis(IntersectionProbe),
    SetPath {
        path: PathId,
        shortcut: TakeShortcut,
    },
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::NeighIntersection(_) => MessageType::NeighIntersection,
            Self::TakeShortcut { .. } => MessageType::TakeShortcut,
            Self::InAnalysis(_) => MessageType::InAnalysis,
            Self::SetPath { .. } => MessageType::SetPath,
        }
    }

    /// Total encoded length including the type byte
    pub fn serialized_size(&self) -> usize {
        1 + match self {
            Self::Hello(hello) => hello.serialized_size(),
            Self::NeighIntersection(probe) | Self::InAnalysis(probe) => probe.serialized_size(),
            Self::TakeShortcut { origin, probe } => {
                // origin sits between the PathId and the rest of the probe
                origin.serialized_size() + probe.serialized_size()
            }
            Self::SetPath { path, shortcut } => path.serialized_size() + shortcut.serialized_size(),
        }
    }

    /// Encode into a complete frame
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        TypeHeader::new(self.message_type()).encode(&mut buf)?;
        match self {
            Self::Hello(hello) => hello.encode(&mut buf)?,
            Self::NeighIntersection(probe) | Self::InAnalysis(probe) => probe.encode(&mut buf)?,
            Self::TakeShortcut { origin, probe } => {
                probe.path.encode(&mut buf)?;
                origin.encode(&mut buf)?;
                probe.intersection.encode_endpoints(&mut buf);
                probe.intersection.encode(&mut buf)?;
                probe.prober.encode(&mut buf)?;
            }
            Self::SetPath { path, shortcut } => {
                path.encode(&mut buf)?;
                shortcut.encode(&mut buf)?;
            }
        }
        Ok(buf.freeze())
    }

    /// Decode a complete frame
    ///
    /// POSITION frames are data packets and are rejected here with
    /// [`WireError::UnexpectedMessageType`]. Bytes left over after the last
    /// header make the frame malformed.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut buf = frame;
        let kind = read_type(&mut buf)?;
        let message = match kind {
            MessageType::Hello => Self::Hello(HelloHeader::decode(&mut buf)?),
            MessageType::NeighIntersection => {
                Self::NeighIntersection(IntersectionProbe::decode(&mut buf)?)
            }
            MessageType::InAnalysis => Self::InAnalysis(IntersectionProbe::decode(&mut buf)?),
            MessageType::TakeShortcut => {
                let path = PathId::decode(&mut buf)?;
                let origin = TakeShortcut::decode(&mut buf)?;
                let probe = IntersectionProbe::decode_after_path(path, &mut buf)?;
                Self::TakeShortcut { origin, probe }
            }
            MessageType::SetPath => {
                let path = PathId::decode(&mut buf)?;
                let shortcut = TakeShortcut::decode(&mut buf)?;
                Self::SetPath { path, shortcut }
            }
            MessageType::Position => return Err(WireError::UnexpectedMessageType(kind.code())),
        };

        if !buf.is_empty() {
            return Err(WireError::MalformedHeader {
                header: "control frame",
                expected: frame.len() - buf.len(),
                actual: frame.len(),
            });
        }
        Ok(message)
    }
}

/// Read the leading type byte and reject unknown codes
pub(crate) fn read_type<B: Buf>(buf: &mut B) -> Result<MessageType, WireError> {
    let header = TypeHeader::decode(buf)?;
    header
        .get()
        .ok_or(WireError::UnknownMessageType(header.code()))
}

/// Message type of a frame without decoding the rest of it
pub fn peek_type(frame: &[u8]) -> Result<MessageType, WireError> {
    let mut buf = frame;
    read_type(&mut buf)
}
