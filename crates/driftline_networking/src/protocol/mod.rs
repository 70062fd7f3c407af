//! # Wire Protocol
//!
//! Every datagram carries exactly one [`SyncMessage`]:
//!
//! ```text
//! ┌─────┬──────────────┬─────────────────────────────┐
//! │ tag │ entity (u64) │ payload (fixed per tag, Pod) │
//! │ 1 B │ 8 B LE       │ 0..80 B                      │
//! └─────┴──────────────┴─────────────────────────────┘
//! ```
//!
//! The encoded length of a snapshot is the byte-cost sample fed to the
//! interest scheduler.

mod serialization;

pub use serialization::{MessageReader, MessageWriter};

use crate::error::{SyncError, SyncResult};
use bytemuck::{Pod, Zeroable};
use driftline_core::{EntityId, EntityKind};
use driftline_shared::{InputRecord, NetSnapshot, MESSAGE_HEADER_SIZE};

/// Which channel a message travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Unordered, may be lost or duplicated. Snapshots and inputs.
    Unreliable,
    /// Sequenced and delivered. Acks, wake/dormant notices, ping/pong.
    Reliable,
}

/// Message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Owner → authority control input.
    Input = 0x01,
    /// Authority → viewer entity state.
    Snapshot = 0x02,
    /// Authority → owner input acknowledgment.
    Ack = 0x03,
    /// Entity became relevant to the viewer.
    Wake = 0x04,
    /// Entity is no longer replicated to the viewer.
    Dormant = 0x05,
    /// RTT probe.
    Ping = 0x06,
    /// RTT probe reply.
    Pong = 0x07,
}

impl MessageTag {
    /// Payload length following the header.
    #[must_use]
    pub const fn payload_size(self) -> usize {
        match self {
            Self::Input => InputRecord::SIZE,
            Self::Snapshot => NetSnapshot::SIZE,
            Self::Ack => 2,
            Self::Wake => 1,
            Self::Dormant => 0,
            Self::Ping | Self::Pong => PingPayload::SIZE,
        }
    }

    /// Total encoded length.
    #[must_use]
    pub const fn encoded_size(self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload_size()
    }

    /// Channel this message type uses.
    #[must_use]
    pub const fn delivery(self) -> Delivery {
        match self {
            Self::Input | Self::Snapshot => Delivery::Unreliable,
            Self::Ack | Self::Wake | Self::Dormant | Self::Ping | Self::Pong => Delivery::Reliable,
        }
    }
}

impl TryFrom<u8> for MessageTag {
    type Error = SyncError;

    fn try_from(value: u8) -> SyncResult<Self> {
        Ok(match value {
            0x01 => Self::Input,
            0x02 => Self::Snapshot,
            0x03 => Self::Ack,
            0x04 => Self::Wake,
            0x05 => Self::Dormant,
            0x06 => Self::Ping,
            0x07 => Self::Pong,
            other => return Err(SyncError::UnknownMessageTag(other)),
        })
    }
}

/// Ping/pong payload.
///
/// Size: 16 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PingPayload {
    /// Sender clock when the ping left.
    pub sent_at: f64,
    /// Probe identifier.
    pub nonce: u32,
    /// Padding for alignment.
    pub _padding: u32,
}

impl PingPayload {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Creates a payload.
    #[must_use]
    pub const fn new(nonce: u32, sent_at: f64) -> Self {
        Self {
            sent_at,
            nonce,
            _padding: 0,
        }
    }
}

/// One protocol message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncMessage {
    /// Control input for an owned entity.
    Input {
        /// Controlled entity.
        entity: EntityId,
        /// The input.
        input: InputRecord,
    },
    /// Authoritative state.
    Snapshot {
        /// Replicated entity.
        entity: EntityId,
        /// The snapshot.
        snapshot: NetSnapshot,
    },
    /// Highest input sequence processed.
    Ack {
        /// Controlled entity.
        entity: EntityId,
        /// Acknowledged sequence.
        sequence: u16,
    },
    /// Entity entered the viewer's selection.
    Wake {
        /// Entity.
        entity: EntityId,
        /// Replication class.
        kind: EntityKind,
    },
    /// Entity left the viewer's selection.
    Dormant {
        /// Entity.
        entity: EntityId,
    },
    /// RTT probe.
    Ping(PingPayload),
    /// RTT probe reply.
    Pong(PingPayload),
}

impl SyncMessage {
    /// Tag of this message.
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Input { .. } => MessageTag::Input,
            Self::Snapshot { .. } => MessageTag::Snapshot,
            Self::Ack { .. } => MessageTag::Ack,
            Self::Wake { .. } => MessageTag::Wake,
            Self::Dormant { .. } => MessageTag::Dormant,
            Self::Ping(_) => MessageTag::Ping,
            Self::Pong(_) => MessageTag::Pong,
        }
    }

    /// Entity the message concerns; null for ping/pong.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::Input { entity, .. }
            | Self::Snapshot { entity, .. }
            | Self::Ack { entity, .. }
            | Self::Wake { entity, .. }
            | Self::Dormant { entity } => *entity,
            Self::Ping(_) | Self::Pong(_) => EntityId::NULL,
        }
    }

    /// Channel this message uses.
    #[must_use]
    pub const fn delivery(&self) -> Delivery {
        self.tag().delivery()
    }

    /// Encodes into `writer`, returning the encoded length.
    pub fn encode(&self, writer: &mut MessageWriter) -> SyncResult<usize> {
        writer.reset();
        let tag = self.tag();
        let written = writer.write_u8(tag as u8)
            && writer.write_u64(self.entity().to_bits())
            && match self {
                Self::Input { input, .. } => writer.write_pod(input),
                Self::Snapshot { snapshot, .. } => writer.write_pod(snapshot),
                Self::Ack { sequence, .. } => writer.write_u16(*sequence),
                Self::Wake { kind, .. } => writer.write_u8(*kind as u8),
                Self::Dormant { .. } => true,
                Self::Ping(payload) | Self::Pong(payload) => writer.write_pod(payload),
            };
        if !written {
            return Err(SyncError::MessageTooLarge(tag.encoded_size()));
        }
        Ok(writer.len())
    }

    /// Encodes into a fresh buffer.
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        let mut writer = MessageWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.as_slice().to_vec())
    }

    /// Decodes one datagram.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let mut reader = MessageReader::new(bytes);
        let tag = MessageTag::try_from(reader.read_u8().ok_or(SyncError::EmptyMessage)?)?;
        if bytes.len() != tag.encoded_size() {
            return Err(SyncError::MessageLength {
                tag: tag as u8,
                expected: tag.encoded_size(),
                actual: bytes.len(),
            });
        }

        let truncated = || SyncError::MessageLength {
            tag: tag as u8,
            expected: tag.encoded_size(),
            actual: bytes.len(),
        };
        let entity = EntityId::from_bits(reader.read_u64().ok_or_else(truncated)?);

        let message = match tag {
            MessageTag::Input => Self::Input {
                entity,
                input: reader.read_pod().ok_or_else(truncated)?,
            },
            MessageTag::Snapshot => Self::Snapshot {
                entity,
                snapshot: reader.read_pod().ok_or_else(truncated)?,
            },
            MessageTag::Ack => Self::Ack {
                entity,
                sequence: reader.read_u16().ok_or_else(truncated)?,
            },
            MessageTag::Wake => Self::Wake {
                entity,
                kind: match reader.read_u8().ok_or_else(truncated)? {
                    0 => EntityKind::PlayerShip,
                    _ => EntityKind::AiShip,
                },
            },
            MessageTag::Dormant => Self::Dormant { entity },
            MessageTag::Ping => Self::Ping(reader.read_pod().ok_or_else(truncated)?),
            MessageTag::Pong => Self::Pong(reader.read_pod().ok_or_else(truncated)?),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftline_shared::{BodyState, DVec3, Vec3};

    #[test]
    fn test_snapshot_encoding_size() {
        let snapshot = NetSnapshot::quantize(
            &BodyState::at(Vec3::new(1.0, 2.0, 3.0)),
            DVec3::new(5.0e8, 0.0, 0.0),
            12.5,
            40,
        );
        let message = SyncMessage::Snapshot {
            entity: EntityId::new(3, 1),
            snapshot,
        };
        let bytes = message.to_bytes().expect("fits");
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + NetSnapshot::SIZE);
        assert_eq!(SyncMessage::decode(&bytes).expect("valid"), message);
    }

    #[test]
    fn test_every_tag_decodes() {
        let entity = EntityId::new(9, 4);
        let messages = [
            SyncMessage::Input {
                entity,
                input: InputRecord::new(7, 1.0 / 30.0, [1.0, 0.0, -0.5, 0.0], [0.1, 0.0]),
            },
            SyncMessage::Ack { entity, sequence: 65_535 },
            SyncMessage::Wake { entity, kind: EntityKind::PlayerShip },
            SyncMessage::Dormant { entity },
            SyncMessage::Ping(PingPayload::new(1, 0.5)),
            SyncMessage::Pong(PingPayload::new(1, 0.5)),
        ];
        for message in messages {
            let bytes = message.to_bytes().expect("fits");
            assert_eq!(bytes.len(), message.tag().encoded_size());
            assert_eq!(SyncMessage::decode(&bytes).expect("valid"), message);
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(SyncMessage::decode(&[]), Err(SyncError::EmptyMessage)));
        assert!(matches!(
            SyncMessage::decode(&[0xEE, 0, 0]),
            Err(SyncError::UnknownMessageTag(0xEE))
        ));

        let mut bytes = SyncMessage::Dormant { entity: EntityId::new(1, 0) }
            .to_bytes()
            .expect("fits");
        bytes.push(0);
        assert!(matches!(
            SyncMessage::decode(&bytes),
            Err(SyncError::MessageLength { expected: 9, actual: 10, .. })
        ));
    }

    #[test]
    fn test_delivery_classes() {
        assert_eq!(MessageTag::Snapshot.delivery(), Delivery::Unreliable);
        assert_eq!(MessageTag::Input.delivery(), Delivery::Unreliable);
        assert_eq!(MessageTag::Ack.delivery(), Delivery::Reliable);
        assert_eq!(MessageTag::Wake.delivery(), Delivery::Reliable);
    }
}
