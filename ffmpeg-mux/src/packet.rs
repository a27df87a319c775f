use ffmpeg_next::Rational;

use crate::stream::StreamKind;

/// One encoder output unit, still stamped in its codec time base.
pub struct EncodedPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    kind: StreamKind,
    time_base: Rational,
}

impl EncodedPacket {
    pub fn new(
        packet: ffmpeg_next::codec::packet::Packet,
        kind: StreamKind,
        time_base: Rational,
    ) -> Self {
        Self {
            packet,
            kind,
            time_base,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}
