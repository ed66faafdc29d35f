//! Runtime tunables.

use strake_proto::FrameHeader;

/// Per-connection (or per-listener) configuration.
///
/// The defaults suit request/response traffic with packets well under a
/// megabyte. Servers moving packets near the wire cap across small socket
/// reads should raise [`max_fragments_per_packet`](Self::max_fragments_per_packet)
/// accordingly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest packet this endpoint will accept from a peer, in bytes.
    ///
    /// Clamped to the wire cap ([`FrameHeader::MAX_PACKET_SIZE`]) wherever
    /// it is enforced; values above the cap only document intent.
    pub max_packet_size: usize,

    /// Retained capacity of the message free list.
    pub pool_capacity: usize,

    /// Upper bound on partial reads while assembling one packet.
    ///
    /// A peer trickling a packet a few bytes per read holds a 10 MiB
    /// buffer open indefinitely; this budget converts that into a protocol
    /// error.
    pub max_fragments_per_packet: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: 32 * 1024 * 1024,
            pool_capacity: 100,
            max_fragments_per_packet: 100,
        }
    }
}

impl Config {
    /// The packet size limit actually enforced: the configured maximum,
    /// clamped to the wire cap.
    #[must_use]
    pub fn packet_cap(&self) -> usize {
        self.max_packet_size.min(FrameHeader::MAX_PACKET_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cap_clamps_to_wire_limit() {
        let config = Config::default();
        assert_eq!(config.max_packet_size, 32 * 1024 * 1024);
        assert_eq!(config.packet_cap(), FrameHeader::MAX_PACKET_SIZE);
    }

    #[test]
    fn tighter_cap_is_respected() {
        let config = Config { max_packet_size: 4096, ..Config::default() };
        assert_eq!(config.packet_cap(), 4096);
    }
}
