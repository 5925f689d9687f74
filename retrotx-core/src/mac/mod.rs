//! D/D2-MAC packet framing.
//!
//! MAC carries its sound and conditional-access data in a duration-
//! multiplexed digital burst at the start of each line. Packets are
//! 751 bits: a Golay-protected header (10-bit address, 2-bit
//! continuity) followed by a 91-byte body. The framer queues packets,
//! serialises them across line bursts as duobinary symbols, and chains
//! continuation packets for payloads longer than one body.

pub mod golay;

use crate::video::{EngineState, LineProcessor, LineRing};
use crate::errors::Result;
use std::collections::VecDeque;

pub use golay::{golay23_encode, golay23_syndrome, golay_encode};

/// Bytes of one packet body.
pub const MAC_PAYLOAD_BYTES: usize = 91;
/// Plain payload bytes per Golay-protected packet body.
pub const ECM_PAYLOAD_BYTES: usize = 30;
/// Bits per packet: 23-bit header + 728-bit body.
pub const MAC_PACKET_BITS: usize = 751;

/// Bits carried in the digital burst of one line.
pub const DMAC_BURST_BITS: usize = 205;
pub const D2MAC_BURST_BITS: usize = 105;

/// One queued MAC packet.
#[derive(Debug, Clone)]
pub struct MacPacket {
    pub address: u16,
    pub continuity: u8,
    pub body: [u8; MAC_PAYLOAD_BYTES],
}

impl MacPacket {
    pub fn new(address: u16, continuity: u8, body: [u8; MAC_PAYLOAD_BYTES]) -> Self {
        Self {
            address: address & 0x3FF,
            continuity: continuity & 3,
            body,
        }
    }

    /// Serialise to the 751-bit wire form.
    fn bits(&self) -> Vec<u8> {
        let mut bits = Vec::with_capacity(MAC_PACKET_BITS);

        let header = (self.address as u32) << 2 | self.continuity as u32;
        let code = golay23_encode(header as u16 & 0xFFF);
        for i in (0..23).rev() {
            bits.push(((code >> i) & 1) as u8);
        }

        for byte in &self.body {
            for b in 0..8 {
                bits.push((byte >> b) & 1);
            }
        }

        bits
    }
}

/// Build a Golay-protected packet body from up to 30 payload bytes:
/// PT byte first, the protected payload after.
pub fn protected_body(pt: u8, payload: &[u8]) -> [u8; MAC_PAYLOAD_BYTES] {
    assert!(payload.len() <= ECM_PAYLOAD_BYTES);
    let mut body = [0u8; MAC_PAYLOAD_BYTES];
    body[0] = pt;
    body[1..1 + payload.len()].copy_from_slice(payload);
    golay_encode(&mut body[1..], ECM_PAYLOAD_BYTES);
    body
}

/// The packet multiplexer and line-burst renderer.
pub struct MacFramer {
    queue: VecDeque<MacPacket>,
    current: Vec<u8>,
    bit: usize,
    burst_bits: usize,
    /// Samples per burst bit at the pixel rate.
    samples_per_bit: f64,
    level: i16,
    /// Duobinary precoder state.
    precode: u8,
    continuity: [u8; 1024],
}

impl MacFramer {
    /// Framer with explicit burst parameters, for tests and offline
    /// packet assembly.
    pub fn with_params(burst_bits: usize, samples_per_bit: f64, level: i16) -> Self {
        Self {
            queue: VecDeque::new(),
            current: Vec::new(),
            bit: 0,
            burst_bits,
            samples_per_bit,
            level,
            precode: 0,
            continuity: [0; 1024],
        }
    }

    pub fn new(state: &EngineState, d2: bool) -> Self {
        let burst_bits = if d2 { D2MAC_BURST_BITS } else { DMAC_BURST_BITS };
        // The burst occupies the first ~10.1 us of the line.
        let burst_samples = state.pixel_rate as f64 * 10.1e-6;

        Self {
            queue: VecDeque::new(),
            current: Vec::new(),
            bit: 0,
            burst_bits,
            samples_per_bit: burst_samples / burst_bits as f64,
            level: ((state.white_level - state.black_level) as f64 * 0.4) as i16,
            precode: 0,
            continuity: [0; 1024],
        }
    }

    /// Queue a packet body on an address. Continuity numbering is
    /// tracked per address.
    pub fn write_packet(&mut self, address: u16, body: [u8; MAC_PAYLOAD_BYTES]) {
        let a = (address & 0x3FF) as usize;
        let packet = MacPacket::new(address, self.continuity[a], body);
        self.continuity[a] = (self.continuity[a] + 1) & 3;
        self.queue.push_back(packet);
    }

    /// Split a long payload across chained packets on one address.
    pub fn write_payload(&mut self, address: u16, pt: u8, payload: &[u8]) {
        for chunk in payload.chunks(ECM_PAYLOAD_BYTES) {
            self.write_packet(address, protected_body(pt, chunk));
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn next_bit(&mut self) -> u8 {
        if self.bit >= self.current.len() {
            // Idle packets fill gaps in the multiplex.
            let packet = self.queue.pop_front().unwrap_or_else(|| {
                MacPacket::new(0x3FF, 0, [0u8; MAC_PAYLOAD_BYTES])
            });
            self.current = packet.bits();
            self.bit = 0;
        }
        let b = self.current[self.bit];
        self.bit += 1;
        b
    }

    /// Render one line's burst as duobinary symbols.
    fn render_burst(&mut self, l: &mut crate::video::Line) {
        for i in 0..self.burst_bits {
            let bit = self.next_bit();
            // Duobinary: precode with XOR, output is the sum of the
            // current and previous precoded symbols (3 levels).
            let coded = bit ^ self.precode;
            let level = (coded as i32 + self.precode as i32 - 1) * self.level as i32;
            self.precode = coded;

            let start = (i as f64 * self.samples_per_bit) as usize;
            let end = (((i + 1) as f64) * self.samples_per_bit) as usize;
            for x in start..end.min(l.width) {
                l.samples[x * 2] = level.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
        }
    }
}

impl LineProcessor for MacFramer {
    fn name(&self) -> &'static str {
        "mac"
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let l = ring.get_mut(0);
        self.render_burst(l);
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_is_751_bits() {
        let p = MacPacket::new(346, 0, [0u8; MAC_PAYLOAD_BYTES]);
        assert_eq!(p.bits().len(), MAC_PACKET_BITS);
    }

    #[test]
    fn header_is_valid_golay() {
        let p = MacPacket::new(347, 2, [0u8; MAC_PAYLOAD_BYTES]);
        let bits = p.bits();
        let mut code = 0u32;
        for &b in &bits[..23] {
            code = (code << 1) | b as u32;
        }
        assert_eq!(golay23_syndrome(code), 0);
        assert_eq!(code >> 11, (347 << 2) | 2);
    }

    #[test]
    fn continuity_counts_per_address() {
        let mut f = MacFramer::with_params(DMAC_BURST_BITS, 4.0, 1000);
        f.write_packet(346, [0; MAC_PAYLOAD_BYTES]);
        f.write_packet(346, [0; MAC_PAYLOAD_BYTES]);
        f.write_packet(347, [0; MAC_PAYLOAD_BYTES]);
        let c: Vec<u8> = f.queue.iter().map(|p| p.continuity).collect();
        assert_eq!(c, vec![0, 1, 0]);
    }

    #[test]
    fn long_payload_chains_packets() {
        let mut f = MacFramer::with_params(DMAC_BURST_BITS, 4.0, 1000);
        f.write_payload(346, 0x00, &[0x11u8; 45]);
        assert_eq!(f.queued(), 2);
    }

    #[test]
    fn protected_body_roundtrips_payload() {
        let body = protected_body(0x00, &[0x42u8; 30]);
        assert_eq!(body[0], 0x00);
        assert_eq!(&body[1..31], &[0x42u8; 30]);
    }
}
