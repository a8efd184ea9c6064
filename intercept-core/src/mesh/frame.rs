//! Meshtastic serial stream framing.
//!
//! The device wraps each `FromRadio` protobuf in a 4-byte header:
//! `0x94 0xC3 <len_hi> <len_lo>`. Anything between frames is debug
//! console output and is discarded byte-by-byte while hunting for the
//! next magic pair.

/// Maximum payload length the protocol allows per frame.
pub const MAX_FRAME_LEN: usize = 512;

const START1: u8 = 0x94;
const START2: u8 = 0xc3;

/// Incremental frame extractor over an arbitrary byte stream.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        FrameAccumulator { buffer: Vec::new() }
    }

    /// Feed received bytes; returns every complete frame payload found.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            // Hunt for the start-of-frame magic.
            let Some(start) = self
                .buffer
                .windows(2)
                .position(|w| w[0] == START1 && w[1] == START2)
            else {
                // Keep a trailing 0x94 in case its partner is en route.
                if self.buffer.last() == Some(&START1) {
                    let last = self.buffer.len() - 1;
                    self.buffer.drain(..last);
                } else {
                    self.buffer.clear();
                }
                return frames;
            };
            self.buffer.drain(..start);

            if self.buffer.len() < 4 {
                return frames;
            }
            let len = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
            if len > MAX_FRAME_LEN {
                // Corrupt header; skip the magic and rescan.
                self.buffer.drain(..2);
                continue;
            }
            if self.buffer.len() < 4 + len {
                return frames;
            }
            frames.push(self.buffer[4..4 + len].to_vec());
            self.buffer.drain(..4 + len);
        }
    }

    /// Wrap a payload for transmission to the device.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(START1);
        out.push(START2);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let payload = b"hello mesh".to_vec();
        let wire = FrameAccumulator::encode(&payload);
        let mut acc = FrameAccumulator::new();
        let frames = acc.feed(&wire);
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn split_delivery_reassembles() {
        let wire = FrameAccumulator::encode(b"split me");
        let mut acc = FrameAccumulator::new();
        assert!(acc.feed(&wire[..3]).is_empty());
        assert!(acc.feed(&wire[3..7]).is_empty());
        let frames = acc.feed(&wire[7..]);
        assert_eq!(frames, vec![b"split me".to_vec()]);
    }

    #[test]
    fn debug_console_noise_is_skipped() {
        let mut stream = b"INFO: boot ok\r\n".to_vec();
        stream.extend(FrameAccumulator::encode(b"frame1"));
        stream.extend(b"garbage");
        stream.extend(FrameAccumulator::encode(b"frame2"));
        let mut acc = FrameAccumulator::new();
        let frames = acc.feed(&stream);
        assert_eq!(frames, vec![b"frame1".to_vec(), b"frame2".to_vec()]);
    }

    #[test]
    fn oversized_length_resyncs() {
        let mut stream = vec![START1, START2, 0xff, 0xff];
        stream.extend(FrameAccumulator::encode(b"good"));
        let mut acc = FrameAccumulator::new();
        let frames = acc.feed(&stream);
        assert_eq!(frames, vec![b"good".to_vec()]);
    }

    #[test]
    fn trailing_start_byte_is_retained() {
        let mut acc = FrameAccumulator::new();
        assert!(acc.feed(&[0x00, 0x01, START1]).is_empty());
        let mut rest = vec![START2, 0x00, 0x02];
        rest.extend(b"ok");
        let frames = acc.feed(&rest);
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut wire = FrameAccumulator::encode(b"a");
        wire.extend(FrameAccumulator::encode(b"bb"));
        wire.extend(FrameAccumulator::encode(b"ccc"));
        let mut acc = FrameAccumulator::new();
        let frames = acc.feed(&wire);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], b"ccc".to_vec());
    }
}
