use bytes::BytesMut;

/// Byte-stream reassembly of notification fragments. No framing happens here;
/// message boundaries belong to the consumer.
#[derive(Debug, Default)]
pub struct InboundReassembler {
    buffer: BytesMut,
    received_total: u64,
}

impl InboundReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment in arrival order.
    pub fn on_fragment_received(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
        self.received_total += fragment.len() as u64;
    }

    /// Takes up to `max_len` buffered bytes; empty when nothing is buffered.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let len = self.buffer.len().min(max_len);
        self.buffer.split_to(len).to_vec()
    }

    pub fn has_available_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes received since construction, consumed or not.
    pub fn received_total(&self) -> u64 {
        self.received_total
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut inbound = InboundReassembler::new();
        inbound.on_fragment_received(&[1, 2, 3]);
        inbound.on_fragment_received(&[4, 5]);
        assert!(inbound.has_available_data());
        assert_eq!(inbound.read(10), vec![1, 2, 3, 4, 5]);
        assert!(!inbound.has_available_data());
        assert!(inbound.read(10).is_empty());
    }

    #[test]
    fn partial_reads_leave_the_rest_buffered() {
        let mut inbound = InboundReassembler::new();
        inbound.on_fragment_received(b"{\"name\":");
        assert_eq!(inbound.read(3), b"{\"n".to_vec());
        assert_eq!(inbound.read(4), b"ame\"".to_vec());
        assert_eq!(inbound.available(), 1);
        assert_eq!(inbound.read(0), Vec::<u8>::new());
        assert_eq!(inbound.received_total(), 8);
    }

    #[test]
    fn random_partitions_reconstruct_the_stream() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x0de5_1b1e);
        for _ in 0..50 {
            let mut inbound = InboundReassembler::new();
            let mut expected = Vec::new();
            let mut actual = Vec::new();
            for _ in 0..rng.gen_range(1..40) {
                let len = rng.gen_range(0..=20);
                let fragment: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                expected.extend_from_slice(&fragment);
                inbound.on_fragment_received(&fragment);
                if rng.gen_bool(0.3) {
                    actual.extend(inbound.read(rng.gen_range(0..32)));
                }
            }
            while inbound.has_available_data() {
                actual.extend(inbound.read(rng.gen_range(1..32)));
            }
            assert_eq!(actual, expected);
        }
    }
}
