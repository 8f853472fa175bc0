//! Fixed-size packet framing
//!
//! Decoders deliver samples in whatever chunk sizes their codec produces.
//! The packetizer reframes that stream into packets of exactly
//! `packet_size` samples held in a ring of [`PACKET_SLOTS`] slots. Read and
//! write positions are monotonically increasing block counters masked into
//! the ring, so `read_block <= write_block` always holds and FIFO order
//! falls out of the counters. Samples that do not yet fill a packet wait in
//! an overflow tail until the next write completes them.

use thiserror::Error;

/// Number of packet slots in the ring
pub const PACKET_SLOTS: usize = 16;

const SLOT_MASK: u64 = PACKET_SLOTS as u64 - 1;

/// Packet framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketizerError {
    #[error("packet size is not configured")]
    Unconfigured,

    /// Single writes must stay below the ring size; callers chunk larger input
    #[error("write of {len} samples must be smaller than ring capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },

    /// Write would overwrite packets that have not been read yet
    #[error("write of {len} samples exceeds free space {free}")]
    Overrun { len: usize, free: usize },

    #[error("packetizer already finished")]
    Finished,
}

/// Ring of fixed-size packets plus an overflow tail
#[derive(Debug, Default)]
pub struct Packetizer {
    packet_size: usize,
    slots: Vec<f32>,
    read_block: u64,
    write_block: u64,
    overflow: Vec<f32>,
    overflow_len: usize,
    /// Valid samples in the final, zero-padded packet
    final_len: Option<usize>,
    finished: bool,
}

impl Packetizer {
    pub fn new(packet_size: usize) -> Self {
        let mut packetizer = Self::default();
        packetizer.set_packet_size(packet_size);
        packetizer
    }

    /// Configure the packet size and reset counters and overflow
    ///
    /// A size of 0 releases the ring and returns `false`.
    pub fn set_packet_size(&mut self, packet_size: usize) -> bool {
        self.read_block = 0;
        self.write_block = 0;
        self.overflow_len = 0;
        self.final_len = None;
        self.finished = false;

        if packet_size == 0 {
            self.packet_size = 0;
            self.slots = Vec::new();
            self.overflow = Vec::new();
            return false;
        }

        if packet_size != self.packet_size {
            self.packet_size = packet_size;
            self.slots = vec![0.0; packet_size * PACKET_SLOTS];
            self.overflow = vec![0.0; packet_size];
        }
        true
    }

    /// Reset counters keeping the current packet size
    pub fn reset(&mut self) {
        self.set_packet_size(self.packet_size);
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Samples the ring can hold in total
    pub fn ring_capacity(&self) -> usize {
        self.packet_size * PACKET_SLOTS
    }

    /// Samples that can be written without overrunning unread packets
    pub fn free_samples(&self) -> usize {
        let used = (self.write_block - self.read_block) as usize;
        (PACKET_SLOTS - used) * self.packet_size - self.overflow_len
    }

    /// Append raw samples
    ///
    /// Pending overflow is completed first, whole packets go straight into
    /// ring slots, and any shorter remainder becomes the new overflow.
    pub fn write_data(&mut self, samples: &[f32]) -> Result<(), PacketizerError> {
        if self.packet_size == 0 {
            return Err(PacketizerError::Unconfigured);
        }
        if self.finished {
            return Err(PacketizerError::Finished);
        }
        let capacity = self.ring_capacity();
        if samples.len() >= capacity {
            return Err(PacketizerError::TooLarge {
                len: samples.len(),
                capacity,
            });
        }
        let free = self.free_samples();
        if samples.len() > free {
            return Err(PacketizerError::Overrun {
                len: samples.len(),
                free,
            });
        }

        let packet = self.packet_size;
        let mut input = samples;

        if self.overflow_len > 0 {
            let need = packet - self.overflow_len;
            if input.len() < need {
                self.overflow[self.overflow_len..self.overflow_len + input.len()]
                    .copy_from_slice(input);
                self.overflow_len += input.len();
                return Ok(());
            }
            let start = self.slot_offset(self.write_block);
            let held = self.overflow_len;
            self.slots[start..start + held].copy_from_slice(&self.overflow[..held]);
            self.slots[start + held..start + packet].copy_from_slice(&input[..need]);
            self.write_block += 1;
            self.overflow_len = 0;
            input = &input[need..];
        }

        while input.len() >= packet {
            let start = self.slot_offset(self.write_block);
            self.slots[start..start + packet].copy_from_slice(&input[..packet]);
            self.write_block += 1;
            input = &input[packet..];
        }

        if !input.is_empty() {
            self.overflow[..input.len()].copy_from_slice(input);
            self.overflow_len = input.len();
        }
        Ok(())
    }

    /// Mark end of stream
    ///
    /// Pending overflow is flushed into a zero-padded slot and the write
    /// pointer advances once. The valid length of that packet is kept, so a
    /// reader gets back only real samples and no padding is inserted between
    /// tracks. Without pending overflow nothing is padded.
    pub fn finished(&mut self) {
        if self.finished {
            return;
        }
        if self.overflow_len > 0 {
            let start = self.slot_offset(self.write_block);
            let held = self.overflow_len;
            self.slots[start..start + self.packet_size].fill(0.0);
            self.slots[start..start + held].copy_from_slice(&self.overflow[..held]);
            self.write_block += 1;
            self.final_len = Some(held);
            self.overflow_len = 0;
        }
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finished and fully read
    pub fn is_drained(&self) -> bool {
        self.finished && self.read_block == self.write_block
    }

    pub fn is_buffer_available(&self) -> bool {
        self.read_block < self.write_block
    }

    pub fn available_packets(&self) -> usize {
        (self.write_block - self.read_block) as usize
    }

    /// Copy the oldest unread packet into `dst` without consuming it
    ///
    /// Returns the number of samples copied: the packet size, or less for
    /// the final packet of a stream or a short `dst`. Returns 0 when no
    /// packet is available.
    pub fn get_buffer(&self, dst: &mut [f32]) -> usize {
        if !self.is_buffer_available() {
            return 0;
        }
        let valid = match self.final_len {
            Some(len) if self.read_block + 1 == self.write_block => len,
            _ => self.packet_size,
        };
        let count = valid.min(dst.len());
        let start = self.slot_offset(self.read_block);
        dst[..count].copy_from_slice(&self.slots[start..start + count]);
        count
    }

    /// Move the read pointer forward, never past the write pointer
    pub fn advance(&mut self, packets: usize) {
        self.read_block = (self.read_block + packets as u64).min(self.write_block);
    }

    /// Move the read pointer back, never before the oldest retained packet
    pub fn rewind(&mut self, packets: usize) {
        let oldest = self.write_block.saturating_sub(PACKET_SLOTS as u64);
        self.read_block = self
            .read_block
            .saturating_sub(packets as u64)
            .max(oldest);
    }

    fn slot_offset(&self, block: u64) -> usize {
        (block & SLOT_MASK) as usize * self.packet_size
    }
}
