use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;

// Reading a little past the end of the input yields zero bits, since an
// encoder may stop emitting bits partway through the final word.
const MAX_OVERRUN_BYTES: usize = 16;

/// Reads a bitstream made of 16-bit little-endian words, each consumed from
/// its most significant bit down.  This is the bit order used by LZX.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    buffer: u32,
    bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader { data, pos: 0, buffer: 0, bits: 0 }
    }

    fn refill(&mut self) -> Result<()> {
        debug_assert!(self.bits <= 16);
        if self.pos >= self.data.len() + MAX_OVERRUN_BYTES {
            corrupt_data!("LZX bitstream ran past the end of its data block");
        }
        let word = if self.pos + 2 <= self.data.len() {
            LittleEndian::read_u16(&self.data[self.pos..])
        } else if self.pos < self.data.len() {
            self.data[self.pos] as u16
        } else {
            0
        };
        self.buffer |= (word as u32) << (16 - self.bits);
        self.bits += 16;
        self.pos += 2;
        Ok(())
    }

    /// Reads `count` bits (at most 17) as a big-endian unsigned value.
    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        debug_assert!(count <= 17);
        if count == 0 {
            return Ok(0);
        }
        while self.bits < count {
            self.refill()?;
        }
        let value = self.buffer >> (32 - count);
        self.buffer <<= count;
        self.bits -= count;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Discards the rest of the current 16-bit word.  When the stream is
    /// already word-aligned, a whole word of padding is skipped instead, so
    /// this always consumes between 1 and 16 bits.
    pub fn align(&mut self) -> Result<()> {
        if self.bits < 16 {
            self.refill()?;
        }
        if self.bits > 16 {
            self.pos -= 2;
        }
        self.buffer = 0;
        self.bits = 0;
        Ok(())
    }

    /// Takes `count` raw bytes.  Must only be called on an aligned stream.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.bits, 0);
        let end = self.pos + count;
        if end > self.data.len() {
            corrupt_data!(
                "LZX uncompressed block needs {} more bytes than its data \
                 block holds",
                end - self.data.len().max(self.pos)
            );
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// Skips the pad byte that follows an odd-length uncompressed block, if
    /// it is present in this chunk.
    pub fn skip_pad_byte(&mut self) {
        debug_assert_eq!(self.bits, 0);
        if self.pos < self.data.len() {
            self.pos += 1;
        }
    }
}
