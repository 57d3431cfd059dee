use crate::bits::BitReader;
use crate::error::Result;

pub(crate) const MAX_CODE_LENGTH: usize = 16;

/// A canonical Huffman code, decoded one bit at a time.
///
/// Codes are assigned in order of increasing length, and in order of
/// increasing symbol value within one length.
#[derive(Clone, Debug, Default)]
pub(crate) struct HuffmanTable {
    counts: [u16; MAX_CODE_LENGTH + 1],
    symbols: Vec<u16>,
}

impl HuffmanTable {
    /// Builds a table from per-symbol code lengths, where zero means the
    /// symbol is unused.  A table with no symbols at all is accepted (LZX
    /// emits one for an unused length tree), but decoding from it fails.
    pub fn from_lengths(lengths: &[u8]) -> Result<HuffmanTable> {
        let mut counts = [0u16; MAX_CODE_LENGTH + 1];
        for &length in lengths {
            if length as usize > MAX_CODE_LENGTH {
                corrupt_data!("Huffman code length {} is too long", length);
            }
            counts[length as usize] += 1;
        }
        counts[0] = 0;
        if counts.iter().all(|&count| count == 0) {
            return Ok(HuffmanTable::default());
        }

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left = (left << 1) - count as i32;
            if left < 0 {
                corrupt_data!("Huffman code lengths are oversubscribed");
            }
        }
        if left > 0 {
            corrupt_data!("Huffman code lengths are incomplete");
        }

        let mut offsets = [0usize; MAX_CODE_LENGTH + 2];
        for length in 1..=MAX_CODE_LENGTH {
            offsets[length + 1] = offsets[length] + counts[length] as usize;
        }
        let mut symbols = vec![0u16; offsets[MAX_CODE_LENGTH + 1]];
        for (symbol, &length) in lengths.iter().enumerate() {
            if length != 0 {
                symbols[offsets[length as usize]] = symbol as u16;
                offsets[length as usize] += 1;
            }
        }
        Ok(HuffmanTable { counts, symbols })
    }

    pub fn decode(&self, bits: &mut BitReader) -> Result<u16> {
        if self.symbols.is_empty() {
            corrupt_data!("Read a symbol from an empty Huffman tree");
        }
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for &count in &self.counts[1..] {
            code |= bits.read_bit()? as i32;
            let count = count as i32;
            if code - first < count {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        corrupt_data!("Invalid Huffman code in bitstream")
    }
}

#[cfg(test)]
mod tests {
    use super::HuffmanTable;
    use crate::bits::BitReader;

    #[test]
    fn decodes_canonical_codes() {
        // Lengths a=1, b=2, c=3, d=3 give codes 0, 10, 110, 111.
        let table = HuffmanTable::from_lengths(&[1, 2, 3, 3]).unwrap();
        // Bits: 0 10 110 111 0 10 0000 -> word 0x5ba0, stored little-endian.
        let mut bits = BitReader::new(&[0xa0, 0x5b]);
        let decoded: Vec<u16> =
            (0..6).map(|_| table.decode(&mut bits).unwrap()).collect();
        assert_eq!(decoded, vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn rejects_oversubscribed_lengths() {
        assert!(HuffmanTable::from_lengths(&[1, 1, 1]).is_err());
    }

    #[test]
    fn rejects_incomplete_lengths() {
        assert!(HuffmanTable::from_lengths(&[1, 2, 0]).is_err());
    }

    #[test]
    fn empty_table_builds_but_cannot_decode() {
        let table = HuffmanTable::from_lengths(&[0; 8]).unwrap();
        let mut bits = BitReader::new(&[0xff, 0xff]);
        assert!(table.decode(&mut bits).is_err());
    }

    #[test]
    fn rejects_overlong_lengths() {
        assert!(HuffmanTable::from_lengths(&[17, 1]).is_err());
    }
}
