use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::bits::BitReader;
use crate::error::Result;
use crate::huffman::HuffmanTable;

/// The smallest LZX window a cabinet may declare, as a power of two.
pub const MIN_WINDOW_BITS: u8 = 15;
/// The largest LZX window a cabinet may declare, as a power of two.
pub const MAX_WINDOW_BITS: u8 = 21;

const FRAME_SIZE: usize = 0x8000;
const NUM_CHARS: usize = 256;
const NUM_PRIMARY_LENGTHS: usize = 7;
const MIN_MATCH: usize = 2;
const PRETREE_NUM_ELEMENTS: usize = 20;
const ALIGNED_NUM_ELEMENTS: usize = 8;
const LENGTH_NUM_ELEMENTS: usize = 249;
const MAX_EXTRA_BITS: u32 = 17;

const BLOCKTYPE_VERBATIM: u32 = 1;
const BLOCKTYPE_ALIGNED: u32 = 2;
const BLOCKTYPE_UNCOMPRESSED: u32 = 3;

// E8 translation is only applied within the first 1 GiB of output.
const E8_MAX_FRAMES: u32 = 32768;
const E8_TAIL_BYTES: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockType {
    Verbatim,
    Aligned,
    Uncompressed,
}

/// Decodes the data blocks of one LZX folder.
///
/// Each call to [`decompress_next`](LzxDecompressor::decompress_next) takes
/// the payload of one data block and yields one output frame.  The window,
/// Huffman code lengths, repeated offsets and E8 translation state all carry
/// over from one call to the next, and an LZX block (or a single match) may
/// span several data blocks.
pub struct LzxDecompressor {
    window: Vec<u8>,
    window_posn: usize,
    frame_posn: usize,
    wrapped: bool,
    position_base: Vec<u32>,
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    main_tree: HuffmanTable,
    length_tree: HuffmanTable,
    aligned_tree: HuffmanTable,
    repeated: [u32; 3],
    block_type: BlockType,
    block_length: usize,
    block_remaining: usize,
    header_read: bool,
    intel_started: bool,
    intel_filesize: i32,
    frame: u32,
    output_offset: i64,
}

impl LzxDecompressor {
    /// Creates a decompressor with a window of `2^window_bits` bytes.
    pub fn new(window_bits: u8) -> Result<LzxDecompressor> {
        let position_slots = match window_bits {
            15 => 30,
            16 => 32,
            17 => 34,
            18 => 36,
            19 => 38,
            20 => 42,
            21 => 50,
            _ => format_error!(
                "LZX window of 2^{} bytes is outside the supported range",
                window_bits
            ),
        };
        let mut position_base = Vec::with_capacity(position_slots);
        let mut base = 0u32;
        for slot in 0..position_slots {
            position_base.push(base);
            base += 1 << extra_bits(slot);
        }
        Ok(LzxDecompressor {
            window: vec![0; 1 << window_bits],
            window_posn: 0,
            frame_posn: 0,
            wrapped: false,
            position_base,
            main_lengths: vec![0; NUM_CHARS + position_slots * 8],
            length_lengths: vec![0; LENGTH_NUM_ELEMENTS],
            main_tree: HuffmanTable::default(),
            length_tree: HuffmanTable::default(),
            aligned_tree: HuffmanTable::default(),
            repeated: [1, 1, 1],
            block_type: BlockType::Verbatim,
            block_length: 0,
            block_remaining: 0,
            header_read: false,
            intel_started: false,
            intel_filesize: 0,
            frame: 0,
            output_offset: 0,
        })
    }

    /// Returns to the state at the start of a folder.
    pub fn reset(&mut self) {
        self.window_posn = 0;
        self.frame_posn = 0;
        self.wrapped = false;
        self.main_lengths.fill(0);
        self.length_lengths.fill(0);
        self.main_tree = HuffmanTable::default();
        self.length_tree = HuffmanTable::default();
        self.aligned_tree = HuffmanTable::default();
        self.repeated = [1, 1, 1];
        self.block_type = BlockType::Verbatim;
        self.block_length = 0;
        self.block_remaining = 0;
        self.header_read = false;
        self.intel_started = false;
        self.intel_filesize = 0;
        self.frame = 0;
        self.output_offset = 0;
    }

    /// Decodes the next frame of `out_len` bytes from one data block's
    /// payload.
    pub fn decompress_next(
        &mut self,
        chunk: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>> {
        if out_len > FRAME_SIZE {
            corrupt_data!(
                "LZX frame of {} bytes is larger than the maximum of {}",
                out_len,
                FRAME_SIZE
            );
        }
        let mut bits = BitReader::new(chunk);
        if !self.header_read {
            let mut filesize = 0;
            if bits.read_bit()? == 1 {
                let high = bits.read_bits(16)?;
                let low = bits.read_bits(16)?;
                filesize = (high << 16) | low;
            }
            self.intel_filesize = filesize as i32;
            self.header_read = true;
        }

        if self.frame_posn == self.window.len() {
            self.frame_posn = 0;
            self.window_posn = 0;
            self.wrapped = true;
        }
        let frame_end = self.frame_posn + out_len;
        if frame_end > self.window.len() {
            corrupt_data!("LZX frame runs past the end of the window");
        }

        while self.window_posn < frame_end {
            if self.block_remaining == 0 {
                self.read_block_header(&mut bits)?;
            }
            let run = self.block_remaining.min(frame_end - self.window_posn);
            let written = match self.block_type {
                BlockType::Verbatim | BlockType::Aligned => {
                    self.decode_run(&mut bits, run)?
                }
                BlockType::Uncompressed => self.copy_run(&mut bits, run)?,
            };
            self.block_remaining -= run;
            // The last match of a run may spill into the next frame.
            let overshoot = written - run;
            if overshoot > self.block_remaining {
                corrupt_data!(
                    "LZX match ran {} bytes past the end of its block",
                    overshoot - self.block_remaining
                );
            }
            self.block_remaining -= overshoot;
        }

        let mut out = self.window[self.frame_posn..frame_end].to_vec();
        if self.intel_started
            && self.intel_filesize != 0
            && self.frame < E8_MAX_FRAMES
            && out_len > E8_TAIL_BYTES
        {
            translate_e8(&mut out, self.output_offset, self.intel_filesize);
        }
        self.output_offset += out_len as i64;
        self.frame += 1;
        self.frame_posn = frame_end;
        Ok(out)
    }

    fn read_block_header(&mut self, bits: &mut BitReader) -> Result<()> {
        let kind = bits.read_bits(3)?;
        let high = bits.read_bits(16)?;
        let low = bits.read_bits(8)?;
        let length = ((high << 8) | low) as usize;
        if length == 0 {
            corrupt_data!("LZX block declares no output");
        }
        self.block_type = match kind {
            BLOCKTYPE_VERBATIM => {
                self.read_main_and_length_trees(bits)?;
                BlockType::Verbatim
            }
            BLOCKTYPE_ALIGNED => {
                let mut lengths = [0u8; ALIGNED_NUM_ELEMENTS];
                for length in lengths.iter_mut() {
                    *length = bits.read_bits(3)? as u8;
                }
                self.aligned_tree = HuffmanTable::from_lengths(&lengths)?;
                self.read_main_and_length_trees(bits)?;
                BlockType::Aligned
            }
            BLOCKTYPE_UNCOMPRESSED => {
                self.intel_started = true;
                bits.align()?;
                for offset in self.repeated.iter_mut() {
                    *offset = bits.read_u32_le()?;
                }
                BlockType::Uncompressed
            }
            _ => corrupt_data!("Invalid LZX block type {}", kind),
        };
        trace!(block_type = ?self.block_type, length, "LZX block");
        self.block_length = length;
        self.block_remaining = length;
        Ok(())
    }

    fn read_main_and_length_trees(
        &mut self,
        bits: &mut BitReader,
    ) -> Result<()> {
        read_lengths(bits, &mut self.main_lengths[..NUM_CHARS])?;
        read_lengths(bits, &mut self.main_lengths[NUM_CHARS..])?;
        self.main_tree = HuffmanTable::from_lengths(&self.main_lengths)?;
        if self.main_lengths[0xe8] != 0 {
            self.intel_started = true;
        }
        read_lengths(bits, &mut self.length_lengths)?;
        self.length_tree = HuffmanTable::from_lengths(&self.length_lengths)?;
        Ok(())
    }

    /// Decodes literals and matches until at least `run` bytes are written,
    /// and returns how many were.
    fn decode_run(&mut self, bits: &mut BitReader, run: usize) -> Result<usize> {
        let mut written = 0;
        while written < run {
            let symbol = self.main_tree.decode(bits)? as usize;
            if symbol < NUM_CHARS {
                self.window[self.window_posn] = symbol as u8;
                self.window_posn += 1;
                written += 1;
                continue;
            }
            let symbol = symbol - NUM_CHARS;
            let mut length = symbol & NUM_PRIMARY_LENGTHS;
            if length == NUM_PRIMARY_LENGTHS {
                length += self.length_tree.decode(bits)? as usize;
            }
            length += MIN_MATCH;
            let offset = self.match_offset(bits, symbol >> 3)?;
            self.copy_match(offset as usize, length)?;
            written += length;
        }
        Ok(written)
    }

    fn match_offset(&mut self, bits: &mut BitReader, slot: usize) -> Result<u32> {
        match slot {
            0 => Ok(self.repeated[0]),
            1 => {
                self.repeated.swap(0, 1);
                Ok(self.repeated[0])
            }
            2 => {
                self.repeated.swap(0, 2);
                Ok(self.repeated[0])
            }
            _ => {
                let extra = extra_bits(slot);
                let mut offset = self.position_base[slot] - 2;
                if self.block_type == BlockType::Aligned && extra >= 3 {
                    offset += bits.read_bits(extra - 3)? << 3;
                    offset += self.aligned_tree.decode(bits)? as u32;
                } else {
                    offset += bits.read_bits(extra)?;
                }
                self.repeated = [offset, self.repeated[0], self.repeated[1]];
                Ok(offset)
            }
        }
    }

    fn copy_match(&mut self, offset: usize, length: usize) -> Result<()> {
        let window_size = self.window.len();
        if offset == 0
            || offset > window_size
            || (!self.wrapped && offset > self.window_posn)
        {
            corrupt_data!(
                "LZX match offset {} reaches before the start of the data",
                offset
            );
        }
        if self.window_posn + length > window_size {
            corrupt_data!("LZX match runs past the end of the window");
        }
        let mut source = (self.window_posn + window_size - offset) % window_size;
        for _ in 0..length {
            self.window[self.window_posn] = self.window[source];
            self.window_posn += 1;
            source += 1;
            if source == window_size {
                source = 0;
            }
        }
        Ok(())
    }

    fn copy_run(&mut self, bits: &mut BitReader, run: usize) -> Result<usize> {
        let bytes = bits.read_bytes(run)?;
        self.window[self.window_posn..self.window_posn + run]
            .copy_from_slice(bytes);
        self.window_posn += run;
        if run == self.block_remaining && self.block_length % 2 == 1 {
            bits.skip_pad_byte();
        }
        Ok(run)
    }
}

fn extra_bits(slot: usize) -> u32 {
    if slot < 4 {
        0
    } else {
        (slot as u32 / 2 - 1).min(MAX_EXTRA_BITS)
    }
}

/// Reads pretree-coded updates to a run of Huffman code lengths.  Each
/// length is coded as a delta from its value in the previous block.
fn read_lengths(bits: &mut BitReader, lengths: &mut [u8]) -> Result<()> {
    let mut pretree_lengths = [0u8; PRETREE_NUM_ELEMENTS];
    for length in pretree_lengths.iter_mut() {
        *length = bits.read_bits(4)? as u8;
    }
    let pretree = HuffmanTable::from_lengths(&pretree_lengths)?;

    let mut index = 0;
    while index < lengths.len() {
        match pretree.decode(bits)? {
            17 => {
                let run = 4 + bits.read_bits(4)? as usize;
                fill_lengths(lengths, &mut index, run, 0)?;
            }
            18 => {
                let run = 20 + bits.read_bits(5)? as usize;
                fill_lengths(lengths, &mut index, run, 0)?;
            }
            19 => {
                let run = 4 + bits.read_bit()? as usize;
                let delta = pretree.decode(bits)?;
                if delta > 16 {
                    corrupt_data!("Invalid LZX length delta {}", delta);
                }
                let value = apply_delta(lengths[index], delta);
                fill_lengths(lengths, &mut index, run, value)?;
            }
            delta => {
                lengths[index] = apply_delta(lengths[index], delta);
                index += 1;
            }
        }
    }
    Ok(())
}

fn apply_delta(length: u8, delta: u16) -> u8 {
    ((length as u16 + 17 - delta) % 17) as u8
}

fn fill_lengths(
    lengths: &mut [u8],
    index: &mut usize,
    run: usize,
    value: u8,
) -> Result<()> {
    let end = *index + run;
    if end > lengths.len() {
        corrupt_data!(
            "LZX code length run overflows its table by {}",
            end - lengths.len()
        );
    }
    lengths[*index..end].fill(value);
    *index = end;
    Ok(())
}

/// Undoes the encoder's rewriting of x86 CALL targets from relative to
/// absolute form.  The last few bytes of a frame are never touched.
fn translate_e8(data: &mut [u8], start: i64, filesize: i32) {
    let end = data.len() - E8_TAIL_BYTES;
    let filesize = filesize as i64;
    let mut curpos = start;
    let mut index = 0;
    while index < end {
        if data[index] != 0xe8 {
            index += 1;
            curpos += 1;
            continue;
        }
        let absolute = LittleEndian::read_i32(&data[index + 1..]) as i64;
        if absolute >= -curpos && absolute < filesize {
            let relative = if absolute >= 0 {
                absolute - curpos
            } else {
                absolute + filesize
            };
            LittleEndian::write_i32(&mut data[index + 1..], relative as i32);
        }
        index += 5;
        curpos += 5;
    }
}
