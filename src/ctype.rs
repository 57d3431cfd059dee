use crate::error::Result;
use crate::lzx::{LzxDecompressor, MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use crate::mszip::MsZipDecompressor;

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;
const CTYPE_QUANTUM: u16 = 2;
const CTYPE_LZX: u16 = 3;

const QUANTUM_LEVEL_MIN: u16 = 1;
const QUANTUM_LEVEL_MAX: u16 = 7;
const QUANTUM_MEMORY_MIN: u16 = 10;
const QUANTUM_MEMORY_MAX: u16 = 21;

/// A scheme for compressing data within the cabinet.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression.
    None,
    /// MSZIP compression.  MSZIP is described further in
    /// [MS-MCI](https://msdn.microsoft.com/en-us/library/cc483131.aspx).
    MsZip,
    /// Quantum compression with the given level and memory.  Quantum folders
    /// can be listed but not decompressed.
    Quantum(u16, u16),
    /// LZX compression with a window of `2^n` bytes, where `n` is the given
    /// value (15 to 21).  The LZX compression scheme is described further in
    /// [MS-PATCH](https://msdn.microsoft.com/en-us/library/cc483133.aspx).
    Lzx(u8),
}

impl CompressionType {
    pub(crate) fn from_bitfield(bits: u16) -> Result<CompressionType> {
        match bits & 0x000f {
            CTYPE_NONE => Ok(CompressionType::None),
            CTYPE_MSZIP => Ok(CompressionType::MsZip),
            CTYPE_QUANTUM => {
                let level = (bits & 0x00f0) >> 4;
                if !(QUANTUM_LEVEL_MIN..=QUANTUM_LEVEL_MAX).contains(&level) {
                    format_error!("Invalid Quantum level: 0x{:02x}", level);
                }
                let memory = (bits & 0x1f00) >> 8;
                if !(QUANTUM_MEMORY_MIN..=QUANTUM_MEMORY_MAX).contains(&memory)
                {
                    format_error!("Invalid Quantum memory: 0x{:02x}", memory);
                }
                Ok(CompressionType::Quantum(level, memory))
            }
            CTYPE_LZX => {
                let window = ((bits & 0x1f00) >> 8) as u8;
                if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window) {
                    format_error!("Invalid LZX window: 0x{:02x}", window);
                }
                Ok(CompressionType::Lzx(window))
            }
            _ => format_error!("Invalid compression type: 0x{:04x}", bits),
        }
    }

    pub(crate) fn into_decompressor(self) -> Result<Decompressor> {
        match self {
            CompressionType::None => Ok(Decompressor::Uncompressed),
            CompressionType::MsZip => {
                Ok(Decompressor::MsZip(Box::new(MsZipDecompressor::new())))
            }
            CompressionType::Quantum(_, _) => {
                unsupported!("Quantum decompression is not supported")
            }
            CompressionType::Lzx(window_bits) => Ok(Decompressor::Lzx(
                Box::new(LzxDecompressor::new(window_bits)?),
            )),
        }
    }
}

/// The per-folder codec state.  One instance decodes the blocks of one
/// folder, strictly in order.
pub(crate) enum Decompressor {
    Uncompressed,
    MsZip(Box<MsZipDecompressor>),
    Lzx(Box<LzxDecompressor>),
}

impl Decompressor {
    pub(crate) fn reset(&mut self) {
        match self {
            Decompressor::Uncompressed => {}
            Decompressor::MsZip(decompressor) => decompressor.reset(),
            Decompressor::Lzx(decompressor) => decompressor.reset(),
        }
    }

    pub(crate) fn decompress(
        &mut self,
        data: Vec<u8>,
        uncompressed_size: usize,
    ) -> Result<Vec<u8>> {
        match self {
            Decompressor::Uncompressed => {
                if data.len() != uncompressed_size {
                    corrupt_data!(
                        "Uncompressed data block holds {} bytes but declares \
                         {}",
                        data.len(),
                        uncompressed_size
                    );
                }
                Ok(data)
            }
            Decompressor::MsZip(decompressor) => {
                decompressor.decompress_block(&data, uncompressed_size)
            }
            Decompressor::Lzx(decompressor) => {
                decompressor.decompress_next(&data, uncompressed_size)
            }
        }
    }
}
