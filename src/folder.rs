use std::io::{self, Read, Seek, SeekFrom};
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, trace, warn};

use crate::checksum::data_block_checksum;
use crate::consts;
use crate::ctype::{CompressionType, Decompressor};
use crate::error::Result;

/// An iterator over the folder entries in a cabinet.
#[derive(Clone)]
pub struct FolderEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FolderEntry>,
}

/// Metadata about one folder in a cabinet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FolderEntry {
    first_data_block_offset: u32,
    num_data_blocks: u16,
    compression_type: CompressionType,
    reserve_data: Vec<u8>,
    pub(crate) data_blocks: Vec<DataBlockEntry>,
}

/// Metadata about one data block of a folder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataBlockEntry {
    checksum: u32,
    compressed_size: u16,
    uncompressed_size: u16,
    reserve_data: Vec<u8>,
    data_offset: u64,
    cumulative_size: u64,
}

/// A reader over the decompressed data of one cabinet folder.
///
/// Blocks are decoded strictly in order and only the current one is held in
/// memory.  Seeking backwards past the start of the current block restarts
/// decoding from the first block.
pub struct FolderReader<'a, R> {
    reader: &'a mut R,
    entry: &'a FolderEntry,
    index: usize,
    decompressor: Decompressor,
    current_block_index: usize,
    current_block_data: Vec<u8>,
    current_offset_within_block: usize,
    current_offset_within_folder: u64,
}

impl<'a> Iterator for FolderEntries<'a> {
    type Item = &'a FolderEntry;

    fn next(&mut self) -> Option<&'a FolderEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FolderEntries<'a> {}

impl FolderEntry {
    /// Returns the scheme used to compress this folder's data.
    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Returns the number of data blocks used to store this folder's data.
    pub fn num_data_blocks(&self) -> u16 {
        self.num_data_blocks
    }

    /// Returns the offset within the cabinet of this folder's first data
    /// block.
    pub fn first_data_block_offset(&self) -> u32 {
        self.first_data_block_offset
    }

    /// Returns the application-defined reserve data for this folder.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// Returns the headers of this folder's data blocks, in order.
    pub fn data_blocks(&self) -> &[DataBlockEntry] {
        &self.data_blocks
    }

    /// Returns the total size of this folder's data when decompressed.
    pub fn uncompressed_size(&self) -> u64 {
        self.data_blocks.last().map_or(0, |block| block.cumulative_size)
    }
}

impl DataBlockEntry {
    /// Returns the stored checksum, or zero if the block has none.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns the size of the block's payload as stored.
    pub fn compressed_size(&self) -> u16 {
        self.compressed_size
    }

    /// Returns the size of the block's data once decompressed.
    pub fn uncompressed_size(&self) -> u16 {
        self.uncompressed_size
    }

    /// Returns the application-defined reserve data for this block.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }
}

impl<'a, R: Read + Seek> FolderReader<'a, R> {
    pub(crate) fn new(
        reader: &'a mut R,
        entry: &'a FolderEntry,
        index: usize,
    ) -> Result<FolderReader<'a, R>> {
        let decompressor = entry.compression_type.into_decompressor()?;
        debug!(
            folder = index,
            compression = ?entry.compression_type,
            blocks = entry.data_blocks.len(),
            "opening folder"
        );
        let mut folder_reader = FolderReader {
            reader,
            entry,
            index,
            decompressor,
            current_block_index: 0,
            current_block_data: Vec::new(),
            current_offset_within_block: 0,
            current_offset_within_folder: 0,
        };
        folder_reader.load_block()?;
        Ok(folder_reader)
    }

    /// Returns the total size of the folder's decompressed data.
    pub fn total_size(&self) -> u64 {
        self.entry.uncompressed_size()
    }

    /// Reads `length` bytes of decompressed data starting at `offset`.
    pub fn read_range(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let end = offset.checked_add(length as u64);
        if end.map_or(true, |end| end > self.total_size()) {
            invalid_input!(
                "Range of {} bytes at {} is outside the folder's {} bytes",
                length,
                offset,
                self.total_size()
            );
        }
        self.seek_to(offset)?;
        let mut data = vec![0u8; length];
        self.read_exact(&mut data)?;
        Ok(data)
    }

    fn current_block_start(&self) -> u64 {
        if self.current_block_index == 0 {
            0
        } else {
            self.entry.data_blocks[self.current_block_index - 1].cumulative_size
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.current_offset_within_block = 0;
        self.current_offset_within_folder = 0;
        if self.current_block_index != 0 {
            self.decompressor.reset();
            self.current_block_index = 0;
            self.load_block()?;
        }
        Ok(())
    }

    fn load_block(&mut self) -> Result<()> {
        let entry = self.entry;
        let block = match entry.data_blocks.get(self.current_block_index) {
            Some(block) => block,
            None => {
                self.current_block_data = Vec::new();
                return Ok(());
            }
        };
        if block.uncompressed_size == 0 {
            unsupported!(
                "Data block {} of folder {} continues into the next cabinet",
                self.current_block_index,
                self.index
            );
        }
        self.reader.seek(SeekFrom::Start(block.data_offset))?;
        let mut compressed_data = vec![0u8; block.compressed_size as usize];
        self.reader.read_exact(&mut compressed_data)?;
        if block.checksum != 0 {
            let actual_checksum = data_block_checksum(
                &block.reserve_data,
                &compressed_data,
                block.compressed_size,
                block.uncompressed_size,
            );
            if actual_checksum != block.checksum {
                warn!(
                    folder = self.index,
                    block = self.current_block_index,
                    expected = block.checksum,
                    actual = actual_checksum,
                    "data block checksum mismatch"
                );
                corrupt_data!(
                    "Checksum error in data block {} of folder {} \
                     (expected {:08x}, actual {:08x})",
                    self.current_block_index,
                    self.index,
                    block.checksum,
                    actual_checksum
                );
            }
        }
        self.current_block_data = self
            .decompressor
            .decompress(compressed_data, block.uncompressed_size as usize)?;
        trace!(
            folder = self.index,
            block = self.current_block_index,
            compressed = block.compressed_size,
            uncompressed = block.uncompressed_size,
            "decoded data block"
        );
        Ok(())
    }

    pub(crate) fn seek_to(&mut self, new_offset: u64) -> Result<()> {
        if new_offset < self.current_block_start() {
            self.rewind()?;
        }
        // After the last block has been read, the index sits one past the
        // end and the only reachable offset is the folder's end.
        while let Some(block) =
            self.entry.data_blocks.get(self.current_block_index)
        {
            if block.cumulative_size >= new_offset {
                break;
            }
            self.current_block_index += 1;
            self.load_block()?;
        }
        debug_assert!(new_offset >= self.current_block_start());
        self.current_offset_within_block =
            (new_offset - self.current_block_start()) as usize;
        self.current_offset_within_folder = new_offset;
        Ok(())
    }
}

impl<'a, R: Read + Seek> Read for FolderReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty()
            || self.current_block_index >= self.entry.data_blocks.len()
        {
            return Ok(0);
        }
        if self.current_offset_within_block == self.current_block_data.len() {
            self.current_block_index += 1;
            self.current_offset_within_block = 0;
            self.load_block()?;
        }
        let max_bytes = buf.len().min(
            self.current_block_data.len() - self.current_offset_within_block,
        );
        buf[..max_bytes].copy_from_slice(
            &self.current_block_data[self.current_offset_within_block..]
                [..max_bytes],
        );
        self.current_offset_within_block += max_bytes;
        self.current_offset_within_folder += max_bytes as u64;
        Ok(max_bytes)
    }
}

impl<'a, R: Read + Seek> Seek for FolderReader<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let total_size = self.total_size();
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => {
                self.current_offset_within_folder as i64 + delta
            }
            SeekFrom::End(delta) => total_size as i64 + delta,
        };
        if new_offset < 0 || (new_offset as u64) > total_size {
            invalid_input!(
                "Cannot seek to {}, data length is {}",
                new_offset,
                total_size
            );
        }
        self.seek_to(new_offset as u64)?;
        Ok(new_offset as u64)
    }
}

pub(crate) fn parse_folder_entry<R: Read>(
    mut reader: R,
    reserve_size: usize,
) -> Result<FolderEntry> {
    let first_data_offset = reader.read_u32::<LittleEndian>()?;
    let num_data_blocks = reader.read_u16::<LittleEndian>()?;
    let compression_bits = reader.read_u16::<LittleEndian>()?;
    let compression_type = CompressionType::from_bitfield(compression_bits)?;
    let mut folder_reserve_data = vec![0u8; reserve_size];
    if reserve_size > 0 {
        reader.read_exact(&mut folder_reserve_data)?;
    }
    Ok(FolderEntry {
        first_data_block_offset: first_data_offset,
        num_data_blocks,
        compression_type,
        reserve_data: folder_reserve_data,
        data_blocks: Vec::new(),
    })
}

/// Reads the chain of data block headers for `entry`, skipping over each
/// block's payload.
pub(crate) fn parse_block_entries<R: Read + Seek>(
    reader: &mut R,
    entry: &mut FolderEntry,
    data_reserve_size: usize,
    stream_len: u64,
) -> Result<()> {
    reader.seek(SeekFrom::Start(entry.first_data_block_offset as u64))?;
    let mut cumulative_size = 0;
    let mut data_blocks = Vec::with_capacity(entry.num_data_blocks as usize);
    for _ in 0..entry.num_data_blocks {
        let block = parse_block_entry(
            &mut *reader,
            cumulative_size,
            data_reserve_size,
            stream_len,
        )?;
        cumulative_size = block.cumulative_size;
        data_blocks.push(block);
    }
    entry.data_blocks = data_blocks;
    Ok(())
}

pub(crate) fn parse_block_entry<R: Read + Seek>(
    mut reader: R,
    cumulative_size: u64,
    data_reserve_size: usize,
    stream_len: u64,
) -> Result<DataBlockEntry> {
    let checksum = reader.read_u32::<LittleEndian>()?;
    let compressed_size = reader.read_u16::<LittleEndian>()?;
    let uncompressed_size = reader.read_u16::<LittleEndian>()?;
    if uncompressed_size > consts::MAX_BLOCK_UNCOMPRESSED_SIZE {
        format_error!(
            "Data block uncompressed size {} is larger than the maximum of {}",
            uncompressed_size,
            consts::MAX_BLOCK_UNCOMPRESSED_SIZE
        );
    }
    let mut reserve_data = vec![0u8; data_reserve_size];
    reader.read_exact(&mut reserve_data)?;
    let data_offset = reader.stream_position()?;
    if data_offset + compressed_size as u64 > stream_len {
        format_error!(
            "Data block payload of {} bytes at offset {} runs past the end \
             of the cabinet",
            compressed_size,
            data_offset
        );
    }
    reader.seek(SeekFrom::Current(compressed_size as i64))?;
    Ok(DataBlockEntry {
        checksum,
        compressed_size,
        uncompressed_size,
        reserve_data,
        data_offset,
        cumulative_size: cumulative_size + uncompressed_size as u64,
    })
}
