#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{Compress, Compression, FlushCompress};
use time::PrimitiveDateTime;

// ========================================================================= //

const MAX_BLOCK_SIZE: usize = 0x8000;
const HEADER_FIXED_SIZE: usize = 36;
const FLAG_RESERVE_PRESENT: u16 = 0x4;
const LZX_WINDOW_BITS: u16 = 16;

/// How a test folder's data blocks are stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Codec {
    Store,
    MsZip,
    /// LZX with a 64 KiB window, written as one uncompressed LZX block per
    /// data block.
    Lzx,
}

pub struct FileImage {
    name: String,
    data: Vec<u8>,
    attributes: u16,
    date: u16,
    time: u16,
}

pub struct FolderImage {
    codec: Codec,
    files: Vec<FileImage>,
}

/// Writes small cabinets in memory, laid out the way makecab lays them out:
/// header, folder table, file table, then each folder's data blocks.
pub struct CabinetImage {
    folders: Vec<FolderImage>,
    set_id: u16,
    header_reserve: Vec<u8>,
    folder_reserve_size: u8,
    data_reserve_size: u8,
    checksums: bool,
}

/// Where things landed in a built cabinet.
pub struct Layout {
    pub first_file_offset: usize,
    pub folder_offsets: Vec<usize>,
    /// The offset of each data block's payload, per folder.
    pub payload_offsets: Vec<Vec<usize>>,
}

impl FileImage {
    pub fn set_datetime(&mut self, datetime: PrimitiveDateTime) -> &mut Self {
        let (date, time) = fat_bits(datetime);
        self.date = date;
        self.time = time;
        self
    }

    pub fn set_attributes(&mut self, attributes: u16) -> &mut Self {
        self.attributes = attributes;
        self
    }
}

impl FolderImage {
    pub fn add_file<N: Into<String>, D: Into<Vec<u8>>>(
        &mut self,
        name: N,
        data: D,
    ) -> &mut FileImage {
        self.files.push(FileImage {
            name: name.into(),
            data: data.into(),
            attributes: 0x20,
            date: 0x226c,
            time: 0x59ba,
        });
        self.files.last_mut().unwrap()
    }
}

impl CabinetImage {
    pub fn new() -> CabinetImage {
        CabinetImage {
            folders: Vec::new(),
            set_id: 0x1234,
            header_reserve: Vec::new(),
            folder_reserve_size: 0,
            data_reserve_size: 0,
            checksums: true,
        }
    }

    pub fn add_folder(&mut self, codec: Codec) -> &mut FolderImage {
        self.folders.push(FolderImage { codec, files: Vec::new() });
        self.folders.last_mut().unwrap()
    }

    pub fn set_reserve(
        &mut self,
        header_reserve: Vec<u8>,
        folder_reserve_size: u8,
        data_reserve_size: u8,
    ) -> &mut Self {
        self.header_reserve = header_reserve;
        self.folder_reserve_size = folder_reserve_size;
        self.data_reserve_size = data_reserve_size;
        self
    }

    pub fn set_checksums(&mut self, checksums: bool) -> &mut Self {
        self.checksums = checksums;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, Layout) {
        let has_reserve = !self.header_reserve.is_empty()
            || self.folder_reserve_size > 0
            || self.data_reserve_size > 0;
        let mut header_size = HEADER_FIXED_SIZE;
        if has_reserve {
            header_size += 4 + self.header_reserve.len();
        }
        let folder_entry_size = 8 + self.folder_reserve_size as usize;
        let first_file_offset =
            header_size + self.folders.len() * folder_entry_size;
        let files_size: usize = self
            .folders
            .iter()
            .flat_map(|folder| folder.files.iter())
            .map(|file| 17 + file.name.len())
            .sum();
        let num_files =
            self.folders.iter().map(|folder| folder.files.len()).sum::<usize>();

        // Encode every folder's blocks up front so offsets are known.
        let mut data_section = Vec::new();
        let mut folder_blocks = Vec::new();
        let mut payload_offsets = Vec::new();
        let data_start = first_file_offset + files_size;
        for folder in self.folders.iter() {
            let first_block = data_start + data_section.len();
            let contents: Vec<u8> = folder
                .files
                .iter()
                .flat_map(|file| file.data.iter().copied())
                .collect();
            let blocks = encode_blocks(folder.codec, &contents);
            let mut offsets = Vec::new();
            for (uncompressed_size, payload) in blocks.iter() {
                let reserve = vec![0xa5u8; self.data_reserve_size as usize];
                let checksum = if self.checksums {
                    let mut covered = reserve.clone();
                    covered.extend_from_slice(payload);
                    checksum(&covered)
                        ^ (payload.len() as u32
                            | ((*uncompressed_size as u32) << 16))
                } else {
                    0
                };
                data_section.write_u32::<LittleEndian>(checksum).unwrap();
                data_section
                    .write_u16::<LittleEndian>(payload.len() as u16)
                    .unwrap();
                data_section
                    .write_u16::<LittleEndian>(*uncompressed_size as u16)
                    .unwrap();
                data_section.extend_from_slice(&reserve);
                offsets.push(data_start + data_section.len());
                data_section.extend_from_slice(payload);
            }
            folder_blocks.push((first_block, blocks.len()));
            payload_offsets.push(offsets);
        }

        let total_size = data_start + data_section.len();
        let mut out = Vec::with_capacity(total_size);
        out.extend_from_slice(b"MSCF");
        out.write_u32::<LittleEndian>(0).unwrap(); // reserved1
        out.write_u32::<LittleEndian>(total_size as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // reserved2
        out.write_u32::<LittleEndian>(first_file_offset as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // reserved3
        out.write_u8(3).unwrap();
        out.write_u8(1).unwrap();
        out.write_u16::<LittleEndian>(self.folders.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(num_files as u16).unwrap();
        let flags = if has_reserve { FLAG_RESERVE_PRESENT } else { 0 };
        out.write_u16::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(self.set_id).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // set index
        if has_reserve {
            out.write_u16::<LittleEndian>(self.header_reserve.len() as u16)
                .unwrap();
            out.write_u8(self.folder_reserve_size).unwrap();
            out.write_u8(self.data_reserve_size).unwrap();
            out.extend_from_slice(&self.header_reserve);
        }

        let mut folder_offsets = Vec::new();
        for (folder, (first_block, num_blocks)) in
            self.folders.iter().zip(folder_blocks.iter())
        {
            folder_offsets.push(out.len());
            out.write_u32::<LittleEndian>(*first_block as u32).unwrap();
            out.write_u16::<LittleEndian>(*num_blocks as u16).unwrap();
            let ctype = match folder.codec {
                Codec::Store => 0,
                Codec::MsZip => 1,
                Codec::Lzx => 3 | (LZX_WINDOW_BITS << 8),
            };
            out.write_u16::<LittleEndian>(ctype).unwrap();
            out.extend(vec![0x5au8; self.folder_reserve_size as usize]);
        }

        assert_eq!(out.len(), first_file_offset);
        for (folder_index, folder) in self.folders.iter().enumerate() {
            let mut offset = 0u32;
            for file in folder.files.iter() {
                out.write_u32::<LittleEndian>(file.data.len() as u32).unwrap();
                out.write_u32::<LittleEndian>(offset).unwrap();
                out.write_u16::<LittleEndian>(folder_index as u16).unwrap();
                out.write_u16::<LittleEndian>(file.date).unwrap();
                out.write_u16::<LittleEndian>(file.time).unwrap();
                out.write_u16::<LittleEndian>(file.attributes).unwrap();
                out.extend_from_slice(file.name.as_bytes());
                out.push(0);
                offset += file.data.len() as u32;
            }
        }

        assert_eq!(out.len(), data_start);
        out.extend_from_slice(&data_section);
        let layout = Layout { first_file_offset, folder_offsets, payload_offsets };
        (out, layout)
    }
}

// ========================================================================= //

fn encode_blocks(codec: Codec, mut data: &[u8]) -> Vec<(usize, Vec<u8>)> {
    let mut compressor = Compress::new(Compression::best(), false);
    let mut blocks = Vec::new();
    while !data.is_empty() {
        let len = data.len().min(MAX_BLOCK_SIZE);
        let (chunk, rest) = data.split_at(len);
        let payload = match codec {
            Codec::Store => chunk.to_vec(),
            Codec::MsZip => {
                let is_last = rest.is_empty();
                let mut out = Vec::with_capacity(0xffff);
                out.extend_from_slice(b"CK");
                let flush = if is_last {
                    FlushCompress::Finish
                } else {
                    FlushCompress::Sync
                };
                compressor.compress_vec(chunk, &mut out, flush).unwrap();
                if !is_last {
                    out.extend_from_slice(&[0x03, 0x00]);
                }
                out
            }
            Codec::Lzx => lzx_uncompressed_block(chunk, blocks.is_empty()),
        };
        blocks.push((chunk.len(), payload));
        data = rest;
    }
    blocks
}

/// Wraps `chunk` in an uncompressed LZX block.  The first block of a folder
/// also carries the (disabled) E8 translation header.
fn lzx_uncompressed_block(chunk: &[u8], first: bool) -> Vec<u8> {
    let mut fields = Vec::new();
    if first {
        fields.push((0u32, 1u32));
    }
    let len = chunk.len() as u32;
    fields.extend_from_slice(&[(3, 3), (len >> 8, 16), (len & 0xff, 8)]);
    let mut word = 0u32;
    let mut num_bits = 0;
    for (value, count) in fields {
        word = (word << count) | value;
        num_bits += count;
    }
    // Pad the header out to two whole 16-bit words.
    word <<= 32 - num_bits;
    let mut out = Vec::with_capacity(chunk.len() + 17);
    out.extend_from_slice(&((word >> 16) as u16).to_le_bytes());
    out.extend_from_slice(&(word as u16).to_le_bytes());
    for _ in 0..3 {
        out.write_u32::<LittleEndian>(1).unwrap();
    }
    out.extend_from_slice(chunk);
    if chunk.len() % 2 == 1 {
        out.push(0);
    }
    out
}

pub fn checksum(data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(4);
    let mut value = 0u32;
    for word in words.by_ref() {
        value ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let mut tail = 0u32;
    for &byte in words.remainder() {
        tail = (tail << 8) | byte as u32;
    }
    value ^ tail
}

pub fn fat_bits(datetime: PrimitiveDateTime) -> (u16, u16) {
    let date = (((datetime.year() - 1980) as u16) << 9)
        | ((u8::from(datetime.month()) as u16) << 5)
        | datetime.day() as u16;
    let time = ((datetime.hour() as u16) << 11)
        | ((datetime.minute() as u16) << 5)
        | (datetime.second() as u16 / 2);
    (date, time)
}

// ========================================================================= //
