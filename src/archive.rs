use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use rayon::prelude::*;
use tracing::debug;

use crate::consts;
use crate::error::Result;
use crate::file::{parse_file_entry, FileEntries, FileEntry};
use crate::folder::{
    parse_block_entries, parse_folder_entry, FolderEntries, FolderEntry,
};
use crate::string::{decode_name, read_null_terminated_bytes};
use crate::verify::{build_report, verify_folder, VerifyReport};

/// The name of a neighbouring cabinet in a multi-cabinet set, and the disk
/// it is found on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CabinetLink {
    cabinet_name: String,
    disk_name: String,
}

/// The fixed header found at the start of every cabinet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CabinetHeader {
    total_size: u32,
    first_file_offset: u32,
    minor_version: u8,
    major_version: u8,
    num_folders: u16,
    num_files: u16,
    flags: u16,
    set_id: u16,
    set_index: u16,
    folder_reserve_size: u8,
    data_reserve_size: u8,
    reserve_data: Vec<u8>,
    previous: Option<CabinetLink>,
    next: Option<CabinetLink>,
}

/// The parsed tables of a cabinet: its header, folders and files.
///
/// An `Archive` holds no reader and never changes once parsed, so it can be
/// shared freely between threads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Archive {
    header: CabinetHeader,
    folders: Vec<FolderEntry>,
    files: Vec<FileEntry>,
}

impl CabinetLink {
    /// Returns the file name of the linked cabinet.
    pub fn cabinet_name(&self) -> &str {
        &self.cabinet_name
    }

    /// Returns the human-readable name of the disk holding the linked
    /// cabinet.
    pub fn disk_name(&self) -> &str {
        &self.disk_name
    }
}

impl CabinetHeader {
    /// Returns the total size of the cabinet file, in bytes, as declared in
    /// the header.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Returns the `(major, minor)` format version.
    pub fn version(&self) -> (u8, u8) {
        (self.major_version, self.minor_version)
    }

    /// Returns the number of folders declared in the header.
    pub fn num_folders(&self) -> u16 {
        self.num_folders
    }

    /// Returns the number of files declared in the header.
    pub fn num_files(&self) -> u16 {
        self.num_files
    }

    /// Returns the raw header flags.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Returns the cabinet set ID for this cabinet (an arbitrary number used
    /// to group together a set of cabinets).
    pub fn set_id(&self) -> u16 {
        self.set_id
    }

    /// Returns this cabinet's (zero-based) index within its cabinet set.
    pub fn set_index(&self) -> u16 {
        self.set_index
    }

    /// Returns the application-defined reserve data stored in the cabinet
    /// header.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// Returns the number of reserve bytes in each folder entry.
    pub fn folder_reserve_size(&self) -> u8 {
        self.folder_reserve_size
    }

    /// Returns the number of reserve bytes in each data block header.
    pub fn data_reserve_size(&self) -> u8 {
        self.data_reserve_size
    }

    /// Returns the previous cabinet in the set, if the header names one.
    pub fn previous_cabinet(&self) -> Option<&CabinetLink> {
        self.previous.as_ref()
    }

    /// Returns the next cabinet in the set, if the header names one.
    pub fn next_cabinet(&self) -> Option<&CabinetLink> {
        self.next.as_ref()
    }
}

impl Archive {
    /// Parses a cabinet held entirely in memory.
    pub fn parse(bytes: &[u8]) -> Result<Archive> {
        Archive::from_reader(&mut Cursor::new(bytes))
    }

    /// Parses the tables of a cabinet from any seekable source.  Data block
    /// payloads are skipped, not read.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Archive> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let header = parse_header(&mut *reader)?;

        let mut folders = Vec::with_capacity(header.num_folders as usize);
        for _ in 0..header.num_folders {
            let entry = parse_folder_entry(
                &mut *reader,
                header.folder_reserve_size as usize,
            )?;
            folders.push(entry);
        }

        reader.seek(SeekFrom::Start(header.first_file_offset as u64))?;
        let mut files = Vec::with_capacity(header.num_files as usize);
        for _ in 0..header.num_files {
            files.push(parse_file_entry(&mut *reader)?);
        }

        for folder in folders.iter_mut() {
            parse_block_entries(
                reader,
                folder,
                header.data_reserve_size as usize,
                stream_len,
            )?;
        }

        for file in files.iter() {
            if file.is_continued() {
                continue;
            }
            let folder_index = file.folder_index as usize;
            let folder = match folders.get(folder_index) {
                Some(folder) => folder,
                None => format_error!(
                    "File {:?} refers to folder {}, but the cabinet has only \
                     {} folders",
                    file.name(),
                    folder_index,
                    folders.len()
                ),
            };
            let end = match file
                .uncompressed_offset
                .checked_add(file.uncompressed_size())
            {
                Some(end) => end as u64,
                None => {
                    format_error!("File {:?} offset and size overflow", file.name())
                }
            };
            if end > folder.uncompressed_size() {
                format_error!(
                    "File {:?} ends at byte {} of folder {}, which holds only \
                     {} bytes",
                    file.name(),
                    end,
                    folder_index,
                    folder.uncompressed_size()
                );
            }
        }

        debug!(
            folders = folders.len(),
            files = files.len(),
            set_id = header.set_id,
            set_index = header.set_index,
            "parsed cabinet"
        );
        Ok(Archive { header, folders, files })
    }

    /// Returns the cabinet header.
    pub fn header(&self) -> &CabinetHeader {
        &self.header
    }

    /// Returns an iterator over the folder entries in this cabinet.
    pub fn folder_entries(&self) -> FolderEntries<'_> {
        FolderEntries { iter: self.folders.iter() }
    }

    /// Returns an iterator over the file entries in this cabinet, in the
    /// order they are stored.
    pub fn file_entries(&self) -> FileEntries<'_> {
        FileEntries { iter: self.files.iter() }
    }

    /// Returns the entry for the first file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|file| file.name() == name)
    }

    /// Returns the first file entry matching `predicate`, if any.
    pub fn find_file<P>(&self, mut predicate: P) -> Option<&FileEntry>
    where
        P: FnMut(&FileEntry) -> bool,
    {
        self.files.iter().find(|file| predicate(file))
    }

    /// Returns the file entries whose data is stored in the given folder.
    pub fn files_in_folder(
        &self,
        folder_index: usize,
    ) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(move |file| {
            !file.is_continued() && file.folder_index as usize == folder_index
        })
    }

    /// Decompresses every folder of the in-memory cabinet `bytes` (which must
    /// be the bytes this archive was parsed from), checking every data block
    /// checksum and the decompressed lengths.  Folders are checked in
    /// parallel.
    pub fn verify_bytes(&self, bytes: &[u8]) -> VerifyReport {
        let results: Vec<Result<()>> = self
            .folders
            .par_iter()
            .enumerate()
            .map(|(index, folder)| {
                verify_folder(&mut Cursor::new(bytes), folder, index)
            })
            .collect();
        build_report(&self.files, results)
    }

    pub(crate) fn folders(&self) -> &[FolderEntry] {
        &self.folders
    }

    pub(crate) fn files(&self) -> &[FileEntry] {
        &self.files
    }
}

/// Returns the header if `bytes` begins with a well-formed cabinet header.
pub fn is_cabinet(bytes: &[u8]) -> Option<CabinetHeader> {
    parse_header(Cursor::new(bytes)).ok()
}

fn parse_header<R: Read>(mut reader: R) -> Result<CabinetHeader> {
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != consts::FILE_SIGNATURE {
        format_error!("Not a cabinet file (invalid file signature)");
    }
    let _reserved1 = reader.read_u32::<LittleEndian>()?;
    let total_size = reader.read_u32::<LittleEndian>()?;
    if total_size > consts::MAX_TOTAL_CAB_SIZE {
        format_error!(
            "Cabinet total size field is too large \
             ({} bytes; max is {} bytes)",
            total_size,
            consts::MAX_TOTAL_CAB_SIZE
        );
    }
    let _reserved2 = reader.read_u32::<LittleEndian>()?;
    let first_file_offset = reader.read_u32::<LittleEndian>()?;
    let _reserved3 = reader.read_u32::<LittleEndian>()?;
    let minor_version = reader.read_u8()?;
    let major_version = reader.read_u8()?;
    if major_version > consts::VERSION_MAJOR
        || major_version == consts::VERSION_MAJOR
            && minor_version > consts::VERSION_MINOR
    {
        format_error!(
            "Version {}.{} cabinet files are not supported",
            major_version,
            minor_version
        );
    }
    let num_folders = reader.read_u16::<LittleEndian>()?;
    let num_files = reader.read_u16::<LittleEndian>()?;
    let flags = reader.read_u16::<LittleEndian>()?;
    let set_id = reader.read_u16::<LittleEndian>()?;
    let set_index = reader.read_u16::<LittleEndian>()?;
    let mut header_reserve_size = 0u16;
    let mut folder_reserve_size = 0u8;
    let mut data_reserve_size = 0u8;
    if (flags & consts::FLAG_RESERVE_PRESENT) != 0 {
        header_reserve_size = reader.read_u16::<LittleEndian>()?;
        folder_reserve_size = reader.read_u8()?;
        data_reserve_size = reader.read_u8()?;
    }
    let mut reserve_data = vec![0u8; header_reserve_size as usize];
    if header_reserve_size > 0 {
        reader.read_exact(&mut reserve_data)?;
    }
    let previous = if (flags & consts::FLAG_PREV_CABINET) != 0 {
        Some(read_cabinet_link(&mut reader)?)
    } else {
        None
    };
    let next = if (flags & consts::FLAG_NEXT_CABINET) != 0 {
        Some(read_cabinet_link(&mut reader)?)
    } else {
        None
    };
    Ok(CabinetHeader {
        total_size,
        first_file_offset,
        minor_version,
        major_version,
        num_folders,
        num_files,
        flags,
        set_id,
        set_index,
        folder_reserve_size,
        data_reserve_size,
        reserve_data,
        previous,
        next,
    })
}

fn read_cabinet_link<R: Read>(reader: &mut R) -> Result<CabinetLink> {
    let cabinet_name = read_null_terminated_bytes(&mut *reader)?;
    let disk_name = read_null_terminated_bytes(&mut *reader)?;
    Ok(CabinetLink {
        cabinet_name: decode_name(&cabinet_name, false),
        disk_name: decode_name(&disk_name, false),
    })
}
