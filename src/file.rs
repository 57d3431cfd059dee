use std::io::{self, Read, Seek, SeekFrom};
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};
use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::datetime_from_bits;
use crate::error::Result;
use crate::folder::FolderReader;
use crate::string::{decode_name, read_null_terminated_bytes};

/// An iterator over file entries, in the order they appear in the cabinet.
#[derive(Clone)]
pub struct FileEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FileEntry>,
}

/// Metadata about one file stored in a cabinet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    name: String,
    name_bytes: Vec<u8>,
    date: u16,
    time: u16,
    datetime: Option<PrimitiveDateTime>,
    uncompressed_size: u32,
    attributes: u16,
    pub(crate) folder_index: u16,
    pub(crate) uncompressed_offset: u32,
}

/// A reader for reading decompressed data from a cabinet file.
pub struct FileReader<'a, R> {
    pub(crate) reader: FolderReader<'a, R>,
    pub(crate) file_start_in_folder: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl<'a> Iterator for FileEntries<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<&'a FileEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FileEntries<'a> {}

impl FileEntry {
    /// Returns the name of file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name exactly as stored, without decoding.
    pub fn name_bytes(&self) -> &[u8] {
        &self.name_bytes
    }

    /// Returns the datetime for this file.  According to MS-CAB, this "is
    /// typically considered the 'last modified' time in local time, but
    /// the actual definition is application-defined."
    ///
    /// Note that this will return [`None`] if the datetime in the cabinet file
    /// was not a valid date/time.
    pub fn datetime(&self) -> Option<PrimitiveDateTime> {
        self.datetime
    }

    /// Returns the raw FAT-style date field.
    pub fn fat_date(&self) -> u16 {
        self.date
    }

    /// Returns the raw FAT-style time field.
    pub fn fat_time(&self) -> u16 {
        self.time
    }

    /// Returns the total size of the file when decompressed, in bytes.
    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    /// Returns the file's offset within its folder's decompressed data.
    pub fn uncompressed_offset(&self) -> u32 {
        self.uncompressed_offset
    }

    /// Returns the index of the folder holding this file's data.  This is
    /// one of the reserved values 0xFFFD to 0xFFFF for files that continue
    /// across cabinets.
    pub fn folder_index(&self) -> u16 {
        self.folder_index
    }

    /// Returns the raw attribute bits.
    pub fn attributes(&self) -> u16 {
        self.attributes
    }

    /// Returns true if this file has the "read-only" attribute set.
    pub fn is_read_only(&self) -> bool {
        (self.attributes & consts::ATTR_READ_ONLY) != 0
    }

    /// Returns true if this file has the "hidden" attribute set.
    pub fn is_hidden(&self) -> bool {
        (self.attributes & consts::ATTR_HIDDEN) != 0
    }

    /// Returns true if this file has the "system file" attribute set.
    pub fn is_system(&self) -> bool {
        (self.attributes & consts::ATTR_SYSTEM) != 0
    }

    /// Returns true if this file has the "archive" (modified since last
    /// backup) attribute set.
    pub fn is_archive(&self) -> bool {
        (self.attributes & consts::ATTR_ARCH) != 0
    }

    /// Returns true if this file has the "execute after extraction" attribute
    /// set.
    pub fn is_exec(&self) -> bool {
        (self.attributes & consts::ATTR_EXEC) != 0
    }

    /// Returns true if this file has the "name is UTF" attribute set.
    pub fn is_name_utf(&self) -> bool {
        (self.attributes & consts::ATTR_NAME_IS_UTF) != 0
    }

    /// Returns true if this file's data continues from a previous cabinet or
    /// into the next one.  Such files cannot be read from this cabinet alone.
    pub fn is_continued(&self) -> bool {
        matches!(
            self.folder_index,
            consts::IFOLD_CONTINUED_FROM_PREV
                | consts::IFOLD_CONTINUED_TO_NEXT
                | consts::IFOLD_CONTINUED_PREV_AND_NEXT
        )
    }
}

impl<'a, R: Read + Seek> Read for FileReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        debug_assert!(self.offset <= self.size);
        let bytes_remaining = self.size - self.offset;
        let max_bytes = bytes_remaining.min(buf.len() as u64) as usize;
        if max_bytes == 0 {
            return Ok(0);
        }
        let bytes_read = self.reader.read(&mut buf[..max_bytes])?;
        self.offset += bytes_read as u64;
        Ok(bytes_read)
    }
}

impl<'a, R: Read + Seek> Seek for FileReader<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if new_offset < 0 || (new_offset as u64) > self.size {
            invalid_input!(
                "Cannot seek to {}, file length is {}",
                new_offset,
                self.size
            );
        }
        let new_offset = new_offset as u64;
        self.reader.seek_to(self.file_start_in_folder + new_offset)?;
        self.offset = new_offset;
        Ok(new_offset)
    }
}

pub(crate) fn parse_file_entry<R: Read>(mut reader: R) -> Result<FileEntry> {
    let uncompressed_size = reader.read_u32::<LittleEndian>()?;
    let uncompressed_offset = reader.read_u32::<LittleEndian>()?;
    let folder_index = reader.read_u16::<LittleEndian>()?;
    let date = reader.read_u16::<LittleEndian>()?;
    let time = reader.read_u16::<LittleEndian>()?;
    let attributes = reader.read_u16::<LittleEndian>()?;
    let is_utf8 = (attributes & consts::ATTR_NAME_IS_UTF) != 0;
    let name_bytes = read_null_terminated_bytes(&mut reader)?;
    Ok(FileEntry {
        name: decode_name(&name_bytes, is_utf8),
        name_bytes,
        date,
        time,
        datetime: datetime_from_bits(date, time),
        uncompressed_size,
        attributes,
        folder_index,
        uncompressed_offset,
    })
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::parse_file_entry;
    use crate::error::Error;

    #[test]
    fn parses_file_entry() {
        let data: &[u8] = b"\x0e\0\0\0\x05\0\0\0\x01\0\
            \x6c\x22\xba\x59\x21\0hi.txt\0";
        let entry = parse_file_entry(data).unwrap();
        assert_eq!(entry.name(), "hi.txt");
        assert_eq!(entry.name_bytes(), b"hi.txt");
        assert_eq!(entry.uncompressed_size(), 14);
        assert_eq!(entry.uncompressed_offset(), 5);
        assert_eq!(entry.folder_index(), 1);
        assert_eq!(entry.fat_date(), 0x226c);
        assert_eq!(entry.fat_time(), 0x59ba);
        assert_eq!(entry.datetime(), Some(datetime!(1997-03-12 11:13:52)));
        assert!(entry.is_read_only());
        assert!(entry.is_archive());
        assert!(!entry.is_hidden());
        assert!(!entry.is_system());
        assert!(!entry.is_exec());
        assert!(!entry.is_name_utf());
        assert!(!entry.is_continued());
    }

    #[test]
    fn code_page_name_is_decoded() {
        let data: &[u8] = b"\x01\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0caf\xe9\0";
        let entry = parse_file_entry(data).unwrap();
        assert_eq!(entry.name(), "caf\u{e9}");
        assert_eq!(entry.name_bytes(), b"caf\xe9");
        assert_eq!(entry.datetime(), None);
    }

    #[test]
    fn continuation_indices() {
        for index in [0xfffdu16, 0xfffe, 0xffff] {
            let mut data = b"\x01\0\0\0\0\0\0\0".to_vec();
            data.extend_from_slice(&index.to_le_bytes());
            data.extend_from_slice(b"\0\0\0\0\0\0a\0");
            let entry = parse_file_entry(data.as_slice()).unwrap();
            assert!(entry.is_continued());
        }
    }

    #[test]
    fn truncated_entry_is_format_error() {
        let data: &[u8] = b"\x01\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0abc";
        assert!(matches!(parse_file_entry(data), Err(Error::Format(_))));
    }
}
