use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, Read, Seek, Write};

use crate::archive::Archive;
use crate::error::Result;
use crate::file::{FileEntries, FileEntry, FileReader};
use crate::folder::{FolderEntries, FolderReader};
use crate::verify::{build_report, verify_folder, VerifyReport};

/// A structure for reading a cabinet file.
///
/// By default, the decompressed data of each folder is kept after the first
/// [`read`](Cabinet::read) that touches it, so that reading several files of
/// one folder decompresses it only once.
pub struct Cabinet<R> {
    archive: Archive,
    reader: R,
    folder_cache: HashMap<usize, Vec<u8>>,
    cache_folders: bool,
}

impl<R: Read + Seek> Cabinet<R> {
    /// Open an existing cabinet file.
    pub fn new(mut reader: R) -> Result<Cabinet<R>> {
        let archive = Archive::from_reader(&mut reader)?;
        Ok(Cabinet {
            archive,
            reader,
            folder_cache: HashMap::new(),
            cache_folders: true,
        })
    }

    /// Returns the parsed tables of this cabinet.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Returns an iterator over the folder entries in this cabinet.
    pub fn folder_entries(&self) -> FolderEntries<'_> {
        self.archive.folder_entries()
    }

    /// Returns an iterator over the file entries in this cabinet, in the
    /// order they are stored.
    pub fn list(&self) -> FileEntries<'_> {
        self.archive.file_entries()
    }

    /// Returns the names of all files, in the order they are stored.
    pub fn names(&self) -> Vec<&str> {
        self.list().map(FileEntry::name).collect()
    }

    /// Returns the entry for the first file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.archive.get_file_entry(name)
    }

    /// Returns the first file entry matching `predicate`, if any.
    pub fn find_file<P>(&self, predicate: P) -> Option<&FileEntry>
    where
        P: FnMut(&FileEntry) -> bool,
    {
        self.archive.find_file(predicate)
    }

    /// Turns the folder cache on or off.  Turning it off drops anything
    /// already cached.
    pub fn set_folder_cache(&mut self, enabled: bool) {
        self.cache_folders = enabled;
        if !enabled {
            self.folder_cache.clear();
        }
    }

    /// Returns the decompressed contents of the first file with the given
    /// name.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let index = self.file_index(|file| file.name() == name, name)?;
        self.read_index(index)
    }

    /// Returns the decompressed contents of the first file matching
    /// `predicate`.
    pub fn read_where<P>(&mut self, predicate: P) -> Result<Vec<u8>>
    where
        P: FnMut(&FileEntry) -> bool,
    {
        let index = self.file_index(predicate, "<no matching file>")?;
        self.read_index(index)
    }

    /// Returns the decompressed contents of each named file, in the order
    /// given.
    pub fn read_many<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> Result<Vec<Vec<u8>>> {
        names.iter().map(|name| self.read(name.as_ref())).collect()
    }

    /// Returns a reader over the decompressed data for the file in the cabinet
    /// with the given name.
    pub fn read_file(&mut self, name: &str) -> Result<FileReader<'_, R>> {
        let index = self.file_index(|file| file.name() == name, name)?;
        let file = &self.archive.files()[index];
        if file.is_continued() {
            unsupported!("File {:?} continues in another cabinet", file.name());
        }
        let folder_index = file.folder_index as usize;
        let folder = &self.archive.folders()[folder_index];
        let file_start_in_folder = file.uncompressed_offset as u64;
        let mut reader = FolderReader::new(&mut self.reader, folder, folder_index)?;
        reader.seek_to(file_start_in_folder)?;
        Ok(FileReader {
            reader,
            file_start_in_folder,
            offset: 0,
            size: file.uncompressed_size() as u64,
        })
    }

    /// Returns a reader over the decompressed data in the specified folder.
    pub fn read_folder(&mut self, index: usize) -> Result<FolderReader<'_, R>> {
        let folders = self.archive.folders();
        if index >= folders.len() {
            invalid_input!(
                "Folder index {} is out of range (cabinet has {} folders)",
                index,
                folders.len()
            );
        }
        FolderReader::new(&mut self.reader, &folders[index], index)
    }

    /// Streams the decompressed contents of the first file with the given
    /// name into `sink`, and returns the number of bytes written.
    pub fn extract<W: Write>(&mut self, name: &str, sink: &mut W) -> Result<u64> {
        let mut file_reader = self.read_file(name)?;
        Ok(io::copy(&mut file_reader, sink)?)
    }

    /// Offers each file entry in turn to `open`, which returns the sink to
    /// extract that file into, or `None` to skip it.  Returns the number of
    /// files extracted.
    pub fn extract_all<W, F>(&mut self, mut open: F) -> Result<usize>
    where
        W: Write,
        F: FnMut(&FileEntry) -> Result<Option<W>>,
    {
        let mut extracted = 0;
        for index in 0..self.archive.files().len() {
            let sink = open(&self.archive.files()[index])?;
            if let Some(mut sink) = sink {
                let data = self.read_index(index)?;
                sink.write_all(&data)?;
                sink.flush()?;
                extracted += 1;
            }
        }
        Ok(extracted)
    }

    /// Decompresses every folder, checking every data block checksum and the
    /// decompressed lengths, and reports which folders and files failed.
    pub fn verify(&mut self) -> VerifyReport {
        let results = self
            .archive
            .folders()
            .iter()
            .enumerate()
            .map(|(index, folder)| verify_folder(&mut self.reader, folder, index))
            .collect();
        build_report(self.archive.files(), results)
    }

    /// Consumes the cabinet and returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn file_index<P>(&self, mut predicate: P, name: &str) -> Result<usize>
    where
        P: FnMut(&FileEntry) -> bool,
    {
        match self.archive.files().iter().position(|file| predicate(file)) {
            Some(index) => Ok(index),
            None => not_found!("{}", name),
        }
    }

    fn read_index(&mut self, index: usize) -> Result<Vec<u8>> {
        let file = &self.archive.files()[index];
        if file.is_continued() {
            unsupported!("File {:?} continues in another cabinet", file.name());
        }
        let size = file.uncompressed_size() as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        let folder_index = file.folder_index as usize;
        let offset = file.uncompressed_offset as usize;
        let folder = &self.archive.folders()[folder_index];
        if !self.cache_folders {
            let mut reader =
                FolderReader::new(&mut self.reader, folder, folder_index)?;
            return reader.read_range(offset as u64, size);
        }
        let data = match self.folder_cache.entry(folder_index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut reader =
                    FolderReader::new(&mut self.reader, folder, folder_index)?;
                let total = reader.total_size() as usize;
                entry.insert(reader.read_range(0, total)?)
            }
        };
        Ok(data[offset..offset + size].to_vec())
    }
}
