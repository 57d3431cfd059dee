use std::collections::HashSet;
use std::io::{self, Read, Seek};

use tracing::warn;

use crate::error::{Error, Result};
use crate::file::FileEntry;
use crate::folder::{FolderEntry, FolderReader};

/// A folder that failed to verify, and why.
#[derive(Debug)]
pub struct FolderFailure {
    index: usize,
    error: Error,
}

/// The outcome of checking every folder of a cabinet.
#[derive(Debug, Default)]
pub struct VerifyReport {
    folders_checked: usize,
    failed_folders: Vec<FolderFailure>,
    failed_files: Vec<String>,
}

impl FolderFailure {
    /// Returns the index of the folder that failed.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the first error found while decompressing the folder.
    pub fn error(&self) -> &Error {
        &self.error
    }
}

impl VerifyReport {
    /// Returns true if every folder and every file verified.
    pub fn is_ok(&self) -> bool {
        self.failed_folders.is_empty() && self.failed_files.is_empty()
    }

    /// Returns the number of folders that were decompressed.
    pub fn folders_checked(&self) -> usize {
        self.folders_checked
    }

    /// Returns the folders that failed, in index order.
    pub fn failed_folders(&self) -> &[FolderFailure] {
        &self.failed_folders
    }

    /// Returns the names of files whose data could not be verified, in
    /// cabinet order.
    pub fn failed_files(&self) -> &[String] {
        &self.failed_files
    }
}

/// Decompresses a whole folder, checking every block checksum along the way
/// and the total length at the end.
pub(crate) fn verify_folder<R: Read + Seek>(
    reader: &mut R,
    entry: &FolderEntry,
    index: usize,
) -> Result<()> {
    let mut folder = FolderReader::new(reader, entry, index)?;
    let expected = folder.total_size();
    let actual = io::copy(&mut folder, &mut io::sink())?;
    if actual != expected {
        corrupt_data!(
            "Folder {} decompressed to {} bytes instead of {}",
            index,
            actual,
            expected
        );
    }
    Ok(())
}

pub(crate) fn build_report(
    files: &[FileEntry],
    results: Vec<Result<()>>,
) -> VerifyReport {
    let folders_checked = results.len();
    let failed_folders: Vec<FolderFailure> = results
        .into_iter()
        .enumerate()
        .filter_map(|(index, result)| {
            result.err().map(|error| FolderFailure { index, error })
        })
        .collect();
    let failed_indices: HashSet<usize> =
        failed_folders.iter().map(|failure| failure.index).collect();
    for failure in &failed_folders {
        warn!(
            folder = failure.index,
            error = %failure.error,
            "folder failed to verify"
        );
    }

    let mut failed_files = Vec::new();
    for file in files {
        if file.is_continued() {
            warn!(file = file.name(), "file continues in another cabinet");
            failed_files.push(file.name().to_string());
        } else if failed_indices.contains(&(file.folder_index as usize)) {
            failed_files.push(file.name().to_string());
        }
    }
    VerifyReport { folders_checked, failed_folders, failed_files }
}
