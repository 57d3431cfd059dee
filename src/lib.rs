//! A library for reading [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB) files.
//!
//! Cabinets store files in one or more *folders*, each of which is a single
//! compressed stream split into data blocks.  Folders may be stored
//! uncompressed or compressed with MSZIP or LZX; Quantum folders can be
//! listed but not decompressed, and files that span several cabinets are
//! reported as unsupported.
//!
//! [`Archive`] parses the tables of a cabinet without holding on to a reader.
//! [`Cabinet`] pairs those tables with a reader to list, read, extract and
//! verify files:
//!
//! ```no_run
//! use std::fs::File;
//!
//! let mut cabinet = cabinet::Cabinet::new(File::open("setup.cab")?)?;
//! for name in cabinet.names() {
//!     println!("{}", name);
//! }
//! let readme = cabinet.read("README.TXT")?;
//! assert!(cabinet.verify().is_ok());
//! # Ok::<(), cabinet::Error>(())
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod archive;
mod bits;
mod cabinet;
mod checksum;
mod consts;
mod ctype;
mod datetime;
mod error;
mod file;
mod folder;
mod huffman;
mod lzx;
mod mszip;
mod string;
mod verify;

pub use crate::archive::{is_cabinet, Archive, CabinetHeader, CabinetLink};
pub use crate::cabinet::Cabinet;
pub use crate::ctype::CompressionType;
pub use crate::datetime::datetime_from_bits;
pub use crate::error::{Error, Result};
pub use crate::file::{FileEntries, FileEntry, FileReader};
pub use crate::folder::{
    DataBlockEntry, FolderEntries, FolderEntry, FolderReader,
};
pub use crate::lzx::{LzxDecompressor, MAX_WINDOW_BITS, MIN_WINDOW_BITS};
pub use crate::mszip::MsZipDecompressor;
pub use crate::verify::{FolderFailure, VerifyReport};
