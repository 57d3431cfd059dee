use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use cabinet::{Cabinet, CompressionType, Error, FileEntry, FolderEntry};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

// ========================================================================= //

#[derive(Parser)]
#[command(name = "cabtool", version, about = "Inspects and unpacks CAB files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Concatenates and prints files from the cabinet
    Cat {
        cab: PathBuf,
        files: Vec<String>,
    },
    /// Extracts files from the cabinet into a directory
    Extract {
        cab: PathBuf,
        /// Directory to extract into
        dir: PathBuf,
        /// Files to extract (default: all)
        files: Vec<String>,
    },
    /// Lists files in the cabinet
    Ls {
        /// Lists in long format
        #[arg(short, long)]
        long: bool,
        cab: PathBuf,
    },
    /// Decompresses every folder and checks all data block checksums
    Test { cab: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse().command) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("cabtool: {}", error);
            ExitCode::from(exit_status(&error))
        }
    }
}

fn run(command: Command) -> cabinet::Result<ExitCode> {
    match command {
        Command::Cat { cab, files } => {
            let mut cabinet = open_cab(&cab)?;
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            for name in files {
                cabinet.extract(&name, &mut stdout)?;
            }
        }
        Command::Extract { cab, dir, files } => {
            let mut cabinet = open_cab(&cab)?;
            for name in files.iter() {
                if cabinet.get_file_entry(name).is_none() {
                    return Err(Error::NotFound(name.clone()));
                }
            }
            let count = cabinet.extract_all(|file| {
                if !files.is_empty() && !files.iter().any(|n| n == file.name())
                {
                    return Ok(None);
                }
                let path = dir.join(sanitize_path(file.name()));
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                Ok(Some(BufWriter::new(File::create(path)?)))
            })?;
            eprintln!("extracted {} file(s)", count);
        }
        Command::Ls { long, cab } => {
            let cabinet = open_cab(&cab)?;
            let folders: Vec<&FolderEntry> = cabinet.folder_entries().collect();
            for file in cabinet.list() {
                let folder = folders.get(file.folder_index() as usize).copied();
                list_file(folder, file, long);
            }
        }
        Command::Test { cab } => {
            let mut cabinet = open_cab(&cab)?;
            let report = cabinet.verify();
            for failure in report.failed_folders() {
                println!("folder {}: {}", failure.index(), failure.error());
            }
            for name in report.failed_files() {
                println!("FAILED {}", name);
            }
            if !report.is_ok() {
                let status = report
                    .failed_folders()
                    .first()
                    .map_or(5, |failure| exit_status(failure.error()));
                return Ok(ExitCode::from(status));
            }
            println!("{} folder(s) OK", report.folders_checked());
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ========================================================================= //

fn exit_status(error: &Error) -> u8 {
    match error {
        Error::Io(_) => 1,
        Error::Format(_) => 2,
        Error::CorruptData(_) => 3,
        Error::NotFound(_) => 4,
        Error::UnsupportedFeature(_) => 5,
    }
}

/// Maps a stored name, which uses backslashes, onto a relative path that
/// cannot climb out of the output directory.
fn sanitize_path(name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in Path::new(&name.replace('\\', "/")).components() {
        if let Component::Normal(part) = part {
            path.push(part);
        }
    }
    if path.as_os_str().is_empty() {
        path.push("_");
    }
    path
}

fn list_file(folder: Option<&FolderEntry>, file: &FileEntry, long: bool) {
    if !long {
        println!("{}", file.name());
        return;
    }
    let ctype = match folder.map(FolderEntry::compression_type) {
        None => "-".to_string(),
        Some(CompressionType::None) => "None".to_string(),
        Some(CompressionType::MsZip) => "MsZip".to_string(),
        Some(CompressionType::Quantum(v, m)) => format!("Q{}/{}", v, m),
        Some(CompressionType::Lzx(w)) => format!("Lzx{}", w),
    };
    let file_size = if file.uncompressed_size() >= 100_000_000 {
        format!("{} MB", file.uncompressed_size() / (1 << 20))
    } else if file.uncompressed_size() >= 1_000_000 {
        format!("{} kB", file.uncompressed_size() / (1 << 10))
    } else {
        format!("{} B ", file.uncompressed_size())
    };
    let folder_index = if file.is_continued() {
        "--".to_string()
    } else {
        file.folder_index().to_string()
    };
    println!(
        "{}{}{}{}{}{} {:>2} {:<5} {:>10} {} {}",
        if file.is_read_only() { 'R' } else { '-' },
        if file.is_hidden() { 'H' } else { '-' },
        if file.is_system() { 'S' } else { '-' },
        if file.is_archive() { 'A' } else { '-' },
        if file.is_exec() { 'E' } else { '-' },
        if file.is_name_utf() { 'U' } else { '-' },
        folder_index,
        ctype,
        file_size,
        file.datetime()
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| "invalid datetime".to_string()),
        file.name()
    );
}

fn open_cab(path: &Path) -> cabinet::Result<Cabinet<File>> {
    Cabinet::new(File::open(path)?)
}

// ========================================================================= //
