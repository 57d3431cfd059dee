use anyhow::Context;

use std::env;
use std::fs::File;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let num_args = env::args().count();
    if num_args != 2 {
        println!("Usage: readcab <path/to/archive.cab>");
        return Ok(());
    }

    let input_path = env::args().nth(1).context("Missing path argument")?;
    let input_path = Path::new(&input_path);
    let input_file = File::open(input_path)?;
    let cabinet = cabinet::Cabinet::new(input_file)
        .context("Failed to open cabinet file")?;
    let header = cabinet.archive().header();
    let (major, minor) = header.version();
    println!("Cabinet version {}.{}", major, minor);
    println!("  set_id = {}, set_index = {}", header.set_id(), header.set_index());
    println!("  reserve_data = {:?}", header.reserve_data());
    if let Some(link) = header.previous_cabinet() {
        println!("  previous = {:?} on {:?}", link.cabinet_name(), link.disk_name());
    }
    if let Some(link) = header.next_cabinet() {
        println!("  next = {:?} on {:?}", link.cabinet_name(), link.disk_name());
    }
    for (index, folder) in cabinet.folder_entries().enumerate() {
        println!("Folder #{}:", index);
        println!("  compression_type = {:?}", folder.compression_type());
        println!("  reserve_data = {:?}", folder.reserve_data());
        println!("  num_data_blocks = {}", folder.num_data_blocks());
        let mut total_size = 0;
        for file in cabinet.archive().files_in_folder(index) {
            let size = file.uncompressed_size();
            println!("  {:?} ({} bytes)", file.name(), size);
            total_size += size;
        }
        println!("  {} bytes total", total_size);
    }
    for file in cabinet.list().filter(|file| file.is_continued()) {
        println!("{:?} continues across cabinets", file.name());
    }

    Ok(())
}
