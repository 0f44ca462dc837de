use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use serde::Serialize;
use tracing::info;

pub mod xml;

/// Opens `path` for reading. Files ending in `.gz` are decompressed on the fly.
pub fn open_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let buffered_reader = BufReader::new(file);

    if is_gzipped(path) {
        let decoder = flate2::read::GzDecoder::new(buffered_reader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(buffered_reader))
    }
}

/// Creates `path` (and its parent directories) for writing, truncating any existing file.
/// Files ending in `.gz` are compressed.
pub fn create_writer(path: &Path) -> io::Result<Box<dyn Write>> {
    if let Some(prefix) = path.parent() {
        if !prefix.as_os_str().is_empty() {
            fs::create_dir_all(prefix)?;
        }
    }
    let file_writer = BufWriter::new(File::create(path)?);

    if is_gzipped(path) {
        Ok(Box::new(flate2::write::GzEncoder::new(
            file_writer,
            Compression::fast(),
        )))
    } else {
        Ok(Box::new(file_writer))
    }
}

/// Removes everything inside `dir` and recreates it empty.
pub fn reset_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)
}

/// Writes `rows` as comma separated values with a header taken from the field names. A `.gz`
/// suffix compresses the output.
pub fn write_table<T: Serialize>(rows: &[T], path: &Path) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(create_writer(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {path:?}", rows.len());
    Ok(())
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq("gz"))
}
