use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

const ARCHIVE_EXTENSION: &str = "zip";

/// Bundles every existing input file into `<stem>.zip`, each stored under its
/// base file name only. Inputs that do not exist are skipped, not an error.
pub fn build_archive(stem: &Path, files: &[&Path]) -> Result<PathBuf> {
    let mut path = stem.as_os_str().to_os_string();
    path.push(".");
    path.push(ARCHIVE_EXTENSION);
    let archive_path = PathBuf::from(path);

    let output = File::create(&archive_path)
        .with_context(|| format!("failed to create archive {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(output);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        if !file.exists() {
            debug!("Skipping missing archive input {}", file.display());
            continue;
        }

        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .with_context(|| format!("archive input {} has no usable file name", file.display()))?;

        writer
            .start_file(name, options)
            .with_context(|| format!("failed to add {} to archive", file.display()))?;
        let mut input = File::open(file)
            .with_context(|| format!("failed to open archive input {}", file.display()))?;
        io::copy(&mut input, &mut writer)
            .with_context(|| format!("failed to compress {}", file.display()))?;
    }

    writer.finish().context("failed to finalize archive")?;
    info!("Built playtest archive {}", archive_path.display());

    Ok(archive_path)
}
