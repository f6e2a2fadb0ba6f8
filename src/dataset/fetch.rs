//! Download and unpack dataset and model archives.

use super::{check_fresh, FreshOutput};
use crate::error::DatasetError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Archive file name taken from the last URL path segment.
pub fn archive_name(url: &str) -> Result<String, DatasetError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| DatasetError::InvalidUrl(url.to_string()))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DatasetError::InvalidUrl(url.to_string()))
}

/// Download every URL into `dest`, which must be absent or empty.
///
/// Files are streamed to a `.part` name and renamed when complete. Any
/// failure removes everything this call wrote.
pub fn fetch_archives(urls: &[String], dest: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if urls.is_empty() {
        return Err(DatasetError::InvalidParameter("no URL given".to_string()));
    }
    let names = urls
        .iter()
        .map(|u| archive_name(u))
        .collect::<Result<Vec<_>, _>>()?;

    let output = FreshOutput::create(dest)?;
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
        .build()?;

    let mut fetched = Vec::with_capacity(urls.len());
    for (url, name) in urls.iter().zip(&names) {
        let target = output.path().join(name);
        download(&client, url, &target)?;
        fetched.push(target);
    }

    output.commit();
    Ok(fetched)
}

fn download(client: &reqwest::blocking::Client, url: &str, target: &Path) -> Result<(), DatasetError> {
    tracing::info!("Downloading {} -> {}", url, target.display());

    let mut response = client.get(url).send()?.error_for_status()?;
    let partial = target.with_extension("part");
    let mut file = File::create(&partial)?;
    let bytes = response.copy_to(&mut file)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&partial, target)?;

    tracing::info!("Downloaded {} bytes", bytes);
    Ok(())
}

/// Default extraction directory: the archive path without its extension.
pub fn default_extract_dir(archive: &Path) -> PathBuf {
    archive.with_extension("")
}

/// Unpack a zip archive into `dest`, which must be absent or empty.
/// Returns the number of entries.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, DatasetError> {
    if !archive.is_file() {
        return Err(DatasetError::SourceMissing(archive.to_path_buf()));
    }
    let mut zip = zip::ZipArchive::new(File::open(archive)?)
        .map_err(|_| DatasetError::InvalidArchive(archive.to_path_buf()))?;
    check_fresh(dest)?;

    tracing::info!("Extracting {} -> {}", archive.display(), dest.display());
    let output = FreshOutput::create(dest)?;
    // Entry names are sanitized by the zip crate; nothing escapes `dest`
    zip.extract(output.path())?;
    let entries = zip.len();
    output.commit();

    tracing::info!("Extracted {} entries", entries);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("data/", options).unwrap();
        writer.start_file("data/NEU_1.txt", options).unwrap();
        writer.write_all(b"2 0.5 0.5 0.1 0.1\n").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name("https://example.org/sets/cells1.1.zip").unwrap(),
            "cells1.1.zip"
        );
        assert!(archive_name("https://example.org/").is_err());
        assert!(archive_name("not a url").is_err());
    }

    #[test]
    fn test_fetch_refuses_non_empty_dest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep"), b"x").unwrap();
        let result = fetch_archives(&["http://127.0.0.1:9/a.zip".to_string()], dir.path());
        assert!(matches!(result, Err(DatasetError::DestinationNotEmpty(_))));
        assert!(dir.path().join("keep").exists());
    }

    #[test]
    fn test_failed_fetch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("runs");
        // Port 9 (discard) is not listening; the connection is refused
        let result = fetch_archives(&["http://127.0.0.1:9/a.zip".to_string()], &dest);
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_extract() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("set.zip");
        make_zip(&archive);

        let dest = default_extract_dir(&archive);
        assert_eq!(dest, dir.path().join("set"));
        let entries = extract_archive(&archive, &dest).unwrap();
        assert_eq!(entries, 2);
        assert!(dest.join("data").join("NEU_1.txt").is_file());

        // Second run must refuse
        assert!(matches!(
            extract_archive(&archive, &dest),
            Err(DatasetError::DestinationNotEmpty(_))
        ));
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();
        let dest = dir.path().join("out");
        assert!(matches!(
            extract_archive(&archive, &dest),
            Err(DatasetError::InvalidArchive(_))
        ));
        assert!(!dest.exists());
        assert!(matches!(
            extract_archive(&dir.path().join("missing.zip"), &dest),
            Err(DatasetError::SourceMissing(_))
        ));
    }
}
