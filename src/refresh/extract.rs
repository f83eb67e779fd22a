//! Payload decoding for downloaded databases.
//!
//! Sources are served either as a gzipped database (`*.mmdb.gz`), a tarball
//! holding one (`*.tar.gz`) or an uncompressed file.

use std::io::Read;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error_handling::DownloadError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How a source's payload is packed, decided from its base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Packing {
    /// `*.tar.gz` / `*.tgz`
    TarGz,
    /// `*.gz`
    Gzip,
    /// Anything else
    Plain,
}

impl Packing {
    pub(crate) fn of(base_name: &str) -> Self {
        let lower = base_name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Packing::TarGz
        } else if lower.ends_with(".gz") {
            Packing::Gzip
        } else {
            Packing::Plain
        }
    }
}

/// Local file name for a remote base name: `.gz` stripped, tarballs become `.mmdb`.
///
/// Two different remote datasets never share a local name, so a source change
/// never reuses a stale file.
pub(crate) fn local_file_name(base_name: &str) -> String {
    match Packing::of(base_name) {
        Packing::TarGz => {
            let lower = base_name.to_ascii_lowercase();
            let cut = if lower.ends_with(".tar.gz") { 7 } else { 4 };
            format!("{}.mmdb", &base_name[..base_name.len() - cut])
        }
        Packing::Gzip => base_name[..base_name.len() - 3].to_string(),
        Packing::Plain => base_name.to_string(),
    }
}

/// Decodes a downloaded payload into raw database bytes.
pub(crate) fn unpack(bytes: &[u8], packing: Packing) -> Result<Vec<u8>, DownloadError> {
    match packing {
        Packing::TarGz => extract_mmdb_from_tar_gz(bytes),
        Packing::Gzip => gunzip(bytes),
        Packing::Plain => Ok(bytes.to_vec()),
    }
}

fn check_gzip_magic(bytes: &[u8]) -> Result<(), DownloadError> {
    if bytes.len() < 2 || bytes[..2] != GZIP_MAGIC {
        return Err(DownloadError::Archive(
            "payload is not gzip compressed".to_string(),
        ));
    }
    Ok(())
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, DownloadError> {
    check_gzip_magic(bytes)?;
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| DownloadError::Archive(format!("gzip decode failed: {}", e)))?;
    log::debug!("Decompressed {} bytes into {} bytes", bytes.len(), out.len());
    Ok(out)
}

/// Extracts the first `.mmdb` member of a tar.gz archive.
fn extract_mmdb_from_tar_gz(bytes: &[u8]) -> Result<Vec<u8>, DownloadError> {
    check_gzip_magic(bytes)?;
    let archive_err = |e: std::io::Error| DownloadError::Archive(format!("tar read failed: {}", e));

    let mut archive = Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let is_mmdb = entry
            .path()
            .map_err(archive_err)?
            .extension()
            .is_some_and(|ext| ext == "mmdb");
        if !is_mmdb {
            continue;
        }
        let mut out = Vec::new();
        entry.read_to_end(&mut out).map_err(archive_err)?;
        log::info!("Extracted database from tar.gz ({} bytes)", out.len());
        return Ok(out);
    }

    Err(DownloadError::Archive(
        "no .mmdb member in tar.gz archive".to_string(),
    ))
}
