//! Archive extraction
//!
//! Tarballs (plain, gzip, bzip2, xz and zstd compressed) are unpacked in
//! process with the `tar` crate. Zip archives are handed to the host `unzip`.
//!
//! Extraction returns the single top-level directory of the archive when
//! there is exactly one, so `foo-1.0.tar.gz` extracted into `work/` yields
//! `work/foo-1.0`. The decision is based on the archive's own entries, not on
//! whatever else already lives in the destination.
//!
//! Pacman bookkeeping files (`.PKGINFO`, `.MTREE` and friends) at the top of
//! a package archive are not extracted, so prebuilt packages unpacked straight
//! into the rootfs leave only their payload behind.

use crate::runner::{CommandRunner, CommandSpec, ExecutionError, SystemRunner};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while extracting an archive
#[derive(Debug, Error)]
pub enum ExtractError {
    /// File name matches no known archive format
    #[error("Unsupported archive format: {0}")]
    Unsupported(PathBuf),

    /// Reading the archive or writing an entry failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The host `unzip` could not list or extract a zip archive
    #[error("unzip failed for {archive}: {source}")]
    Unzip {
        /// Archive being extracted
        archive: PathBuf,
        /// Failure of the `unzip` invocation
        #[source]
        source: ExecutionError,
    },
}

/// Package manager metadata found at the root of `.pkg.tar.*` archives.
const PACKAGE_METADATA: [&str; 5] =
    [".PKGINFO", ".MTREE", ".BUILDINFO", ".INSTALL", ".CHANGELOG"];

/// Result type for extraction
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Unpacks an archive into a directory.
pub trait Extractor {
    /// Extract `archive` into `dest_dir`.
    ///
    /// Returns the archive's single top-level directory inside `dest_dir`
    /// if it has exactly one, otherwise `dest_dir` itself.
    ///
    /// # Errors
    ///
    /// Fails on unknown formats and on any read or write error.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<PathBuf>;
}

/// Archive formats recognised by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar`
    Tar,
    /// `.tar.gz`, `.tgz`
    TarGz,
    /// `.tar.bz2`, `.tbz2`
    TarBz2,
    /// `.tar.xz`, `.txz`
    TarXz,
    /// `.tar.zst`, including pacman `.pkg.tar.zst`
    TarZst,
    /// `.zip`
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from the file name.
    #[must_use]
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        let format = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Self::TarBz2
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Self::TarXz
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Self::TarZst
        } else if name.ends_with(".tar") {
            Self::Tar
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            return None;
        };
        Some(format)
    }
}

/// Production extractor.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    runner: SystemRunner,
}

impl ArchiveExtractor {
    /// Create a new extractor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn unpack_zip(
        &self,
        archive: &Path,
        dest_dir: &Path,
    ) -> ExtractResult<BTreeSet<OsString>> {
        let unzip_err = |source| ExtractError::Unzip {
            archive: archive.to_path_buf(),
            source,
        };
        let archive_arg = archive.to_string_lossy().into_owned();

        let listing = self
            .runner
            .capture(
                &CommandSpec::new(["unzip", "-Z1", archive_arg.as_str()], dest_dir)
                    .describe("unzip: list"),
            )
            .map_err(unzip_err)?;

        let dest_arg = dest_dir.to_string_lossy().into_owned();
        self.runner
            .run(
                &CommandSpec::new(
                    ["unzip", "-q", "-o", archive_arg.as_str(), "-d", dest_arg.as_str()],
                    dest_dir,
                )
                .describe("unzip: extract"),
            )
            .map_err(unzip_err)?;

        Ok(listing
            .lines()
            .filter_map(|line| top_level(Path::new(line.trim())))
            .collect())
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<PathBuf> {
        let format = ArchiveFormat::detect(archive)
            .ok_or_else(|| ExtractError::Unsupported(archive.to_path_buf()))?;
        fs::create_dir_all(dest_dir)?;

        info!("📂 Extracting {} to {}", archive.display(), dest_dir.display());

        let roots = match format {
            ArchiveFormat::Zip => self.unpack_zip(archive, dest_dir)?,
            tarball => {
                let file = fs::File::open(archive)?;
                match tarball {
                    ArchiveFormat::TarGz => {
                        unpack_tar(flate2::read::GzDecoder::new(file), dest_dir)?
                    }
                    ArchiveFormat::TarBz2 => {
                        unpack_tar(bzip2::read::BzDecoder::new(file), dest_dir)?
                    }
                    ArchiveFormat::TarXz => unpack_tar(xz2::read::XzDecoder::new(file), dest_dir)?,
                    ArchiveFormat::TarZst => {
                        unpack_tar(zstd::stream::read::Decoder::new(file)?, dest_dir)?
                    }
                    _ => unpack_tar(file, dest_dir)?,
                }
            }
        };

        Ok(single_root(dest_dir, &roots))
    }
}

/// Unpack a tar stream and return the set of top-level names it contained.
fn unpack_tar<R: Read>(reader: R, dest_dir: &Path) -> ExtractResult<BTreeSet<OsString>> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    let mut roots = BTreeSet::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }
        let path = entry.path()?.into_owned();
        if is_package_metadata(&path) {
            debug!("Skipped package metadata {}", path.display());
            continue;
        }
        if let Some(root) = top_level(&path) {
            let _ = roots.insert(root);
        }
        if !entry.unpack_in(dest_dir)? {
            debug!("Skipped entry outside destination in archive");
        }
    }
    Ok(roots)
}

fn is_package_metadata(path: &Path) -> bool {
    let mut names = path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name),
        _ => None,
    });
    match (names.next(), names.next()) {
        (Some(name), None) => PACKAGE_METADATA.iter().any(|m| name == *m),
        _ => false,
    }
}

/// First normal component of an archive member path.
fn top_level(path: &Path) -> Option<OsString> {
    path.components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_os_string()),
        _ => None,
    })
}

fn single_root(dest_dir: &Path, roots: &BTreeSet<OsString>) -> PathBuf {
    if let (1, Some(root)) = (roots.len(), roots.first()) {
        let candidate = dest_dir.join(root);
        if candidate.is_dir() {
            return candidate;
        }
    }
    dest_dir.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_detect_formats() {
        let cases = [
            ("a.tar", Some(ArchiveFormat::Tar)),
            ("a.tar.gz", Some(ArchiveFormat::TarGz)),
            ("a.tgz", Some(ArchiveFormat::TarGz)),
            ("a.tar.bz2", Some(ArchiveFormat::TarBz2)),
            ("a.tar.xz", Some(ArchiveFormat::TarXz)),
            ("nano-8.0-1-x86_64.pkg.tar.zst", Some(ArchiveFormat::TarZst)),
            ("a.ZIP", Some(ArchiveFormat::Zip)),
            ("a.rpm", None),
        ];
        for (name, expected) in cases {
            assert_eq!(ArchiveFormat::detect(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn test_single_top_level_dir_is_unwrapped() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("zlib-1.3.1.tar.gz");
        let tar = build_tar(&[
            ("zlib-1.3.1/configure", b"#!/bin/sh\n"),
            ("zlib-1.3.1/src/zlib.h", b"/* */"),
        ]);
        fs::write(&archive, gzip(&tar)).unwrap();

        let work = dir.path().join("work");
        // Unrelated content already in the shared work directory
        fs::create_dir_all(work.join("other-1.0")).unwrap();

        let root = ArchiveExtractor::new().extract(&archive, &work).unwrap();
        assert_eq!(root, work.join("zlib-1.3.1"));
        assert!(root.join("configure").is_file());
        assert!(root.join("src/zlib.h").is_file());
    }

    #[test]
    fn test_multiple_top_level_entries_return_dest() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("nano.tar");
        fs::write(
            &archive,
            build_tar(&[("usr/bin/nano", b"\x7fELF"), ("etc/nanorc", b"set tabsize 4")]),
        )
        .unwrap();

        let rootfs = dir.path().join("rootfs");
        let root = ArchiveExtractor::new().extract(&archive, &rootfs).unwrap();
        assert_eq!(root, rootfs);
        assert!(rootfs.join("usr/bin/nano").is_file());
        assert!(rootfs.join("etc/nanorc").is_file());
    }

    #[test]
    fn test_package_metadata_stays_out_of_rootfs() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("nano-8.0-1-aarch64.pkg.tar.zst");
        let tar = build_tar(&[
            (".PKGINFO", b"pkgname = nano"),
            (".MTREE", b"#mtree"),
            (".BUILDINFO", b"format = 2"),
            ("usr/bin/nano", b"\x7fELF"),
            ("usr/share/doc/.PKGINFO", b"not metadata"),
        ]);
        fs::write(&archive, zstd::encode_all(tar.as_slice(), 3).unwrap()).unwrap();

        let rootfs = dir.path().join("rootfs");
        let root = ArchiveExtractor::new().extract(&archive, &rootfs).unwrap();

        // Only `usr` is left at the top, and it is unwrapped like any single root
        assert_eq!(root, rootfs.join("usr"));
        assert!(rootfs.join("usr/bin/nano").is_file());
        assert!(rootfs.join("usr/share/doc/.PKGINFO").is_file());
        assert!(!rootfs.join(".PKGINFO").exists());
        assert!(!rootfs.join(".MTREE").exists());
        assert!(!rootfs.join(".BUILDINFO").exists());
    }

    #[test]
    fn test_zstd_tarball() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.tar.zst");
        let tar = build_tar(&[("pkg-2.0/Makefile", b"all:\n")]);
        fs::write(&archive, zstd::encode_all(tar.as_slice(), 3).unwrap()).unwrap();

        let root = ArchiveExtractor::new()
            .extract(&archive, &dir.path().join("out"))
            .unwrap();
        assert!(root.ends_with("pkg-2.0"));
        assert!(root.join("Makefile").is_file());
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("thing.rpm");
        fs::write(&archive, b"").unwrap();

        assert!(matches!(
            ArchiveExtractor::new().extract(&archive, dir.path()),
            Err(ExtractError::Unsupported(_))
        ));
    }
}
