//! Chaincode source packaging: a deterministic TAR.GZ over a source
//! tree, as embedded in install proposals.
//!
//! Determinism rules: entries are sorted by path, mtimes are zeroed,
//! and mode bits are canonicalized to `0644` (plain) or `0755`
//! (executable), so identical trees produce identical archives on any
//! machine.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::Error;

/// Packages the chaincode tree at `source_dir` under
/// `src/<chaincode_path>/` in the archive, plus an optional metadata
/// tree under `META-INF/`.
pub fn package_chaincode(
    source_dir: &Path,
    chaincode_path: &str,
    metadata_dir: Option<&Path>,
) -> Result<Vec<u8>, Error> {
    if chaincode_path.trim().is_empty() {
        return Err(Error::argument("chaincode path must not be blank"));
    }
    if !source_dir.is_dir() {
        return Err(Error::argument(format!(
            "chaincode source directory {} does not exist",
            source_dir.display()
        )));
    }

    let mut entries = collect_files(source_dir, &format!("src/{chaincode_path}"))?;
    if let Some(meta) = metadata_dir {
        if !meta.is_dir() {
            return Err(Error::argument(format!(
                "metadata directory {} does not exist",
                meta.display()
            )));
        }
        entries.extend(collect_files(meta, "META-INF")?);
    }
    if entries.is_empty() {
        return Err(Error::argument("chaincode source tree is empty"));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (archive_path, file_path) in &entries {
        let data = fs::read(file_path).map_err(|e| {
            Error::argument(format!("failed to read {}: {e}", file_path.display()))
        })?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(canonical_mode(file_path));
        header.set_mtime(0);
        header.set_cksum();

        builder
            .append_data(&mut header, archive_path, data.as_slice())
            .map_err(|e| Error::argument(format!("archive write failed: {e}")))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::argument(format!("archive finalize failed: {e}")))?;
    let bytes = encoder
        .finish()
        .map_err(|e| Error::argument(format!("gzip finalize failed: {e}")))?;

    debug!(files = entries.len(), bytes = bytes.len(), "chaincode packaged");
    Ok(bytes)
}

/// Recursively collects regular files as (archive path, filesystem
/// path) pairs. Archive paths must be UTF-8.
fn collect_files(root: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir)
            .map_err(|e| Error::argument(format!("failed to list {}: {e}", dir.display())))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::argument(format!("directory walk failed: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| Error::argument(format!("path escape: {e}")))?;
                let Some(relative) = relative.to_str() else {
                    return Err(Error::argument(format!(
                        "non-UTF-8 path in chaincode tree: {}",
                        relative.display()
                    )));
                };
                let relative = relative.replace(std::path::MAIN_SEPARATOR, "/");
                out.push((format!("{prefix}/{relative}"), path));
            }
        }
    }
    Ok(out)
}

#[cfg(unix)]
fn canonical_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    let executable = fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);
    if executable {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn canonical_mode(_path: &Path) -> u32 {
    0o644
}
