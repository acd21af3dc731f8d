// CCTRACE: Derivation of Per-Flow Metrics from Congestion-Control Testbed Experiment Logs
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Extraction of single members from an experiment's `.tar.gz` result archive.

use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;

use crate::error::ExtractionError;

/// Extracts named members of one experiment archive into a scratch directory.
///
/// Each member lands under its own basename, so interleaved extractions of
/// different members never share a path.
#[derive(Clone, Debug)]
pub struct ArchiveDataSource {
    archive: PathBuf,
    extract_dir: PathBuf,
}

/// A member extracted to a temporary file; the file is deleted on drop.
#[derive(Debug)]
pub struct ExtractedMember {
    path: PathBuf,
}

impl ArchiveDataSource {
    pub fn new(archive: impl Into<PathBuf>, extract_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            extract_dir: extract_dir.into(),
        }
    }

    /// Extract the named member (matched by full path or basename) to the scratch
    /// directory and return a handle to the temporary file.
    pub fn extract(&self, member: &str) -> Result<ExtractedMember, ExtractionError> {
        let archive_err = |source: io::Error| ExtractionError::Archive {
            archive: self.archive.clone(),
            source,
        };

        log::debug!(
            "Extracting member {member} from {} to {}",
            self.archive.display(),
            self.extract_dir.display()
        );

        let file = File::open(&self.archive).map_err(archive_err)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let wanted = Path::new(member)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| member.to_string());

        for entry in tar.entries().map_err(archive_err)? {
            let mut entry = entry.map_err(archive_err)?;
            let entry_path = entry.path().map_err(archive_err)?;
            let matches = entry_path == Path::new(member)
                || entry_path
                    .file_name()
                    .map(|n| n.to_string_lossy() == wanted)
                    .unwrap_or(false);
            if !matches {
                continue;
            }

            fs::create_dir_all(&self.extract_dir).map_err(archive_err)?;
            let dest = self.extract_dir.join(&wanted);
            entry.unpack(&dest).map_err(archive_err)?;
            return Ok(ExtractedMember { path: dest });
        }

        Err(ExtractionError::MissingMember {
            archive: self.archive.clone(),
            member: member.to_string(),
        })
    }
}

impl ExtractedMember {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the extracted member for buffered reading.
    pub fn reader(&self) -> io::Result<BufReader<File>> {
        File::open(&self.path).map(BufReader::new)
    }
}

impl Drop for ExtractedMember {
    fn drop(&mut self) {
        log::debug!("Deleting extracted member {}", self.path.display());
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Could not delete {}: {e}", self.path.display());
        }
    }
}

/// Build a small `.tar.gz` with the given members, for tests across the crate.
#[cfg(test)]
pub(crate) fn write_archive(dir: &Path, name: &str, members: &[(&str, &str)]) -> PathBuf {
    use flate2::{write::GzEncoder, Compression};

    let path = dir.join(name);
    let gz = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut tar = tar::Builder::new(gz);
    for (member, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, member, content.as_bytes())
            .unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap();
    path
}
