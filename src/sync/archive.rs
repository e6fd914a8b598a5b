//! Single-entry ZIP staging for changed files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};
use thiserror::Error;

use super::report::FileIssue;
use super::scan::Candidate;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// One changed file staged for delivery.
///
/// The archive at `archive_path` is temporary and owned by this job until the
/// run's finalizing step deletes it.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub file_name: String,
    pub archive_path: PathBuf,
    /// Compressed size in bytes.
    pub size_bytes: u64,
    pub source_bytes: u64,
    pub modified: DateTime<Local>,
}

impl ArchiveJob {
    pub fn size_mib(&self) -> f64 {
        self.size_bytes as f64 / MIB
    }

    /// Modification time as shown to recipients, `DD.MM HH:MM`.
    pub fn modified_label(&self) -> String {
        self.modified.format("%d.%m %H:%M").to_string()
    }

    /// Caption attached to the delivered file.
    pub fn caption(&self) -> String {
        format!("{} - {}", self.file_name, self.modified_label())
    }

    pub fn archive_name(&self) -> String {
        format!("{}.zip", self.file_name)
    }
}

#[derive(Debug, Default)]
pub struct Archived {
    pub jobs: Vec<ArchiveJob>,
    pub issues: Vec<FileIssue>,
}

fn zip_timestamp(t: &DateTime<Local>) -> zip::DateTime {
    let converted = u16::try_from(t.year()).ok().and_then(|year| {
        zip::DateTime::from_date_and_time(
            year,
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
        )
        .ok()
    });
    converted.unwrap_or_default()
}

fn write_zip(
    source: &Path,
    entry_name: &str,
    modified: &DateTime<Local>,
    source_bytes: u64,
    dest: &Path,
) -> Result<u64, ArchiveError> {
    let mut input = File::open(source)?;
    let output = BufWriter::new(File::create(dest)?);

    let mut zip = zip::ZipWriter::new(output);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip_timestamp(modified))
        .large_file(source_bytes >= u64::from(u32::MAX));
    zip.start_file(entry_name, options)?;
    std::io::copy(&mut input, &mut zip)?;
    let mut output = zip.finish()?;
    output.flush()?;
    drop(output);

    Ok(std::fs::metadata(dest)?.len())
}

/// Compress `candidate` into `<scratch_dir>/<name>.zip`.
///
/// The archive holds a single entry named after the source's base filename.
/// A partially written archive is removed before the error is returned.
pub fn archive_file(candidate: &Candidate, scratch_dir: &Path) -> Result<ArchiveJob, ArchiveError> {
    let metadata = std::fs::metadata(&candidate.path)?;
    let modified: DateTime<Local> = metadata.modified()?.into();
    let source_bytes = metadata.len();

    std::fs::create_dir_all(scratch_dir)?;
    let archive_path = scratch_dir.join(format!("{}.zip", candidate.name));

    let size_bytes = match write_zip(
        &candidate.path,
        &candidate.name,
        &modified,
        source_bytes,
        &archive_path,
    ) {
        Ok(size) => size,
        Err(e) => {
            let _ = std::fs::remove_file(&archive_path);
            return Err(e);
        }
    };

    let job = ArchiveJob {
        file_name: candidate.name.clone(),
        archive_path,
        size_bytes,
        source_bytes,
        modified,
    };

    let ratio = if source_bytes > 0 {
        (1.0 - size_bytes as f64 / source_bytes as f64) * 100.0
    } else {
        0.0
    };
    tracing::info!(
        "Compressed {}: {:.2}MB -> {:.2}MB ({:.1}%)",
        job.file_name,
        source_bytes as f64 / MIB,
        job.size_mib(),
        ratio
    );
    Ok(job)
}

/// Archive every changed file, collecting failures instead of stopping.
pub fn archive_all(changed: &[Candidate], scratch_dir: &Path) -> Archived {
    let mut archived = Archived::default();
    for candidate in changed {
        match archive_file(candidate, scratch_dir) {
            Ok(job) => archived.jobs.push(job),
            Err(e) => {
                tracing::error!("Failed to create ZIP archive for {}: {}", candidate.name, e);
                archived.issues.push(FileIssue::new(
                    &candidate.name,
                    format!("archive failed: {}", e),
                ));
            }
        }
    }
    archived
}

/// Delete the temporary archives of `jobs`. Failures are logged, never raised.
///
/// Returns the number of archives removed.
pub fn remove_archives(jobs: &[ArchiveJob]) -> usize {
    let mut removed = 0;
    for job in jobs {
        match std::fs::remove_file(&job.archive_path) {
            Ok(()) => {
                removed += 1;
                tracing::debug!("Removed temporary archive {}", job.archive_path.display());
            }
            Err(e) => tracing::error!(
                "Failed to remove temporary archive {}: {}",
                job.archive_path.display(),
                e
            ),
        }
    }
    removed
}
