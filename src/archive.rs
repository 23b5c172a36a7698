use std::io::{Cursor, Read};

use tracing::{debug, info};

use crate::error::AnalysisError;

/// A CSV file pulled out of an uploaded archive.
#[derive(Debug, Clone)]
pub struct CsvEntry {
    pub source_name: String,
    pub data: Vec<u8>,
}

fn is_csv_entry(name: &str) -> bool {
    !name.starts_with("__MACOSX/") && name.to_ascii_lowercase().ends_with(".csv")
}

/// Returns the `.csv` entries of a ZIP archive in archive order. At most
/// `max_bytes` are decompressed across all entries; header sizes are not trusted.
pub fn extract_csv_entries(archive: &[u8], max_bytes: u64) -> Result<Vec<CsvEntry>, AnalysisError> {
    let mut zip =
        zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| AnalysisError::Archive {
            message: format!("Failed to open ZIP archive: {}", e),
        })?;

    let mut entries = Vec::new();
    let mut decompressed: u64 = 0;
    for index in 0..zip.len() {
        let mut file = zip.by_index(index).map_err(|e| AnalysisError::Archive {
            message: format!("Failed to read archive entry {}: {}", index, e),
        })?;

        let name = file.name().to_string();
        if file.is_dir() || !is_csv_entry(&name) {
            debug!("Skipping archive entry '{}'", name);
            continue;
        }

        let remaining = max_bytes - decompressed;
        let mut data = Vec::new();
        (&mut file)
            .take(remaining.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| AnalysisError::Archive {
                message: format!("Failed to decompress '{}': {}", name, e),
            })?;
        if data.len() as u64 > remaining {
            return Err(AnalysisError::Archive {
                message: format!(
                    "Archive expands beyond the {} byte limit at '{}'",
                    max_bytes, name
                ),
            });
        }
        decompressed += data.len() as u64;

        entries.push(CsvEntry {
            source_name: name,
            data,
        });
    }

    info!("Extracted {} CSV entries from archive", entries.len());
    Ok(entries)
}
