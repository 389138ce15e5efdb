use crate::error::Result;
use crate::orchestrator::{RunOutput, RunSummary};
use crate::types::{Cinema, CinemaCatalog, Screening};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// JSON document written at the end of a run
#[derive(Debug, Serialize)]
pub struct ListingsDocument<'a> {
    pub generated_at: DateTime<Utc>,
    pub total_screenings: usize,
    /// Metadata for every cinema that appears in the summary
    pub cinemas: Vec<&'a Cinema>,
    /// Screening count per cinema id
    pub stats: BTreeMap<&'a str, usize>,
    pub summary: &'a RunSummary,
    pub screenings: &'a [Screening],
}

impl<'a> ListingsDocument<'a> {
    pub fn new(output: &'a RunOutput, catalog: &'a CinemaCatalog) -> Self {
        let mut stats: BTreeMap<&str, usize> = output
            .summary
            .units
            .iter()
            .map(|unit| (unit.cinema_id.as_str(), 0))
            .collect();
        for screening in &output.screenings {
            *stats.entry(screening.cinema_id.as_str()).or_default() += 1;
        }

        let cinemas = stats
            .keys()
            .filter_map(|id| catalog.get(id).map(|c| c.as_ref()))
            .collect();

        Self {
            generated_at: Utc::now(),
            total_screenings: output.screenings.len(),
            cinemas,
            stats,
            summary: &output.summary,
            screenings: &output.screenings,
        }
    }
}

/// Serialize the run to `path`. The document is written to a sibling temp file
/// and renamed into place, so readers never observe a partial file.
pub fn write_output(path: &Path, output: &RunOutput, catalog: &CinemaCatalog) -> Result<()> {
    let document = ListingsDocument::new(output, catalog);
    let json = serde_json::to_vec_pretty(&document)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "listings.json".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    info!(
        "Wrote {} screenings to {}",
        output.screenings.len(),
        path.display()
    );
    Ok(())
}
