use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use cinema_listings::error::Result as ScraperResult;
use cinema_listings::orchestrator::{Orchestrator, OrchestratorSettings, RunRequest};
use cinema_listings::output::write_output;
use cinema_listings::registry::UnitRegistry;
use cinema_listings::types::{Cinema, CinemaCatalog, DateRange, ExtractionUnit, RawEventRecord};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct FixtureUnit {
    cinema_id: &'static str,
    records: Vec<Value>,
}

#[async_trait]
impl ExtractionUnit for FixtureUnit {
    fn cinema_id(&self) -> &str {
        self.cinema_id
    }

    async fn discover(&self, _range: &DateRange) -> ScraperResult<Vec<RawEventRecord>> {
        Ok(self
            .records
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect())
    }
}

async fn sample_run() -> Result<(cinema_listings::orchestrator::RunOutput, Arc<CinemaCatalog>)> {
    let mut rio = Cinema::new("rio", "Rio Cinema");
    rio.address = "107 Kingsland High Street".into();
    let catalog = Arc::new(CinemaCatalog::from_cinemas(vec![
        rio,
        Cinema::new("empty", "Empty Screen"),
        Cinema::new("unused", "Not Requested"),
    ])?);

    let mut registry = UnitRegistry::new();
    registry.register(Arc::new(FixtureUnit {
        cinema_id: "rio",
        records: vec![
            json!({"title": "Paris, Texas", "start": "2024-06-01T18:00:00", "session_id": "1"}),
            json!({"title": "Stalker", "start": "2024-06-02T20:30:00", "session_id": "2"}),
        ],
    }));
    registry.register(Arc::new(FixtureUnit {
        cinema_id: "empty",
        records: Vec::new(),
    }));

    let orchestrator = Orchestrator::new(
        catalog.clone(),
        registry,
        OrchestratorSettings {
            parallelism: 2,
            unit_timeout: Duration::from_secs(5),
        },
    );
    let range = DateRange::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 3)?;
    let output = orchestrator.run(&RunRequest::all(range)).await?;
    Ok((output, catalog))
}

#[tokio::test]
async fn test_listings_document_shape() -> Result<()> {
    let (output, catalog) = sample_run().await?;
    let dir = tempdir()?;
    let path = dir.path().join("out").join("listings.json");

    write_output(&path, &output, &catalog)?;

    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(doc["total_screenings"], 2);
    assert_eq!(doc["stats"]["rio"], 2);
    assert_eq!(doc["stats"]["empty"], 0);
    assert!(doc["stats"].get("unused").is_none());
    assert_eq!(doc["summary"]["status"], "succeeded");

    let cinemas = doc["cinemas"].as_array().unwrap();
    assert_eq!(cinemas.len(), 2);
    assert!(cinemas.iter().any(|c| c["address"] == "107 Kingsland High Street"));

    let screenings = doc["screenings"].as_array().unwrap();
    assert_eq!(screenings[0]["film_title"], "Paris, Texas");
    assert_eq!(screenings[0]["start_time"], "2024-06-01T18:00:00+01:00");
    assert_eq!(screenings[1]["film_title"], "Stalker");
    Ok(())
}

#[tokio::test]
async fn test_write_replaces_previous_file_and_leaves_no_temp() -> Result<()> {
    let (output, catalog) = sample_run().await?;
    let dir = tempdir()?;
    let path = dir.path().join("listings.json");
    std::fs::write(&path, "stale")?;

    write_output(&path, &output, &catalog)?;

    let written = std::fs::read_to_string(&path)?;
    assert!(written.starts_with('{'));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["listings.json".to_string()]);
    Ok(())
}
