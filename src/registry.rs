use crate::apis::barbican::BarbicanCrawler;
use crate::apis::prince_charles::PrinceCharlesCrawler;
use crate::apis::rio::RioCrawler;
use crate::apis::UnitContext;
use crate::constants::*;
use crate::types::{Cinema, CinemaCatalog, ExtractionUnit};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Create the built-in unit for a configured cinema
pub fn create_unit(cinema: &Cinema, ctx: &UnitContext) -> Option<Arc<dyn ExtractionUnit>> {
    match cinema.id.as_str() {
        RIO_CINEMA => Some(Arc::new(RioCrawler::new(ctx.clone()))),
        PRINCE_CHARLES_CINEMA => Some(Arc::new(PrinceCharlesCrawler::new(ctx.clone()))),
        BARBICAN_CINEMA => Some(Arc::new(
            BarbicanCrawler::new(ctx.clone()).with_timezone(cinema.timezone),
        )),
        _ => None,
    }
}

/// Extraction units keyed by the cinema they produce records for
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: HashMap<String, Arc<dyn ExtractionUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit under its own cinema id, replacing any previous one
    pub fn register(&mut self, unit: Arc<dyn ExtractionUnit>) {
        self.units.insert(unit.cinema_id().to_string(), unit);
    }

    pub fn get(&self, cinema_id: &str) -> Option<Arc<dyn ExtractionUnit>> {
        self.units.get(cinema_id).cloned()
    }

    pub fn contains(&self, cinema_id: &str) -> bool {
        self.units.contains_key(cinema_id)
    }

    /// Registered cinema ids, sorted
    pub fn cinema_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.units.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Registry holding the built-in unit of every supported cinema in `catalog`
pub fn build_default_registry(ctx: &UnitContext, catalog: &CinemaCatalog) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    for cinema_id in get_supported_cinemas() {
        let Some(cinema) = catalog.get(cinema_id) else {
            debug!("{} is not configured, skipping its unit", cinema_id);
            continue;
        };
        if let Some(unit) = create_unit(cinema, ctx) {
            registry.register(unit);
        }
    }
    registry
}
