/// Cinema ids for the built-in extraction units.
/// These must match the `id` of the corresponding `[[cinemas]]` entry in config.toml.
pub const RIO_CINEMA: &str = "rio";
pub const PRINCE_CHARLES_CINEMA: &str = "prince-charles-cinema";
pub const BARBICAN_CINEMA: &str = "barbican-cinema";

pub const RIO_BASE_URL: &str = "https://riocinema.org.uk";
pub const PRINCE_CHARLES_BASE_URL: &str = "https://princecharlescinema.com";
pub const BARBICAN_API_BASE: &str = "https://spektrix.barbican.org.uk/barbicancentre/api/v3";
pub const BARBICAN_WEB_BASE: &str = "https://www.barbican.org.uk";

/// Timezone applied when cinema metadata does not name one.
pub const DEFAULT_TIMEZONE: &str = "Europe/London";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "CINEMA_LISTINGS_CONFIG";
pub const METRICS_PORT_ENV: &str = "CINEMA_METRICS_PORT";

/// Get all cinema ids that ship with an extraction unit
pub fn get_supported_cinemas() -> Vec<&'static str> {
    vec![RIO_CINEMA, PRINCE_CHARLES_CINEMA, BARBICAN_CINEMA]
}
