//! Raw record vocabulary. Each slot lists the keys consulted, first match wins.

pub const TITLE: &[&str] = &["title", "film_title", "name", "event_name"];
pub const START: &[&str] = &["start", "start_time", "startDate", "datetime", "starts_at"];
pub const DATE: &[&str] = &["date", "event_day", "day"];
pub const TIME: &[&str] = &["time", "start_time", "showtime"];
pub const END: &[&str] = &["end", "end_time", "endDate"];
pub const RUNTIME: &[&str] = &["runtime_minutes", "runtime", "duration_minutes"];
pub const BOOKING: &[&str] = &["booking_url", "url", "ticket_url", "link"];
pub const SESSION: &[&str] = &["session_id", "provider_session_id", "performance_id", "instance_id"];
pub const VENUE: &[&str] = &["venue", "venue_label", "location"];
pub const SCREEN: &[&str] = &["screen", "screen_label", "auditorium"];
pub const LABELS: &[&str] = &["labels", "tags", "notes", "format", "formats"];
