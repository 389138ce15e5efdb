pub mod fetch_cache;
pub mod http_client;
