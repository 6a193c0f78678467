pub mod entities;
pub mod fetcher;
pub mod m3u_parser;
pub mod metrics;
pub mod source_cache;
pub mod stream_forwarder;
pub mod xmltv_parser;
