pub mod config;
pub mod coords;
pub mod encoding;
pub mod error_codes;
pub mod filter_script;
pub mod graph;
pub mod interval;
pub mod pipeline;
pub mod request;
pub mod schema;
pub mod tempo;
