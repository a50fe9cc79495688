pub mod audit;
pub mod compaction;
pub mod config;
pub mod errors;
pub mod gates;
pub mod init;
pub mod lock;
pub mod logging;
pub mod mend_config;
pub mod orchestrator;
pub mod parser;
pub mod tokens;
pub mod ui;
pub mod util;
