pub mod backup;
pub mod clean;
pub mod config;
pub mod errors;
pub mod logger;
pub mod report;
pub mod restore;
pub mod state;
pub mod stats;
pub mod uploader;
pub mod util;
pub mod walker;
