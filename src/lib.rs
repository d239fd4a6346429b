pub mod config;
pub mod daemon;
pub mod exclusive;
pub mod notify;
pub mod probe;
pub mod process_monitor;
pub mod record;
pub mod supervisor;
pub mod timer;
pub mod utils;
