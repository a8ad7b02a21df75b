pub mod adaptation;
pub mod classifier;
pub mod config;
pub mod console_display;
pub mod coordinator;
pub mod crossfade;
pub mod data_logger;
pub mod drive_log;
pub mod error;
pub mod geo;
pub mod library;
pub mod mode;
pub mod osc_sender;
pub mod pipeline;
pub mod playback;
pub mod random;
pub mod selector;
pub mod sensors;
pub mod simulator;
pub mod smoother;
pub mod types;
