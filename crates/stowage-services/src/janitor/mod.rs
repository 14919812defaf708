//! Background garbage collection of abandoned uploads

mod service;

pub use service::{JanitorConfig, JanitorReport, JanitorService};
