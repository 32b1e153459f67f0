//! Issue detection framework
//!
//! A registry of detectors, each implementing an event-triggered check
//! and/or a scheduled per-tenant scan, an engine that persists findings
//! with de-duplication and fires alert-dispatch jobs, and the scheduler
//! that registers scan and retention cron jobs.

pub mod detectors;
pub mod engine;
pub mod registry;
pub mod retention;
pub mod scheduler;

pub use engine::DetectionEngine;
pub use registry::{default_registry, Detector, DetectionError, DetectionResult, DetectorRegistry};
pub use retention::run_retention;
pub use scheduler::ScanScheduler;
