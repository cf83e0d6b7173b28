//! Closed-loop print pipeline.
//!
//! Four long-lived stage threads connected by ordered channels:
//!
//! ```text
//! print ──start──▶ scan ──ScanMsg──▶ extract ──ErrorMsg──▶ correct ──PathMsg──▶ print
//! ```
//!
//! The print stream owns the machine and releases the scan stage once the
//! machine is positioned. Scan owns the scanner. Error extraction is the only
//! writer of segment measurements. Correction decides what is streamed next.
//! Nothing is shared between stages except the read-only plan data and the
//! write-once measurement slots of the segment store.

mod result;
mod run;


pub use result::{RunOutput, RunReport};
pub use run::run_pipeline;
