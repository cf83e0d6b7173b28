//! Simulated print bed for demos and end-to-end tests.
//!
//! [`SimBench`] implements both machine interfaces over one shared state, and
//! [`serpentine_plan`] builds a matching demo plan.

mod bench;
mod fixture;

pub use bench::{HeightMap, SimBench, SimConfig, SimMachine, SimScanner, SimStats};
pub use fixture::{serpentine_plan, SerpentineSpec};
