//! In-memory machine and scanner sharing one simulated print bed.
//!
//! The machine keeps a bounded command queue. Once the program runs, each
//! scanner acquisition advances the machine by one queued print move, which
//! deposits a bead into the height map. The scanner then samples the height
//! map along its profile line at the new pose.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use image::{ImageBuffer, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::correct::MaterialModel;
use crate::machine::{
    MachineError, MachineResult, MotionCommand, MotionController, Pose, ScanSample, Scanner,
};
use crate::plan::{for_each_pixel_in_capsule, Raster};
use crate::scan::{sample_position, ScanConfig};

/// Height map of the bed (mm per pixel).
pub type HeightMap = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Command queue capacity in lines.
    pub queue_capacity_lines: usize,
    /// Samples per scanner profile.
    pub profile_samples: usize,
    /// Scanner geometry (offset and width are used).
    pub scan: ScanConfig,
    /// True material response.
    pub model: MaterialModel,
    /// Added to every deposited width (mm).
    pub width_bias_mm: f64,
    /// Bead height (mm).
    pub bead_height_mm: f64,
    /// Uniform profile noise amplitude (mm).
    pub noise_mm: f64,
    pub seed: u64,
    /// Fail every acquisition after this many.
    pub scan_fault_after: Option<usize>,
    /// Sleep when an acquisition finds nothing to execute.
    pub idle_sleep: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            queue_capacity_lines: 64,
            profile_samples: 240,
            scan: ScanConfig::default(),
            model: MaterialModel::default(),
            width_bias_mm: 0.0,
            bead_height_mm: 0.4,
            noise_mm: 0.0,
            seed: 7,
            scan_fault_after: None,
            idle_sleep: Duration::from_micros(200),
        }
    }
}

/// Counters of a simulated run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub acquisitions: usize,
    pub print_moves: usize,
    pub deposits: usize,
}

#[derive(Debug)]
struct SimState {
    heights: HeightMap,
    pose: Pose,
    queue: VecDeque<MotionCommand>,
    queued_lines: usize,
    queue_mode: bool,
    running: bool,
    extruder_on: bool,
    scanner_attached: bool,
    stats: SimStats,
    rng: StdRng,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    raster: Raster,
    config: SimConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, st: &mut SimState, cmd: &MotionCommand) -> bool {
        match cmd {
            MotionCommand::Print(w) => {
                if st.extruder_on && w.extrusion > 0.0 {
                    let width = self.config.model.width(w.extrusion, w.feed)
                        + self.config.width_bias_mm;
                    let from = st.pose.xy();
                    self.deposit(st, from, w.xy(), width);
                }
                st.pose = Pose {
                    x: w.x,
                    y: w.y,
                    z: w.z,
                    theta: w.theta,
                };
                st.stats.print_moves += 1;
                true
            }
            MotionCommand::Rapid { x, y, z } => {
                st.pose.x = *x;
                st.pose.y = *y;
                st.pose.z = *z;
                false
            }
            MotionCommand::Extrude(_) | MotionCommand::Raw(_) => false,
        }
    }

    fn deposit(&self, st: &mut SimState, from: [f64; 2], to: [f64; 2], width: f64) {
        if width <= 0.0 {
            return;
        }
        let r = &self.raster;
        let (w, h) = r.dimensions();
        let radius = r.mm_to_px_len(width / 2.0);
        let height = self.config.bead_height_mm as f32;
        let heights = &mut st.heights;
        for_each_pixel_in_capsule(w, h, r.mm_to_px(from), r.mm_to_px(to), radius, |c, row| {
            let p = heights.get_pixel_mut(c, row);
            p[0] = p[0].max(height);
        });
        st.stats.deposits += 1;
    }

    fn pop(&self, st: &mut SimState) -> Option<MotionCommand> {
        let cmd = st.queue.pop_front()?;
        st.queued_lines -= cmd.line_count();
        Some(cmd)
    }

    /// Execute queued commands up to and including the next print move.
    fn advance(&self, st: &mut SimState) -> bool {
        if !st.running {
            return false;
        }
        while let Some(cmd) = self.pop(st) {
            if self.apply(st, &cmd) {
                return true;
            }
        }
        false
    }

    /// Execute leading non-print commands; everything if no scanner drives
    /// the machine any more.
    fn settle(&self, st: &mut SimState) {
        if !st.running {
            return;
        }
        if !st.scanner_attached {
            while self.advance(st) {}
            return;
        }
        while matches!(st.queue.front(), Some(c) if !matches!(c, MotionCommand::Print(_))) {
            if let Some(cmd) = self.pop(st) {
                self.apply(st, &cmd);
            }
        }
    }
}

/// A simulated print bed. Hand out one [`SimMachine`] and one [`SimScanner`].
#[derive(Debug, Clone)]
pub struct SimBench {
    shared: Arc<Shared>,
}

impl SimBench {
    pub fn new(raster: Raster, config: SimConfig) -> Self {
        let state = SimState {
            heights: ImageBuffer::new(raster.width_px, raster.height_px),
            pose: Pose {
                x: raster.origin[0],
                y: raster.origin[1],
                z: 0.0,
                theta: 0.0,
            },
            queue: VecDeque::new(),
            queued_lines: 0,
            queue_mode: false,
            running: false,
            extruder_on: false,
            scanner_attached: false,
            stats: SimStats::default(),
            rng: StdRng::seed_from_u64(config.seed),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                raster,
                config,
            }),
        }
    }

    pub fn machine(&self) -> SimMachine {
        SimMachine {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The scanner; the machine advances on its acquisitions while it is
    /// alive, and on queue polls once it has been dropped.
    pub fn scanner(&self) -> SimScanner {
        self.shared.lock().scanner_attached = true;
        SimScanner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Copy of the deposited height map.
    pub fn heights(&self) -> HeightMap {
        self.shared.lock().heights.clone()
    }

    pub fn stats(&self) -> SimStats {
        self.shared.lock().stats
    }

    pub fn pose(&self) -> Pose {
        self.shared.lock().pose
    }
}

/// Simulated motion controller.
#[derive(Debug)]
pub struct SimMachine {
    shared: Arc<Shared>,
}

impl MotionController for SimMachine {
    fn execute(&mut self, command: &MotionCommand) -> MachineResult<()> {
        let mut st = self.shared.lock();
        if !st.queue_mode {
            self.shared.apply(&mut st, command);
            return Ok(());
        }
        let lines = command.line_count();
        self.shared.settle(&mut st);
        if st.queued_lines + lines > self.shared.config.queue_capacity_lines {
            return Err(MachineError::BufferFull);
        }
        st.queue.push_back(command.clone());
        st.queued_lines += lines;
        Ok(())
    }

    fn queue_line_count(&mut self) -> MachineResult<usize> {
        let mut st = self.shared.lock();
        self.shared.settle(&mut st);
        Ok(st.queued_lines)
    }

    fn queue_line_capacity(&mut self) -> MachineResult<usize> {
        Ok(self.shared.config.queue_capacity_lines)
    }

    fn initialize_queue(&mut self) -> MachineResult<()> {
        self.shared.lock().queue_mode = true;
        Ok(())
    }

    fn program_start(&mut self) -> MachineResult<()> {
        self.shared.lock().running = true;
        Ok(())
    }

    fn program_pause(&mut self) -> MachineResult<()> {
        self.shared.lock().running = false;
        Ok(())
    }

    fn program_stop(&mut self) -> MachineResult<()> {
        let mut st = self.shared.lock();
        st.running = false;
        st.queue_mode = false;
        st.queue.clear();
        st.queued_lines = 0;
        Ok(())
    }

    fn set_motion_enabled(&mut self, _enabled: bool) -> MachineResult<()> {
        Ok(())
    }

    fn set_extruder_enabled(&mut self, enabled: bool) -> MachineResult<()> {
        self.shared.lock().extruder_on = enabled;
        Ok(())
    }
}

/// Simulated line scanner.
#[derive(Debug)]
pub struct SimScanner {
    shared: Arc<Shared>,
}

impl Scanner for SimScanner {
    fn acquire(&mut self) -> MachineResult<ScanSample> {
        let shared = &self.shared;
        let cfg = &shared.config;
        let (sample, moved) = {
            let mut st = shared.lock();
            if cfg.scan_fault_after.is_some_and(|n| st.stats.acquisitions >= n) {
                return Err(MachineError::fault(-1, "scanner trigger timeout"));
            }
            st.stats.acquisitions += 1;
            let moved = shared.advance(&mut st);
            let pose = st.pose;
            let n = cfg.profile_samples;
            let mut profile = Vec::with_capacity(n);
            for i in 0..n {
                let xy = sample_position(&pose, i, n, &cfg.scan);
                let mut h = shared
                    .raster
                    .pixel_at(xy)
                    .map_or(0.0, |(c, r)| st.heights.get_pixel(c, r)[0] as f64);
                if cfg.noise_mm > 0.0 {
                    h += st.rng.gen_range(-cfg.noise_mm..=cfg.noise_mm);
                }
                profile.push(h);
            }
            (ScanSample { profile, pose }, moved)
        };
        if !moved {
            thread::sleep(cfg.idle_sleep);
        } else {
            trace!(x = sample.pose.x, y = sample.pose.y, "sim move");
        }
        Ok(sample)
    }
}

impl Drop for SimScanner {
    fn drop(&mut self) {
        self.shared.lock().scanner_attached = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Waypoint;
    use approx::assert_relative_eq;

    fn raster() -> Raster {
        Raster {
            origin: [0.0, 0.0],
            mm_per_px: 0.1,
            width_px: 200,
            height_px: 100,
            mask_width_mm: 3.0,
        }
    }

    fn print_to(x: f64, y: f64) -> MotionCommand {
        MotionCommand::Print(Waypoint {
            feed: 2.0,
            extrusion: 3.0,
            width: 1.5,
            ..Waypoint::at(x, y, 0.4)
        })
    }

    #[test]
    fn queue_rejects_when_full() {
        let bench = SimBench::new(
            raster(),
            SimConfig {
                queue_capacity_lines: 4,
                ..SimConfig::default()
            },
        );
        let mut m = bench.machine();
        m.initialize_queue().unwrap();
        m.execute(&print_to(1.0, 5.0)).unwrap();
        m.execute(&print_to(2.0, 5.0)).unwrap();
        assert_eq!(m.execute(&print_to(3.0, 5.0)), Err(MachineError::BufferFull));
        assert_eq!(m.queue_line_count().unwrap(), 4);
    }

    #[test]
    fn acquisition_advances_one_move_and_deposits() {
        let bench = SimBench::new(raster(), SimConfig::default());
        let mut m = bench.machine();
        let mut s = bench.scanner();
        m.execute(&MotionCommand::Rapid {
            x: 5.0,
            y: 5.0,
            z: 0.4,
        })
        .unwrap();
        m.initialize_queue().unwrap();
        m.set_extruder_enabled(true).unwrap();
        m.execute(&print_to(10.0, 5.0)).unwrap();
        m.execute(&print_to(15.0, 5.0)).unwrap();
        let idle = s.acquire().unwrap();
        assert_eq!(idle.pose.x, 5.0);
        m.program_start().unwrap();
        let first = s.acquire().unwrap();
        assert_eq!(first.pose.x, 10.0);
        assert_eq!(m.queue_line_count().unwrap(), 2);
        let heights = bench.heights();
        // 1.5 mm wide bead centred on row 50
        assert_relative_eq!(heights.get_pixel(80, 50)[0], 0.4, epsilon = 1e-6);
        assert_relative_eq!(heights.get_pixel(80, 57)[0], 0.4, epsilon = 1e-6);
        assert_eq!(heights.get_pixel(80, 59)[0], 0.0);
        assert_eq!(bench.stats().print_moves, 1);
    }

    #[test]
    fn profile_sees_bead_behind_nozzle() {
        let cfg = SimConfig {
            scan: ScanConfig {
                scan_offset_mm: 3.0,
                scan_width_mm: 6.0,
                ..ScanConfig::default()
            },
            profile_samples: 61,
            ..SimConfig::default()
        };
        let bench = SimBench::new(raster(), cfg);
        let mut m = bench.machine();
        let mut s = bench.scanner();
        m.execute(&MotionCommand::Rapid {
            x: 2.0,
            y: 5.0,
            z: 0.4,
        })
        .unwrap();
        m.initialize_queue().unwrap();
        m.set_extruder_enabled(true).unwrap();
        m.execute(&print_to(12.0, 5.0)).unwrap();
        m.program_start().unwrap();
        let sample = s.acquire().unwrap();
        // scan line at x = 9, y from 2 to 8; bead covers y 4.25..5.75
        // heights are stored as f32
        assert_relative_eq!(sample.profile[30], 0.4, epsilon = 1e-6);
        assert_eq!(sample.profile[0], 0.0);
        assert_eq!(sample.profile[60], 0.0);
    }

    #[test]
    fn polls_drain_queue_once_scanner_is_gone() {
        let bench = SimBench::new(raster(), SimConfig::default());
        let mut m = bench.machine();
        drop(bench.scanner());
        m.initialize_queue().unwrap();
        m.execute(&print_to(10.0, 5.0)).unwrap();
        m.execute(&MotionCommand::Extrude(0.0)).unwrap();
        m.program_start().unwrap();
        assert_eq!(m.queue_line_count().unwrap(), 0);
        assert_eq!(bench.pose().x, 10.0);
    }

    #[test]
    fn scanner_fault_injection() {
        let bench = SimBench::new(
            raster(),
            SimConfig {
                scan_fault_after: Some(1),
                ..SimConfig::default()
            },
        );
        let mut s = bench.scanner();
        assert!(s.acquire().is_ok());
        assert!(matches!(s.acquire(), Err(MachineError::Fault { .. })));
    }
}
