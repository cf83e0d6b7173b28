//! Print-stream stage: feed released segments into the machine's bounded
//! command queue.
//!
//! The stage owns the machine. It prepares the machine, releases the scan
//! stage through the start signal, streams every segment as print commands,
//! retries locally whenever the queue is full, and shuts the machine down
//! once the queue has drained.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Consumer, Producer};
use crate::error::{PipelineError, Result};
use crate::machine::{MachineError, MachineResult, MotionCommand, MotionController};
use crate::message::PathMsg;
use crate::plan::{PrintDir, Waypoint};

const STAGE: &str = "print";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sleep (ms) before resubmitting a command rejected for a full queue.
    pub retry_delay_ms: u64,
    /// Start the program once the queued lines exceed `capacity - start_margin_lines`.
    pub start_margin_lines: usize,
    /// Start the program after this many segments have been loaded, even if
    /// the queue is not yet near capacity.
    pub start_after_segments: usize,
    /// Free queue lines required before the post-print sequence is loaded.
    pub post_print_room_lines: usize,
    /// Poll interval (ms) while waiting for queue room or drain.
    pub drain_poll_ms: u64,
    /// Enable the extruder for the print.
    pub extrude: bool,
    /// Approach distance (mm) before the first waypoint.
    pub leadin_mm: f64,
    /// Non-printing move (mm) past the final waypoint.
    pub leadout_mm: f64,
    /// Height (mm) above the print for rapid moves.
    pub clearance_mm: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 10,
            start_margin_lines: 10,
            start_after_segments: 1,
            post_print_room_lines: 100,
            drain_poll_ms: 10,
            extrude: true,
            leadin_mm: 2.0,
            leadout_mm: 6.0,
            clearance_mm: 5.0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, v) in [
            ("leadin_mm", self.leadin_mm),
            ("leadout_mm", self.leadout_mm),
            ("clearance_mm", self.clearance_mm),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("stream.{name} must be finite and >= 0"));
            }
        }
        if self.start_after_segments == 0 {
            return Err("stream.start_after_segments must be > 0".to_string());
        }
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

/// Counters of one print-stream run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Segment indices in the order they were loaded.
    pub segments: Vec<usize>,
    /// Print commands submitted.
    pub print_commands: usize,
    /// Submissions rejected for a full queue and retried.
    pub buffer_full_retries: usize,
    /// Queued line count (local bookkeeping) when the program was started.
    pub started_at_lines: Option<usize>,
}

struct Streamer<'a, M> {
    machine: M,
    config: &'a StreamConfig,
    summary: StreamSummary,
    queued_lines: usize,
    capacity: usize,
    started: bool,
}

impl<M: MotionController> Streamer<'_, M> {
    /// Run a machine call; any failure is fatal.
    fn call<T>(&mut self, what: &str, f: impl FnOnce(&mut M) -> MachineResult<T>) -> Result<T> {
        f(&mut self.machine).map_err(|e| {
            error!(error = %e, "{what} failed");
            PipelineError::machine(STAGE, e)
        })
    }

    /// Submit a command, retrying for as long as the queue reports full.
    fn submit(&mut self, cmd: &MotionCommand) -> Result<()> {
        loop {
            match self.machine.execute(cmd) {
                Ok(()) => {
                    self.queued_lines += cmd.line_count();
                    return Ok(());
                }
                Err(MachineError::BufferFull) => {
                    self.summary.buffer_full_retries += 1;
                    if !self.started {
                        // nothing drains a full queue until the program runs
                        self.start()?;
                    }
                    trace!("command queue full, retrying");
                    thread::sleep(self.config.retry_delay());
                }
                Err(e) => {
                    error!(error = %e, command = %cmd, "command rejected");
                    return Err(PipelineError::machine(STAGE, e));
                }
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.call("program start", |m| m.program_start())?;
        self.started = true;
        self.summary.started_at_lines = Some(self.queued_lines);
        info!(queued_lines = self.queued_lines, "program started");
        Ok(())
    }

    fn pre_print(&mut self, first: &Waypoint, direction: PrintDir) -> Result<()> {
        let u = direction.unit();
        let x = first.x - u[0] * self.config.leadin_mm;
        let y = first.y - u[1] * self.config.leadin_mm;
        let commands = [
            MotionCommand::Raw("G90".to_string()),
            MotionCommand::Rapid {
                x,
                y,
                z: first.z + self.config.clearance_mm,
            },
            MotionCommand::Rapid { x, y, z: first.z },
        ];
        for cmd in &commands {
            self.call("pre-print", |m| m.execute(cmd))?;
        }
        Ok(())
    }

    fn post_print(&mut self, last: &Waypoint, direction: PrintDir) -> Result<()> {
        let u = direction.unit();
        let out = Waypoint {
            x: last.x + u[0] * self.config.leadout_mm,
            y: last.y + u[1] * self.config.leadout_mm,
            extrusion: 0.0,
            ..*last
        };
        let commands = [
            MotionCommand::Extrude(0.0),
            MotionCommand::Print(out),
            MotionCommand::Rapid {
                x: out.x,
                y: out.y,
                z: out.z + self.config.clearance_mm,
            },
        ];
        for cmd in &commands {
            self.submit(cmd)?;
        }
        Ok(())
    }

    fn wait_for_queue(&mut self, max_lines: usize) -> Result<()> {
        loop {
            let count = self.call("queue count", |m| m.queue_line_count())?;
            if count <= max_lines {
                return Ok(());
            }
            thread::sleep(self.config.drain_poll());
        }
    }

    fn stream(
        &mut self,
        ends: &PlanEnds,
        start_signal: &Producer<()>,
        paths: &Consumer<PathMsg>,
    ) -> Result<()> {
        self.call("program stop", |m| m.program_stop())?;
        self.call("motion enable", |m| m.set_motion_enabled(true))?;
        self.pre_print(&ends.first, ends.first_direction)?;
        start_signal.push(())?;

        self.call("queue init", |m| m.initialize_queue())?;
        self.call("program pause", |m| m.program_pause())?;
        let setup = MotionCommand::Raw("VELOCITY ON\nG90".to_string());
        self.call("motion setup", |m| m.execute(&setup))?;
        if self.config.extrude {
            self.call("extruder enable", |m| m.set_extruder_enabled(true))?;
        }
        self.capacity = self.call("queue capacity", |m| m.queue_line_capacity())?;
        self.queued_lines = self.call("queue count", |m| m.queue_line_count())?;
        let start_at = self.capacity.saturating_sub(self.config.start_margin_lines);
        info!(capacity = self.capacity, "queue mode ready");

        let mut last_waypoint = ends.first;
        while self
            .summary
            .segments
            .last()
            .map_or(ends.segments > 0, |&s| s + 1 < ends.segments)
        {
            let msg = paths.wait_and_pop()?;
            if let Some(&prev) = self.summary.segments.last() {
                if msg.segment != prev + 1 {
                    warn!("segment {} loaded after segment {prev}", msg.segment);
                }
            }
            for w in &msg.waypoints {
                self.submit(&MotionCommand::Print(*w))?;
                self.summary.print_commands += 1;
                if self.queued_lines > start_at {
                    self.start()?;
                }
                last_waypoint = *w;
            }
            self.summary.segments.push(msg.segment);
            info!("segment {} loaded", msg.segment);
            if self.summary.segments.len() >= self.config.start_after_segments {
                self.start()?;
            }
        }

        let room = self
            .capacity
            .saturating_sub(self.config.post_print_room_lines);
        self.wait_for_queue(room)?;
        self.post_print(&last_waypoint, ends.last_direction)?;
        self.start()?;
        self.call("motion disable", |m| m.set_motion_enabled(false))?;
        self.wait_for_queue(0)?;
        debug!("command queue drained");
        self.call("program stop", |m| m.program_stop())?;
        if self.config.extrude {
            self.call("extruder disable", |m| m.set_extruder_enabled(false))?;
        }
        Ok(())
    }
}

/// Plan facts the print stream needs besides the released segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanEnds {
    /// First waypoint of the first segment (pre-print target).
    pub first: Waypoint,
    pub first_direction: PrintDir,
    /// Travel direction of the final segment (lead-out direction).
    pub last_direction: PrintDir,
    /// Number of segments to stream.
    pub segments: usize,
}

/// Run the print-stream stage to completion.
///
/// Sends the start signal once the machine is positioned, then loads
/// segments from `paths` until the final index has been loaded. On failure
/// the program is stopped and the extruder disabled on a best-effort basis
/// before the error is returned.
pub fn run_print_stage<M: MotionController>(
    machine: M,
    config: &StreamConfig,
    ends: &PlanEnds,
    start_signal: &Producer<()>,
    paths: &Consumer<PathMsg>,
) -> Result<StreamSummary> {
    let mut streamer = Streamer {
        machine,
        config,
        summary: StreamSummary::default(),
        queued_lines: 0,
        capacity: 0,
        started: false,
    };
    match streamer.stream(ends, start_signal, paths) {
        Ok(()) => {
            info!(
                commands = streamer.summary.print_commands,
                retries = streamer.summary.buffer_full_retries,
                "print stream finished"
            );
            Ok(streamer.summary)
        }
        Err(e) => {
            if let Err(stop) = streamer.machine.program_stop() {
                warn!(error = %stop, "program stop after failure");
            }
            if let Err(off) = streamer.machine.set_extruder_enabled(false) {
                warn!(error = %off, "extruder disable after failure");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ordered_channel;

    /// Records commands and rejects the first `full_for` queued submissions.
    #[derive(Default)]
    struct MockMachine {
        full_for: usize,
        rejected: usize,
        capacity: usize,
        queue_mode: bool,
        running: bool,
        executed: Vec<MotionCommand>,
        log: Vec<&'static str>,
        fail_on_print: Option<usize>,
    }

    impl MotionController for MockMachine {
        fn execute(&mut self, command: &MotionCommand) -> MachineResult<()> {
            if self.queue_mode && matches!(command, MotionCommand::Print(_)) {
                if self.rejected < self.full_for {
                    self.rejected += 1;
                    return Err(MachineError::BufferFull);
                }
                let prints = self
                    .executed
                    .iter()
                    .filter(|c| matches!(c, MotionCommand::Print(_)))
                    .count();
                if self.fail_on_print == Some(prints) {
                    return Err(MachineError::fault(12, "axis fault"));
                }
            }
            self.executed.push(command.clone());
            Ok(())
        }
        fn queue_line_count(&mut self) -> MachineResult<usize> {
            // commands complete instantly once running
            Ok(0)
        }
        fn queue_line_capacity(&mut self) -> MachineResult<usize> {
            Ok(self.capacity)
        }
        fn initialize_queue(&mut self) -> MachineResult<()> {
            self.queue_mode = true;
            self.log.push("init");
            Ok(())
        }
        fn program_start(&mut self) -> MachineResult<()> {
            self.running = true;
            self.log.push("start");
            Ok(())
        }
        fn program_pause(&mut self) -> MachineResult<()> {
            self.log.push("pause");
            Ok(())
        }
        fn program_stop(&mut self) -> MachineResult<()> {
            self.running = false;
            self.log.push("stop");
            Ok(())
        }
        fn set_motion_enabled(&mut self, enabled: bool) -> MachineResult<()> {
            self.log.push(if enabled { "motion on" } else { "motion off" });
            Ok(())
        }
        fn set_extruder_enabled(&mut self, enabled: bool) -> MachineResult<()> {
            self.log.push(if enabled { "extruder on" } else { "extruder off" });
            Ok(())
        }
    }

    fn config() -> StreamConfig {
        StreamConfig {
            retry_delay_ms: 0,
            drain_poll_ms: 0,
            ..StreamConfig::default()
        }
    }

    fn ends(segments: usize) -> PlanEnds {
        PlanEnds {
            first: Waypoint::at(0.0, 0.0, 0.2),
            first_direction: PrintDir::XPos,
            last_direction: PrintDir::XNeg,
            segments,
        }
    }

    fn path(segment: usize, n: usize) -> PathMsg {
        PathMsg {
            waypoints: (0..n)
                .map(|k| Waypoint {
                    feed: 1.0,
                    extrusion: 1.0,
                    width: 1.0,
                    ..Waypoint::at(k as f64, segment as f64, 0.2)
                })
                .collect(),
            segment,
        }
    }

    fn printed(m: &MockMachine) -> Vec<Waypoint> {
        m.executed
            .iter()
            .filter_map(|c| match c {
                MotionCommand::Print(w) => Some(*w),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn retries_buffer_full_exactly_k_times() {
        let mut machine = MockMachine {
            full_for: 7,
            capacity: 1000,
            ..MockMachine::default()
        };
        let (start_tx, start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel("correct");
        for s in 0..3 {
            tx.push(path(s, 4)).unwrap();
        }
        let summary = run_print_stage(&mut machine, &config(), &ends(3), &start_tx, &rx).unwrap();
        assert_eq!(summary.buffer_full_retries, 7);
        assert_eq!(summary.segments, vec![0, 1, 2]);
        assert_eq!(summary.print_commands, 12);
        // 12 waypoints + lead-out, each submitted once
        assert_eq!(printed(&machine).len(), 13);
        assert_eq!(start_rx.try_pop().unwrap(), Some(()));
    }

    #[test]
    fn machine_sequence_brackets_the_print() {
        let mut machine = MockMachine {
            capacity: 1000,
            ..MockMachine::default()
        };
        let (start_tx, _start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel("correct");
        tx.push(path(0, 3)).unwrap();
        tx.push(path(1, 3)).unwrap();
        run_print_stage(&mut machine, &config(), &ends(2), &start_tx, &rx).unwrap();
        assert_eq!(
            machine.log,
            vec![
                "stop",
                "motion on",
                "init",
                "pause",
                "extruder on",
                "start",
                "motion off",
                "stop",
                "extruder off"
            ]
        );
        let lead_out = *printed(&machine).last().unwrap();
        assert_eq!(lead_out.extrusion, 0.0);
        assert_eq!((lead_out.x, lead_out.y), (2.0 - 6.0, 1.0));
    }

    #[test]
    fn starts_when_queue_nears_capacity() {
        let mut machine = MockMachine {
            capacity: 20,
            ..MockMachine::default()
        };
        let cfg = StreamConfig {
            start_after_segments: 5,
            ..config()
        };
        let (start_tx, _start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel("correct");
        tx.push(path(0, 10)).unwrap();
        let summary = run_print_stage(&mut machine, &cfg, &ends(1), &start_tx, &rx).unwrap();
        // 6 prints = 12 lines > 20 - 10
        assert_eq!(summary.started_at_lines, Some(12));
    }

    #[test]
    fn hardware_fault_aborts_and_stops_machine() {
        let mut machine = MockMachine {
            capacity: 1000,
            fail_on_print: Some(2),
            ..MockMachine::default()
        };
        let (start_tx, _start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel("correct");
        tx.push(path(0, 5)).unwrap();
        let err = run_print_stage(&mut machine, &config(), &ends(1), &start_tx, &rx).unwrap_err();
        assert!(matches!(err, PipelineError::Machine { stage: "print", .. }));
        assert_eq!(printed(&machine).len(), 2);
        assert_eq!(machine.log.last(), Some(&"extruder off"));
    }

    #[test]
    fn closed_path_channel_aborts() {
        let mut machine = MockMachine {
            capacity: 1000,
            ..MockMachine::default()
        };
        let (start_tx, _start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel::<PathMsg>("correct");
        drop(tx);
        let err = run_print_stage(&mut machine, &config(), &ends(2), &start_tx, &rx).unwrap_err();
        assert!(matches!(err, PipelineError::ChannelClosed { stage: "correct" }));
    }
}
