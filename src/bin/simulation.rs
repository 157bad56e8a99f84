//! Road Sensor Simulation
//!
//! Generates traffic sensor records for testing the congestion service.
//! Cycles every segment through four phases:
//! - Light traffic
//! - Rush hour (vehicle counts above the congestion threshold)
//! - Incident (accident reports)
//! - Clearing
//!
//! # Usage
//! ```bash
//! ./traffic-sim --segments 66N_1,I-80W --rounds 200 --rate 50 | ./traffic-conditions --stdin
//! ```

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::prelude::*;

use traffic_conditions::acquisition::format_record;
use traffic_conditions::types::{EventKind, TrafficEvent};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "traffic-sim")]
#[command(about = "Road sensor record simulation for traffic-conditions testing")]
#[command(version)]
struct Args {
    /// Comma-separated road segment identifiers
    #[arg(long, default_value = "66N_1,I-80W,US-101S", value_delimiter = ',')]
    segments: Vec<String>,

    /// Report rounds to emit (one vehicle report per segment per round)
    #[arg(short, long, default_value = "100")]
    rounds: u32,

    /// Records per second (0 = as fast as possible)
    #[arg(long, default_value = "10")]
    rate: u32,

    /// Simulated seconds between rounds. Ignored with --now.
    #[arg(long, default_value = "60")]
    step_secs: i64,

    /// Stamp records with `now` instead of a simulated date
    #[arg(long)]
    now: bool,

    /// Chance per segment per round of an accident report during the incident phase
    #[arg(long, default_value = "0.3")]
    accident_rate: f64,

    /// Suppress the mission log on stderr
    #[arg(short, long)]
    quiet: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Simulation Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Free-flowing traffic (0-40%)
    Light,
    /// Heavy traffic above the default threshold (40-65%)
    RushHour,
    /// Accident reports on top of heavy traffic (65-80%)
    Incident,
    /// Return to light traffic (80-100%)
    Clearing,
}

impl Phase {
    const fn name(self) -> &'static str {
        match self {
            Self::Light => "Light Traffic",
            Self::RushHour => "Rush Hour",
            Self::Incident => "Incident",
            Self::Clearing => "Clearing",
        }
    }

    fn from_progress(progress: f64) -> Self {
        match progress {
            p if p < 0.40 => Self::Light,
            p if p < 0.65 => Self::RushHour,
            p if p < 0.80 => Self::Incident,
            _ => Self::Clearing,
        }
    }

    /// Vehicle count range for one report.
    const fn vehicle_range(self) -> (i32, i32) {
        match self {
            Self::Light | Self::Clearing => (5, 60),
            Self::RushHour | Self::Incident => (90, 180),
        }
    }
}

// ============================================================================
// Simulation State
// ============================================================================

struct Simulation {
    rng: StdRng,
    segments: Vec<String>,
    sim_time_ms: i64,
    step_ms: i64,
    accident_rate: f64,
}

impl Simulation {
    fn new(args: &Args) -> Self {
        let rng = args
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            rng,
            segments: args.segments.clone(),
            sim_time_ms: chrono::Utc::now().timestamp() * 1000,
            step_ms: args.step_secs.max(1) * 1000,
            accident_rate: args.accident_rate.clamp(0.0, 1.0),
        }
    }

    /// Reports for one round across every segment.
    fn round(&mut self, phase: Phase) -> Vec<TrafficEvent> {
        let (low, high) = phase.vehicle_range();
        let mut events = Vec::with_capacity(self.segments.len() * 2);
        for segment in &self.segments {
            let count = self.rng.gen_range(low..=high);
            events.push(TrafficEvent::new(segment.as_str(), self.sim_time_ms, EventKind::Vehicle, count));
            if phase == Phase::Incident && self.rng.gen_bool(self.accident_rate) {
                events.push(TrafficEvent::new(segment.as_str(), self.sim_time_ms, EventKind::Accident, 1));
            }
        }
        self.sim_time_ms += self.step_ms;
        events
    }
}

fn render(event: &TrafficEvent, use_now: bool) -> String {
    if use_now {
        return format!("{}, now, {}, {}", event.segment_id, event.kind, event.count);
    }
    // Simulated time starts at the wall clock, always a representable date.
    format_record(event)
        .unwrap_or_else(|| format!("{}, now, {}, {}", event.segment_id, event.kind, event.count))
}

fn log_mission(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[traffic-sim] {message}");
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.segments.iter().all(|s| s.trim().is_empty()) {
        return Err("at least one segment is required".into());
    }

    let mut sim = Simulation::new(&args);
    let pause = (args.rate > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(args.rate)));

    log_mission(&"=".repeat(60), args.quiet);
    log_mission("ROAD SENSOR SIMULATION", args.quiet);
    log_mission(&format!("  Segments: {}", args.segments.join(", ")), args.quiet);
    log_mission(&format!("  Rounds: {} | Rate: {}/s", args.rounds, args.rate), args.quiet);
    if let Some(seed) = args.seed {
        log_mission(&format!("  Random seed: {seed}"), args.quiet);
    }
    log_mission(&"=".repeat(60), args.quiet);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut phase = None;

    for round in 0..args.rounds {
        let current = Phase::from_progress(f64::from(round) / f64::from(args.rounds.max(1)));
        if phase != Some(current) {
            log_mission(&format!(">>> PHASE: {} (round {round})", current.name()), args.quiet);
            phase = Some(current);
        }

        for event in sim.round(current) {
            writeln!(out, "{}", render(&event, args.now))?;
            if let Some(pause) = pause {
                out.flush()?;
                thread::sleep(pause);
            }
        }
    }
    out.flush()?;

    log_mission("SIMULATION COMPLETE", args.quiet);
    Ok(())
}
