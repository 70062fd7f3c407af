//! # Swarm Simulation
//!
//! Runs a seeded in-process world (one authority, N player clients, M AI
//! ships) over lossy loopback links and prints replication statistics.
//!
//! ## Usage
//!
//! ```bash
//! swarm_simulation [CONFIG.toml] [--players N] [--ai N] [--duration SECS] [--network PRESET]
//! RUST_LOG=driftline_networking=debug swarm_simulation
//! ```

use driftline_networking::{NetworkConditions, SwarmConfig, SwarmReport, SwarmSimulation};
use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut players: Option<usize> = None;
    let mut ai_ships: Option<usize> = None;
    let mut duration: Option<f64> = None;
    let mut network: Option<NetworkConditions> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--players" | "-p" => {
                players = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--ai" | "-a" => {
                ai_ships = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--duration" | "-d" => {
                duration = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--network" | "-n" => {
                network = value.and_then(|v| NetworkConditions::preset(v));
                if network.is_none() {
                    eprintln!("unknown network preset; expected perfect, good, average or poor");
                    return ExitCode::FAILURE;
                }
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: swarm_simulation [CONFIG.toml] [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --players <N>          Player clients (default: 8)");
                println!("  -a, --ai <N>               AI ships (default: 400)");
                println!("  -d, --duration <SECS>      Simulated seconds (default: 30)");
                println!("  -n, --network <PRESET>     perfect | good | average | poor");
                println!("  -h, --help                 Show this help");
                return ExitCode::SUCCESS;
            }
            path => config_path = Some(path.to_owned()),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => match SwarmConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => SwarmConfig::default(),
    };
    if let Some(players) = players {
        config.players = players;
    }
    if let Some(ai_ships) = ai_ships {
        config.ai_ships = ai_ships;
    }
    if let Some(duration) = duration {
        config.duration_secs = duration;
    }
    if let Some(network) = network {
        config.network = network;
    }

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         DRIFTLINE - SWARM SIMULATION                             ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ──────────────────────────────────────────────────┐");
    println!("│ Players:            {}", config.players);
    println!("│ AI Ships:           {}", config.ai_ships);
    println!("│ Duration:           {:.1} s", config.duration_secs);
    println!("│ Frame Rate:         {:.0} Hz", config.frame_rate);
    println!("│ Spawn Spread:       {:.0} m around {:?}", config.spread, config.center);
    println!("│ Latency / Jitter:   {} ms / {} ms", config.network.base_latency_ms, config.network.jitter_ms);
    println!("│ Loss / Duplicates:  {}% / {}%", config.network.packet_loss_percent, config.network.duplicate_percent);
    println!("│ Seed:               {}", config.seed);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut simulation = match SwarmSimulation::new(config) {
        Ok(simulation) => simulation,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let mut last_decile = 0;
    while simulation.step() {
        let decile = (simulation.progress() * 10.0) as usize;
        if decile > last_decile {
            last_decile = decile;
            print!("\r[{}{}] {:>3}%", "█".repeat(decile), "░".repeat(10 - decile.min(10)), decile * 10);
            let _ = std::io::stdout().flush();
        }
    }
    println!();
    println!();

    print_report(&simulation.report(), start.elapsed().as_secs_f64());
    ExitCode::SUCCESS
}

fn print_report(report: &SwarmReport, elapsed: f64) {
    let sim = &report.simulation_timing;
    let sched = &report.scheduler_timing;
    println!("┌─ TIMING ─────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {elapsed:.2} s");
    println!("│ Simulated Time:     {:.2} s", report.simulated_secs);
    println!("│ Realtime Factor:    {:.1}x", report.simulated_secs / elapsed.max(1e-9));
    println!("│ Simulation Ticks:   {} (avg {} µs, max {} µs, late {})", sim.total_ticks, sim.avg_tick_us, sim.max_tick_us, sim.late_ticks);
    println!("│ Scheduler Ticks:    {} (avg {} µs, max {} µs, late {})", sched.total_ticks, sched.avg_tick_us, sched.max_tick_us, sched.late_ticks);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ INTEREST ───────────────────────────────────────────────────────┐");
    println!("│ Reports:            {}", report.scheduler_reports);
    println!("│ Avg Gathered:       {:.1}", report.avg_gathered);
    println!("│ Avg Selected:       {:.1} (max {})", report.avg_selected, report.max_selected);
    println!("│ Budget Range:       {:.0} .. {:.0} B/tick (final avg {:.0})", report.budget_min, report.budget_max, report.budget_final);
    println!("│ Avg Utilization:    {:.2}", report.avg_utilization);
    println!("│ Avg Observed:       {:.1} per player", report.avg_observed);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let server = &report.server;
    println!("┌─ NETWORK ────────────────────────────────────────────────────────┐");
    println!("│ Snapshots Sent:     {} ({} bytes)", server.snapshots_sent, server.snapshot_bytes);
    println!("│ Wake / Dormant:     {} / {}", server.wakes_sent, server.dormants_sent);
    println!("│ Inputs / Acks:      {} / {}", server.inputs_received, server.acks_sent);
    println!("│ Packets Dropped:    {}", report.transport.dropped);
    println!("│ Packets Duplicated: {}", report.transport.duplicated);
    println!("│ Errors:             {} send, {} decode", server.send_errors, server.decode_errors);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let tiers = &report.corrections;
    println!("┌─ SMOOTHNESS ─────────────────────────────────────────────────────┐");
    println!("│ Corrections:        {} total", tiers.total());
    println!("│   negligible:       {}", tiers.negligible);
    println!("│   soft:             {}", tiers.soft);
    println!("│   hard (bounded):   {}", tiers.hard_bounded);
    println!("│   hard (snap):      {}", tiers.hard_snap);
    println!("│ Observer Teleports: {}", report.teleports);
    println!("│ Stale Snapshots:    {}", report.stale_snapshots);
    println!("│ Own-Ship Lead:      avg {:.2} m, max {:.2} m", report.avg_divergence, report.max_divergence);
    println!("│ Origin Shifts:      {} server, {} clients", server.origin_shifts, report.client_origin_shifts);
    println!("└──────────────────────────────────────────────────────────────────┘");
}
