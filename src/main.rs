use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use uwb_line_tracker::algorithms::line_geometry::LineCrossing;
use uwb_line_tracker::processing::parser::{encode_line, WireLineCrossing};
use uwb_line_tracker::processing::{LineTracker, RegattaSimulator};
use uwb_line_tracker::utils::{SideSelection, TrackerConfig};

/// Simulated regatta start: ranges a tag against the line anchors and reports crossings
#[derive(Debug, Parser)]
#[command(name = "uwb-line-tracker", version)]
struct Args {
    /// JSON configuration file; built-in defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulator frames to run
    #[arg(short, long, default_value_t = 3000)]
    frames: u64,

    /// Print every frame as a JSON line instead of a summary
    #[arg(long)]
    json: bool,

    /// Track trilaterated range estimates instead of the simulated true position
    #[arg(long)]
    ranges: bool,

    /// Override the ranging seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    if args.seed.is_some() {
        config.ranging.seed = args.seed;
    }
    config.validate()?;

    let mut simulator = RegattaSimulator::from_config(&config)?;
    let mut tracker = LineTracker::from_config(&config)?;
    if args.ranges {
        // Two anchors leave the side ambiguous; follow the previous estimate
        tracker = tracker.with_side_selection(SideSelection::Nearest);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut crossings: Vec<LineCrossing> = Vec::new();

    for _ in 0..args.frames {
        let frame = simulator.next_frame()?;
        let update = if args.ranges {
            tracker.process_ranges(frame.timestamp_ns, &frame.ranges())
        } else {
            tracker.process_position(frame.tag)
        };

        let update = match update {
            Ok(update) => update,
            Err(e) => {
                log::warn!("Frame {} skipped: {}", frame.frame_id, e);
                continue;
            }
        };

        if args.json {
            let mut payload = simulator.payload(&frame);
            // Report what the tracker saw, not the simulator's ground truth
            payload.line_crossing = update.crossing.map(|crossing| WireLineCrossing {
                timestamp_ns: crossing.interpolated_timestamp_ns,
                tag_position: [
                    crossing.interpolated_position.x,
                    crossing.interpolated_position.y,
                    crossing.interpolated_position.z,
                ],
            });
            out.write_all(encode_line(&payload)?.as_bytes())?;
        }
        if let Some(crossing) = update.crossing {
            crossings.push(crossing);
        }
    }

    if !args.json {
        writeln!(out, "Frames: {}, line crossings: {}", args.frames, crossings.len())?;
        for (i, crossing) in crossings.iter().enumerate() {
            writeln!(
                out,
                "  #{} {:?} at t={:.3} s, x={:.3} m, y={:.3} m",
                i + 1,
                crossing.direction,
                crossing.interpolated_timestamp_ns as f64 / 1e9,
                crossing.interpolated_position.x,
                crossing.interpolated_position.y
            )?;
        }
    }
    out.flush()?;
    Ok(())
}
