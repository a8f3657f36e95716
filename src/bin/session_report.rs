//! session_report - print stored sessions and their verdicts

use anyhow::Result;
use clap::Parser;

use thermal_classifier::{FinishedSession, SqliteSessionStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print recorded thermal sessions")]
struct Args {
    /// Session database path.
    #[arg(long, env = "THERMAL_DB_PATH", default_value = "thermal_sessions.db")]
    db: String,
    /// Maximum number of sessions to print, oldest first.
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = SqliteSessionStore::open(&args.db)?;
    let sessions = store.load_sessions(args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("no sessions in {}", args.db);
        return Ok(());
    }
    for session in &sessions {
        print_session(session);
    }
    Ok(())
}

fn print_session(session: &FinishedSession) {
    let secs = session.finished_at_ms.saturating_sub(session.started_at_ms) as f64 / 1000.0;
    println!(
        "session {} started_at_ms={} duration={:.1}s reason={:?} frames={} (runway {}) tracks={}",
        session.id,
        session.started_at_ms,
        secs,
        session.stop_reason,
        session.frames_processed,
        session.runway_frames,
        session.tracks.len()
    );
    for track in &session.tracks {
        match &track.result {
            Some(result) => println!(
                "  track {}: {} {:.2} (novelty max {:.2} avg {:.2}, {} regions)",
                track.id(),
                result.label.as_deref().unwrap_or("-"),
                result.confidence,
                result.max_novelty,
                result.avg_novelty,
                track.bounds_history().len()
            ),
            None => println!(
                "  track {}: not identified ({} regions)",
                track.id(),
                track.bounds_history().len()
            ),
        }
    }
    let ranked: Vec<String> = session
        .ranked_labels
        .iter()
        .filter(|l| l.score > 0.0)
        .map(|l| format!("{} {:.2}", l.label, l.score))
        .collect();
    if ranked.is_empty() {
        println!("  ranked: none");
    } else {
        println!("  ranked: {}", ranked.join(", "));
    }
}
