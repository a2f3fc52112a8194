use clap::Parser;
use log::{error, info, warn};
use serde::Serialize;
use snake_sync_server::constants::{
    DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH, INITIAL_SNAKE_LENGTH,
};
use snake_sync_server::engine::GameOptions;
use snake_sync_server::error::GameError;
use snake_sync_server::host::GameHost;
use snake_sync_server::server_protocol::ServerMessage;
use snake_sync_server::server_utils::resolve_game_options;
use snake_sync_server::types::GameOverReason;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Runs autopilot games on a local host and prints one JSON line per game.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, default_value_t = DEFAULT_GRID_WIDTH)]
    width: i32,
    #[arg(long, default_value_t = DEFAULT_GRID_HEIGHT)]
    height: i32,
    #[arg(long, default_value_t = 100)]
    games: u32,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Pace ticks in real time instead of running flat out
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: Option<u64>,
    #[arg(long, default_value_t = INITIAL_SNAKE_LENGTH)]
    initial_length: usize,
    /// Frames after which a looping game is abandoned
    #[arg(long, default_value_t = 50_000)]
    max_frames: u64,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct GameResultLine {
    game: u32,
    score: u32,
    reason: String,
    frames: u64,
    record: u32,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    seed: u64,
    grid_width: i32,
    grid_height: i32,
    game_count: usize,
    best_score: u32,
    average_score: f64,
    average_frames: f64,
    reason_counts: BTreeMap<String, usize>,
    finished_at: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let options = match resolve_options(&cli) {
        Ok(options) => options,
        Err(err) => {
            error!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    info!(
        "simulating {} games on {}x{} (seed {})",
        cli.games, options.grid_width, options.grid_height, cli.seed
    );

    let mut pacer = cli.tick_ms.map(|ms| {
        let mut timer = interval(Duration::from_millis(ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });

    let results = match run_games(
        options,
        cli.games,
        cli.seed,
        cli.max_frames,
        pacer.as_mut(),
        |line| match serde_json::to_string(line) {
            Ok(text) => println!("{text}"),
            Err(err) => warn!("could not serialize game {}: {err}", line.game),
        },
    )
    .await
    {
        Ok(results) => results,
        Err(err) => {
            error!("simulation failed: {err}");
            std::process::exit(1);
        }
    };

    let summary = build_run_summary(&cli, &options, &results);
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(
                "failed to write summary to {}: {err}",
                path.to_string_lossy()
            );
            std::process::exit(2);
        }
    }
    info!(
        "finished {} games: best {}, average score {:.2}, reasons {:?}",
        summary.game_count, summary.best_score, summary.average_score, summary.reason_counts
    );
}

/// `--tick-ms` only paces the loop; the reported game tick is the default.
fn resolve_options(cli: &Cli) -> Result<GameOptions, GameError> {
    let mut options = resolve_game_options(
        &GameOptions::default(),
        Some(i64::from(cli.width)),
        Some(i64::from(cli.height)),
        None,
    )?;
    options.initial_length = cli.initial_length;
    Ok(options)
}

async fn run_games(
    options: GameOptions,
    games: u32,
    seed: u64,
    max_frames: u64,
    mut pacer: Option<&mut Interval>,
    mut on_game: impl FnMut(&GameResultLine),
) -> Result<Vec<GameResultLine>, GameError> {
    let mut host = GameHost::new(seed);
    let mut results = Vec::with_capacity(games as usize);
    if games == 0 {
        return Ok(results);
    }
    host.start(options, true)?;

    let mut frames = 0u64;
    while results.len() < games as usize {
        if let Some(timer) = pacer.as_deref_mut() {
            timer.tick().await;
        }
        frames += 1;

        let finished = host.tick().into_iter().find_map(|message| match message {
            ServerMessage::GameOver(summary) => Some(GameResultLine {
                game: results.len() as u32 + 1,
                score: summary.score,
                reason: reason_key(summary.reason).to_string(),
                frames,
                record: summary.record.unwrap_or(summary.score),
            }),
            _ => None,
        });

        let finished = match finished {
            Some(line) => Some(line),
            None if frames >= max_frames => {
                warn!("game {} hit the {max_frames} frame limit", results.len() + 1);
                let score = host
                    .abandon()
                    .into_iter()
                    .find_map(|message| match message {
                        ServerMessage::GameStopped { score } => Some(score),
                        _ => None,
                    })
                    .unwrap_or(0);
                let record = host
                    .snapshot()
                    .and_then(|snapshot| snapshot.agent_stats)
                    .map_or(score, |stats| stats.record);
                Some(GameResultLine {
                    game: results.len() as u32 + 1,
                    score,
                    reason: "frame_limit".to_string(),
                    frames,
                    record,
                })
            }
            None => None,
        };

        if let Some(line) = finished {
            on_game(&line);
            results.push(line);
            frames = 0;
        }
    }
    Ok(results)
}

fn reason_key(reason: GameOverReason) -> &'static str {
    match reason {
        GameOverReason::Wall => "wall",
        GameOverReason::SelfCollision => "self",
        GameOverReason::BoardFull => "board_full",
    }
}

fn build_run_summary(cli: &Cli, options: &GameOptions, results: &[GameResultLine]) -> RunSummary {
    let mut reason_counts = BTreeMap::new();
    for line in results {
        *reason_counts.entry(line.reason.clone()).or_insert(0) += 1;
    }
    let count = results.len();
    let mean = |total: f64| if count == 0 { 0.0 } else { total / count as f64 };
    RunSummary {
        seed: cli.seed,
        grid_width: options.grid_width,
        grid_height: options.grid_height,
        game_count: count,
        best_score: results.iter().map(|line| line.score).max().unwrap_or(0),
        average_score: mean(results.iter().map(|line| f64::from(line.score)).sum()),
        average_frames: mean(results.iter().map(|line| line.frames as f64).sum()),
        reason_counts,
        finished_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(games: u32) -> Cli {
        Cli::parse_from([
            "simulate",
            "--width",
            "6",
            "--height",
            "6",
            "--games",
            &games.to_string(),
            "--seed",
            "9",
        ])
    }

    #[tokio::test]
    async fn runs_requested_number_of_games() {
        let cli = cli(5);
        let options = resolve_options(&cli).expect("valid");
        let mut printed = 0;
        let results = run_games(options, cli.games, cli.seed, cli.max_frames, None, |_| {
            printed += 1
        })
        .await
        .expect("simulation");

        assert_eq!(results.len(), 5);
        assert_eq!(printed, 5);
        for (index, line) in results.iter().enumerate() {
            assert_eq!(line.game, index as u32 + 1);
            assert!(line.frames > 0);
            assert!(line.record >= line.score);
        }
    }

    #[tokio::test]
    async fn same_seed_replays_identically() {
        let cli = cli(3);
        let options = resolve_options(&cli).expect("valid");
        let first = run_games(options, 3, 42, 10_000, None, |_| {})
            .await
            .expect("first");
        let second = run_games(options, 3, 42, 10_000, None, |_| {})
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn frame_limit_abandons_long_games() {
        let cli = cli(2);
        let options = resolve_options(&cli).expect("valid");
        let results = run_games(options, 2, 1, 1, None, |_| {})
            .await
            .expect("simulation");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|line| line.frames == 1));
    }

    #[tokio::test]
    async fn abandoned_games_count_toward_the_autopilot() {
        let cli = cli(3);
        let options = resolve_options(&cli).expect("valid");
        let mut host_games = Vec::new();
        let results = run_games(options, 3, 5, 2, None, |line| host_games.push(line.game))
            .await
            .expect("simulation");
        assert_eq!(host_games, vec![1, 2, 3]);
        assert!(results.iter().all(|line| line.reason == "frame_limit"));
        assert!(results
            .windows(2)
            .all(|pair| pair[1].record >= pair[0].record));
    }

    #[test]
    fn one_millisecond_pacing_is_accepted() {
        let cli = Cli::parse_from(["simulate", "--tick-ms", "1"]);
        assert_eq!(cli.tick_ms, Some(1));
        let options = resolve_options(&cli).expect("valid");
        assert_eq!(
            options.tick_interval_secs,
            GameOptions::default().tick_interval_secs
        );
        assert!(Cli::try_parse_from(["simulate", "--tick-ms", "0"]).is_err());
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let cli = Cli::parse_from(["simulate", "--width", "1"]);
        assert!(resolve_options(&cli).is_err());
    }

    #[test]
    fn summary_aggregates_results() {
        let cli = cli(2);
        let options = resolve_options(&cli).expect("valid");
        let results = vec![
            GameResultLine {
                game: 1,
                score: 2,
                reason: "wall".to_string(),
                frames: 10,
                record: 2,
            },
            GameResultLine {
                game: 2,
                score: 4,
                reason: "self".to_string(),
                frames: 30,
                record: 4,
            },
        ];
        let summary = build_run_summary(&cli, &options, &results);
        assert_eq!(summary.game_count, 2);
        assert_eq!(summary.best_score, 4);
        assert_eq!(summary.average_score, 3.0);
        assert_eq!(summary.average_frames, 20.0);
        assert_eq!(summary.reason_counts.get("wall"), Some(&1));
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let cli = cli(0);
        let options = resolve_options(&cli).expect("valid");
        let summary = build_run_summary(&cli, &options, &[]);
        let target = std::env::temp_dir()
            .join(format!("snake-sync-missing-{}", std::process::id()))
            .join("summary.json");
        assert!(write_summary(&target, &summary).is_err());
    }
}
