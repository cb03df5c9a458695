//! go-nneval command line.
//!
//! ## Usage
//!
//! - `go-nneval bench` - Hammer a debug evaluator from many client threads
//! - `go-nneval score D4 Q16 pass pass` - Play moves and print the result

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;

use go_nneval::board::{Board, Color, Player};
use go_nneval::config::EngineConfig;
use go_nneval::constants::MAX_ARR_SIZE;
use go_nneval::history::BoardHistory;
use go_nneval::nneval::{NNEvaluator, NNResultBuf};
use go_nneval::rules::{KoRule, ScoringRule};

/// Go rules engine and batched neural net evaluator
#[derive(Parser)]
#[command(name = "go-nneval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file with [rules] and [evaluator] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run client threads against an evaluator that fabricates outputs
    Bench {
        /// Number of client threads
        #[arg(long, default_value_t = 16)]
        clients: usize,
        /// Evaluations per client
        #[arg(long, default_value_t = 100)]
        evals: usize,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        server_threads: Option<usize>,
        /// Board side length
        #[arg(long, default_value_t = 19)]
        size: usize,
    },
    /// Play a sequence of moves, alternating from black, and score the game
    Score {
        /// Board side length
        #[arg(long, default_value_t = 19)]
        size: usize,
        #[arg(long)]
        ko_rule: Option<KoRule>,
        #[arg(long)]
        scoring_rule: Option<ScoringRule>,
        #[arg(long, allow_hyphen_values = true)]
        komi: Option<f32>,
        /// Moves such as D4 or pass
        moves: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .format_timestamp_millis()
    .init();

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Bench { clients, evals, batch_size, server_threads, size } => {
            run_bench(config, clients, evals, batch_size, server_threads, size)
        }
        Commands::Score { size, ko_rule, scoring_rule, komi, moves } => {
            let mut config = config;
            if let Some(k) = ko_rule {
                config.rules.ko_rule = k;
            }
            if let Some(s) = scoring_rule {
                config.rules.scoring_rule = s;
            }
            if let Some(k) = komi {
                config.rules.komi = k;
            }
            run_score(&config, size, &moves)
        }
    }
}

fn run_bench(
    mut config: EngineConfig,
    clients: usize,
    evals: usize,
    batch_size: Option<usize>,
    server_threads: Option<usize>,
    size: usize,
) -> Result<()> {
    let eval_config = &mut config.evaluator;
    eval_config.debug_skip_neural_net = true;
    eval_config.pos_len = eval_config.pos_len.max(size);
    if let Some(b) = batch_size {
        eval_config.max_batch_size = b;
    }
    if let Some(t) = server_threads {
        eval_config.num_server_threads = t;
    }
    let rules = config.rules.to_rules()?;

    let mut evaluator = NNEvaluator::new(config.evaluator.clone(), None).context("creating evaluator")?;
    evaluator.spawn_server_threads()?;
    info!("bench: {clients} clients x {evals} evals, batch size {}", evaluator.max_batch_size());

    let start = Instant::now();
    thread::scope(|s| -> Result<()> {
        let mut workers = Vec::with_capacity(clients);
        for c in 0..clients {
            let evaluator = &evaluator;
            workers.push(s.spawn(move || -> Result<()> {
                let mut board = Board::new(size, size)?;
                let mut hist = BoardHistory::new(&board, Player::Black, rules, 0);
                let mut rng = fastrand::Rng::with_seed(c as u64);
                let mut buf = NNResultBuf::new();
                let mut pla = Player::Black;
                for _ in 0..evals {
                    evaluator.evaluate(&board, &hist, pla, &mut buf, false, false)?;
                    let legal: Vec<_> = board
                        .on_board_locs()
                        .filter(|&loc| hist.is_legal(&board, loc, pla))
                        .collect();
                    if legal.is_empty() || hist.is_game_finished {
                        board = Board::new(size, size)?;
                        hist.clear(&board, Player::Black, rules, 0);
                        pla = Player::Black;
                        continue;
                    }
                    let loc = legal[rng.usize(..legal.len())];
                    hist.make_board_move_assume_legal(&mut board, loc, pla);
                    pla = pla.opp();
                }
                Ok(())
            }));
        }
        for w in workers {
            match w.join() {
                Ok(result) => result?,
                Err(_) => bail!("client thread panicked"),
            }
        }
        Ok(())
    })?;
    let elapsed = start.elapsed();

    let rows = evaluator.num_rows_processed();
    println!("rows processed:     {rows}");
    println!("batches processed:  {}", evaluator.num_batches_processed());
    println!("average batch size: {:.2}", evaluator.average_processed_batch_size());
    println!("rows per second:    {:.0}", rows as f64 / elapsed.as_secs_f64());
    evaluator.kill_server_threads();
    Ok(())
}

fn run_score(config: &EngineConfig, size: usize, moves: &[String]) -> Result<()> {
    let rules = config.rules.to_rules()?;
    let mut board = Board::new(size, size)?;
    let mut hist = BoardHistory::new(&board, Player::Black, rules, 0);
    let mut pla = Player::Black;

    for mv in moves {
        if hist.is_game_finished {
            bail!("game already finished before move {mv}");
        }
        let loc = board.parse_loc(mv).with_context(|| format!("bad move '{mv}'"))?;
        hist.make_board_move(&mut board, loc, pla)?;
        pla = pla.opp();
    }

    if !hist.is_game_finished {
        hist.end_and_score_game_now(&board, None);
    }

    println!("{board}");
    println!("rules: {}", hist.rules);
    if !hist.is_no_result && !hist.is_resignation {
        let mut area = [Color::Empty; MAX_ARR_SIZE];
        hist.clone().end_and_score_game_now(&board, Some(&mut area));
        let owned: String = (0..size)
            .map(|y| (0..size).map(|x| area[board.loc(x, y)].to_char()).collect::<String>() + "\n")
            .collect();
        println!("area:\n{owned}");
    }
    if hist.is_no_result {
        println!("result: no result");
    } else {
        let score = hist.final_white_minus_black_score;
        match hist.winner {
            Some(Player::White) => println!("result: W+{score}"),
            Some(Player::Black) => println!("result: B+{}", -score),
            None => println!("result: draw"),
        }
    }
    Ok(())
}
