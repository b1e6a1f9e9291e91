//! patience CLI
//!
//! drives a clock patience session from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! # shuffle three times, deal, and let auto-play finish the game
//! patience play --shuffles 3 --question "ship it today?"
//!
//! # same against the in-process table, no server needed
//! patience play --offline --fast
//!
//! # one shuffle at an even cut, original rules
//! patience play --cut 26 --rules original
//!
//! # print the server snapshot of a session
//! patience state --session game-1730000000000-k3j9x0a1b
//!
//! # show what a cut-and-interleave does to the ordered deck
//! patience riffle --cut 26 --times 2
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use clock_patience::{
    batch_cut_point, AutoPlayExit, ClientConfig, Deck, Event, FixedLayout, GameMode, GameService,
    HttpGameService, MockTable, NoticeLevel, Orchestrator, RulesVariant, Timings, MAX_BATCH,
};

#[derive(Parser, Debug)]
#[command(name = "patience")]
#[command(about = "clock patience controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Game service base url
    #[arg(long, env = "PATIENCE_SERVER")]
    server: Option<String>,

    /// JSON client config (server url, rules, mode, timings)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shuffle, deal and auto-play one game
    Play {
        /// Shuffles before the deal (1-10)
        #[arg(short, long, default_value_t = 3)]
        shuffles: usize,

        /// Single shuffle at this cut point (1-51) instead of a batch
        #[arg(short, long, conflicts_with = "shuffles")]
        cut: Option<u8>,

        /// Question answered by the outcome
        #[arg(short, long)]
        question: Option<String>,

        /// Rules variant (original, alternative)
        #[arg(long)]
        rules: Option<RulesVariant>,

        /// Play against the in-process table instead of a server
        #[arg(long)]
        offline: bool,

        /// Skip every presentation delay
        #[arg(long)]
        fast: bool,
    },

    /// Print the snapshot of a session as JSON
    State {
        #[arg(short, long)]
        session: String,
    },

    /// Apply batch-style cuts to the ordered deck locally
    Riffle {
        /// Cut point (1-51); batch cut points when omitted
        #[arg(short, long)]
        cut: Option<usize>,

        #[arg(short, long, default_value_t = 1)]
        times: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patience=info,clock_patience=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }

    match cli.command {
        Commands::Play {
            shuffles,
            cut,
            question,
            rules,
            offline,
            fast,
        } => {
            config.mode = GameMode::Auto;
            if let Some(rules) = rules {
                config.rules = rules;
            }
            if fast {
                config.timings = Timings::instant();
            }
            play(config, shuffles, cut, question, offline).await
        }
        Commands::State { session } => {
            let service = HttpGameService::from_config(&config)?;
            let state = service.state(&session).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Riffle { cut, times } => riffle(cut, times),
    }
}

async fn play(
    config: ClientConfig,
    shuffles: usize,
    cut: Option<u8>,
    question: Option<String>,
    offline: bool,
) -> Result<()> {
    if !(1..=MAX_BATCH).contains(&shuffles) {
        bail!("--shuffles must be between 1 and {}", MAX_BATCH);
    }

    let service: Arc<dyn GameService> = if offline {
        info!("playing against the in-process table");
        Arc::new(MockTable::new())
    } else {
        let http = HttpGameService::from_config(&config)?;
        info!("game service: {}", http.base_url());
        Arc::new(http)
    };
    let (game, mut events) = Orchestrator::new(service, Arc::new(FixedLayout::default()), config);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Notice { level, message } => match level {
                    NoticeLevel::Warning | NoticeLevel::Error => warn!("{}", message),
                    _ => info!("{}", message),
                },
                Event::ShuffleComplete { shuffle_count } => info!("shuffle #{} done", shuffle_count),
                Event::DealComplete => info!("all 52 cards dealt"),
                Event::CardRevealed { card, pile } => info!("revealed {} from pile {}", card, pile),
                Event::CardPlaced { card, pile } => info!("placed {} on pile {}", card, pile),
                Event::Outcome(outcome) => {
                    let verdict = if outcome.won() { "won" } else { "lost" };
                    match &outcome.question {
                        Some(q) => println!("{} -> {} ({})", q, verdict, outcome.session_id),
                        None => println!("game {} ({})", verdict, outcome.session_id),
                    }
                }
                _ => {}
            }
        }
    });

    let session = game.new_game().await?;
    info!("session {}", session);
    match cut {
        Some(cut) => {
            game.shuffle(cut)?.wait().await?;
        }
        None => {
            game.batch_shuffle(shuffles).await?;
        }
    }
    game.start_game(question).await?;

    let exit = match game.wait_auto_play().await {
        Some(result) => result?,
        None => bail!("auto-play did not start"),
    };
    let state = game.refresh().await?;
    info!(
        "finished: {:?} after {} moves, {} kings revealed",
        exit, state.moves_count, state.kings_revealed
    );

    drop(game);
    let _ = printer.await;

    match exit {
        AutoPlayExit::Finished(_) => Ok(()),
        other => bail!("game did not finish: {:?}", other),
    }
}

fn riffle(cut: Option<usize>, times: usize) -> Result<()> {
    let mut deck = Deck::ordered();
    for step in 0..times {
        let point = cut.unwrap_or_else(|| batch_cut_point(step) as usize);
        deck = deck.riffle(point)?;
        println!("#{} cut {}: {}", step + 1, point, deck.codes().join(" "));
    }
    Ok(())
}
