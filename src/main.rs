use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;

use draughts_zero::client::play_game;
use draughts_zero::game::TugOfWar;
use draughts_zero::logging::setup_logging;
use draughts_zero::mcts::{TsOptions, UniformOracle};
use draughts_zero::msg::{ModelPair, MsgRequest, Records};
use draughts_zero::server::{GameOptions, RecordSink, TrainCtrl};

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
enum RunMode {
    /// Play standalone selfplay games and write the records to disk.
    Selfplay,
    /// Run an in-process training loop: server controls plus simulated
    /// clients, driving a full model promotion cycle.
    TrainLoop,
}

#[derive(Parser, Debug)]
#[command(name = "draughts_zero", version)]
struct Config {
    #[arg(long, value_enum, default_value = "selfplay")]
    mode: RunMode,

    /// Number of games to play (selfplay mode)
    #[arg(short = 'g', long, default_value_t = 20)]
    num_games: usize,

    /// Search worker threads per game
    #[arg(short = 't', long, default_value_t = 2)]
    num_threads: usize,

    /// Rollouts per worker per move
    #[arg(short = 's', long, default_value_t = 25)]
    num_rollouts_per_thread: usize,

    /// Board edge distance to win the demo game
    #[arg(long, default_value_t = 4)]
    limit: i32,

    /// Draw after this many plies
    #[arg(long, default_value_t = 64)]
    max_moves: usize,

    /// Directory for game record files
    #[arg(long, default_value = "records")]
    record_dir: String,

    /// Simulated clients (train-loop mode)
    #[arg(long, default_value_t = 4)]
    num_clients: usize,

    /// Weight-update rounds to simulate (train-loop mode)
    #[arg(long, default_value_t = 3)]
    num_rounds: usize,

    /// Selfplay games required before the first weight update
    #[arg(long, default_value_t = 8)]
    selfplay_init_num: i64,

    /// Evaluation games per candidate model
    #[arg(long, default_value_t = 4)]
    eval_num_games: usize,
}

fn search_options(config: &Config) -> TsOptions {
    TsOptions {
        num_threads: config.num_threads,
        num_rollouts_per_thread: config.num_rollouts_per_thread,
        ..TsOptions::default()
    }
}

fn run_selfplay(config: &Config) -> draughts_zero::Result<()> {
    let request = MsgRequest {
        vers: ModelPair {
            black_ver: 0,
            white_ver: 0,
            mcts_opt: search_options(config),
        },
        ..MsgRequest::default()
    };
    let oracle = Arc::new(UniformOracle::new(0));

    let records: Vec<_> = (0..config.num_games)
        .into_par_iter()
        .filter_map(|i| {
            let mut req = request.clone();
            req.vers.mcts_opt.seed = i as u64;
            match play_game(
                TugOfWar::new(config.limit, config.max_moves),
                &req,
                Arc::clone(&oracle),
                Arc::clone(&oracle),
            ) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("game {i} failed: {e}");
                    None
                }
            }
        })
        .collect();

    let mut sink = RecordSink::new(&config.record_dir)?;
    let (mut wins, mut draws, mut losses) = (0, 0, 0);
    for record in &records {
        match record.result.reward {
            r if r > 0.0 => wins += 1,
            r if r < 0.0 => losses += 1,
            _ => draws += 1,
        }
        sink.write(record)?;
    }
    sink.flush()?;
    info!(
        "{} games: black {wins} wins, {draws} draws, {losses} losses; records in {}",
        records.len(),
        sink.path().display()
    );
    Ok(())
}

/// One request/play/report cycle for every simulated client.
fn play_one_pass(
    config: &Config,
    ctrl: &mut TrainCtrl,
    identities: &[String],
) -> draughts_zero::Result<()> {
    for identity in identities {
        let req = ctrl.fill_in_request(identity);
        if req.request.vers.wait() {
            continue;
        }
        let mut opts = search_options(config);
        opts.seed = req.seq as u64;
        let mut request = req.request.clone();
        request.vers.mcts_opt = if request.vers.is_selfplay() {
            opts
        } else {
            opts.for_eval()
        };
        // A uniform oracle stands in for every version here; real
        // deployments load the requested weights.
        let black_oracle = Arc::new(UniformOracle::new(request.vers.black_ver));
        let white_oracle = Arc::new(UniformOracle::new(request.vers.white_ver));
        let record = play_game(
            TugOfWar::new(config.limit, config.max_moves),
            &request,
            black_oracle,
            white_oracle,
        )?;
        let mut batch = Records::new(identity.clone());
        batch.records.push(record);
        ctrl.on_receive(batch)?;
    }
    Ok(())
}

fn run_train_loop(config: &Config) -> draughts_zero::Result<()> {
    let mut ctrl = TrainCtrl::new(GameOptions {
        selfplay_init_num: config.selfplay_init_num,
        selfplay_update_num: config.selfplay_init_num / 2,
        eval_num_games: config.eval_num_games,
        selfplay_only_ratio: 0.5,
        ..GameOptions::default()
    });
    ctrl.set_record_dir(&config.record_dir)?;
    ctrl.set_initial_version(0);

    let identities: Vec<String> = (0..config.num_clients.max(1))
        .map(|i| format!("client-{i}"))
        .collect();
    let mut next_ver = 1;

    for round in 0..config.num_rounds {
        info!("round {round}: gathering samples for model {}", ctrl.current_model());
        while ctrl.need_wait_for_more_sample() {
            play_one_pass(config, &mut ctrl, &identities)?;
        }

        info!(
            "round {round}: {} games in replay, exporting model {next_ver}",
            ctrl.replay_buffer().len()
        );
        let trained_from = ctrl.current_model();
        ctrl.notify_current_weight_update();
        if !ctrl.add_new_model_for_evaluation(trained_from, next_ver) {
            warn!("model {next_ver} refused by the evaluation gate");
            next_ver += 1;
            continue;
        }
        info!(
            "round {round}: ~{} eval machine(s) needed for the verdict",
            ctrl.num_eval_machines_needed()
        );
        while ctrl.num_pending_eval() > 0 {
            if ctrl.clients().num_eval() == 0 {
                warn!("no eval-capable client in the fleet, verdict on model {next_ver} stays open");
                break;
            }
            play_one_pass(config, &mut ctrl, &identities)?;
        }
        info!(
            "round {round}: verdict in, best model is now {}",
            ctrl.best_model()
        );
        next_ver += 1;
    }
    info!(
        "done: best model {}, {} games total",
        ctrl.best_model(),
        ctrl.replay_buffer().total_inserted()
    );
    Ok(())
}

fn main() -> draughts_zero::Result<()> {
    let config = Config::parse();
    if let Err(e) = setup_logging("info") {
        eprintln!("logger init failed: {e}");
    }
    info!("draughts_zero {} starting in {:?} mode", draughts_zero::VERSION, config.mode);
    match config.mode {
        RunMode::Selfplay => run_selfplay(&config),
        RunMode::TrainLoop => run_train_loop(&config),
    }
}
