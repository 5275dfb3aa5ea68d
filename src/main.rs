use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info};
use orchestrator::{OrchestratorError, Session, configs::RunConfig};

/// Fine-tunes a Vision Transformer on CIFAR-100 with an AdapterPlus bottleneck adapter.
#[derive(Parser, Debug)]
#[command(name = "adapter-plus", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trains the adapter and the classification head.
    Train {
        /// The JSON run config.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Measures the accuracy over the evaluation split.
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        /// A directory with a saved adapter, the freshly initialized one is used otherwise.
        #[arg(long)]
        adapter: Option<PathBuf>,
    },
    /// Classifies a single image.
    Predict {
        #[arg(short, long)]
        config: PathBuf,
        /// A directory with a saved adapter.
        #[arg(long, conflicts_with = "hub", required_unless_present = "hub")]
        adapter: Option<PathBuf>,
        /// A repository of the hub in the config to pull the adapter from.
        #[arg(long)]
        hub: Option<String>,
        #[arg(long)]
        image: PathBuf,
    },
}

fn main() -> orchestrator::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    run(cli.command).inspect_err(|e| error!("{e}"))
}

fn run(command: Command) -> orchestrator::Result<()> {
    match command {
        Command::Train { config } => {
            let (_, report) = orchestrator::train(config)?;

            println!("steps: {}", report.global_step);
            println!("train loss: {:.4}", report.train_loss);
            if let Some(eval) = report.eval {
                println!("eval loss: {:.4}", eval.loss);
                println!("eval accuracy: {:.4}", eval.accuracy);
            }
            println!("adapter: {}", report.adapter_dir.display());
            if let Some(dir) = report.hub_dir {
                println!("hub: {}", dir.display());
            }
        }
        Command::Evaluate { config, adapter } => {
            let mut session = Session::new(RunConfig::load(config)?)?;
            if let Some(dir) = adapter {
                session.load_adapter(dir)?;
            }

            let report = session.evaluate()?;
            println!("samples: {}", report.samples);
            println!("eval loss: {:.4}", report.loss);
            println!("eval accuracy: {:.4}", report.accuracy);
        }
        Command::Predict {
            config,
            adapter,
            hub,
            image,
        } => {
            let mut session = Session::new(RunConfig::load(config)?)?;
            match (adapter, hub) {
                (Some(dir), _) => session.load_adapter(dir)?,
                (None, Some(repo_id)) => session.pull_from_hub(&repo_id)?,
                (None, None) => {
                    return Err(OrchestratorError::InvalidConfig(
                        "predict needs --adapter or --hub".into(),
                    ));
                }
            };

            info!("classifying {}", image.display());
            let prediction = session.predict(&data::open_image(&image)?)?;
            println!(
                "{} (class {}, probability {:.4})",
                prediction.label, prediction.class_id, prediction.score
            );
        }
    }

    Ok(())
}
