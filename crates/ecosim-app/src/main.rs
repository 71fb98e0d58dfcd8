use anyhow::Result;
use clap::Parser;
use ecosim_core::{Simulation, WorldConfig};
use tracing::info;

/// Run a predator-prey ecosystem simulation and report aggregate results.
#[derive(Debug, Parser)]
#[command(name = "ecosim", version, about)]
struct Args {
    /// Simulated seconds per real second.
    #[arg(long)]
    time_rate: Option<f64>,

    /// Run timeout in simulated seconds.
    #[arg(long)]
    timeout: Option<f64>,

    /// Initial herbivore population.
    #[arg(long)]
    herbivores: Option<usize>,

    /// Initial carnivore population.
    #[arg(long)]
    carnivores: Option<usize>,

    /// Hard cap on live creatures.
    #[arg(long)]
    max_creatures: Option<usize>,

    /// Food items spawned per simulated day.
    #[arg(long)]
    food_per_day: Option<u32>,

    /// RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Print the full results object as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = build_config(&args);

    let simulation = Simulation::new(config)?;
    let results = simulation.run();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        info!(
            herbivores_born = results.total_herbivores,
            carnivores_born = results.total_carnivores,
            food_spawned = results.total_food,
            herbivore_generations = results.herbivore_generations,
            carnivore_generations = results.carnivore_generations,
            samples = results.timestamps.len(),
            "run complete",
        );
        if let (Some(herbivores), Some(carnivores)) = (
            results.herbivores_alive.last(),
            results.carnivores_alive.last(),
        ) {
            info!(herbivores, carnivores, "final population");
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn build_config(args: &Args) -> WorldConfig {
    let mut config = WorldConfig::default();
    if let Some(time_rate) = args.time_rate {
        config.time_rate = time_rate;
    }
    config.timeout_secs = args.timeout.or(config.timeout_secs);
    if let Some(herbivores) = args.herbivores {
        config.herbivore.initial_population = herbivores;
    }
    if let Some(carnivores) = args.carnivores {
        config.carnivore.initial_population = carnivores;
    }
    if let Some(max_creatures) = args.max_creatures {
        config.max_creatures = max_creatures;
    }
    if let Some(food_per_day) = args.food_per_day {
        config.food_per_day = food_per_day;
    }
    config.rng_seed = args.seed.or(config.rng_seed);
    config
}
