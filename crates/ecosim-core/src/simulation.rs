//! The simulation orchestrator: owns the world, seeds populations, spawns
//! agent tasks, runs the food spawner, and enforces the stop/timeout policy.

use crate::agent::{SimContext, TICK, spawn_agent, spawn_food};
use crate::clock::SimClock;
use crate::config::{ConfigError, Species, WorldConfig, scale_secs};
use crate::entity::{Creature, Entity, EntityKind, Gender, Position, Traits};
use crate::world::{SpatialWorld, WorldObserver};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when constructing a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The tokio runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Aggregate results of one run: population series sampled on every entity
/// lifecycle event, plus per-species totals and the deepest generation
/// reached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationResults {
    /// Simulated-seconds timestamps, one per sample.
    pub timestamps: Vec<u64>,
    pub herbivores_alive: Vec<usize>,
    pub carnivores_alive: Vec<usize>,
    pub food_present: Vec<usize>,
    /// Every herbivore ever registered, initial population included.
    pub total_herbivores: u64,
    /// Every carnivore ever registered, initial population included.
    pub total_carnivores: u64,
    pub total_food: u64,
    pub herbivore_generations: u32,
    pub carnivore_generations: u32,
}

/// World observer feeding the results object; sampled on every add/remove.
struct ResultsCollector {
    world: Arc<SpatialWorld>,
    clock: SimClock,
    inner: Mutex<SimulationResults>,
}

impl ResultsCollector {
    fn new(world: Arc<SpatialWorld>, clock: SimClock) -> Self {
        Self {
            world,
            clock,
            inner: Mutex::new(SimulationResults::default()),
        }
    }

    fn sample_locked(&self, results: &mut SimulationResults) {
        let (herbivores, carnivores, food) = self.world.counts();
        results.timestamps.push(self.clock.sim_elapsed_secs() as u64);
        results.herbivores_alive.push(herbivores);
        results.carnivores_alive.push(carnivores);
        results.food_present.push(food);
    }

    fn sample(&self) {
        let mut results = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.sample_locked(&mut results);
    }

    fn snapshot(&self) -> SimulationResults {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorldObserver for ResultsCollector {
    fn on_entity_added(&self, entity: &Arc<Entity>) {
        let mut results = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match entity.kind() {
            EntityKind::Creature(creature) => match creature.species {
                Species::Herbivore => {
                    results.total_herbivores += 1;
                    results.herbivore_generations =
                        results.herbivore_generations.max(creature.generation);
                }
                Species::Carnivore => {
                    results.total_carnivores += 1;
                    results.carnivore_generations =
                        results.carnivore_generations.max(creature.generation);
                }
            },
            EntityKind::Food(_) => results.total_food += 1,
        }
        self.sample_locked(&mut results);
    }

    fn on_entity_removed(&self, _entity: &Arc<Entity>) {
        self.sample();
    }
}

/// Cooperative stop handle; cloneable and usable from any thread.
#[derive(Clone)]
pub struct SimHandle {
    ctx: Arc<SimContext>,
    collector: Arc<ResultsCollector>,
}

impl SimHandle {
    /// Signal every agent to exit after finishing its current tick.
    pub fn stop(&self) {
        self.ctx.request_stop();
    }

    /// Point-in-time copy of the aggregate results, valid mid-run.
    #[must_use]
    pub fn results_snapshot(&self) -> SimulationResults {
        self.collector.snapshot()
    }
}

/// One configured simulation run.
pub struct Simulation {
    ctx: Arc<SimContext>,
    collector: Arc<ResultsCollector>,
    runtime: tokio::runtime::Runtime,
}

impl Simulation {
    /// Validate the configuration and assemble the world, clock, and runtime.
    pub fn new(config: WorldConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let width = config.map_width as f32;
        let height = config.map_height as f32;
        let cell_size = 50.0f32.min(width).min(height);
        let world = Arc::new(
            SpatialWorld::new(width, height, cell_size)
                .map_err(|_| ConfigError::InvalidConfig("map dimensions must be positive"))?,
        );
        let clock = SimClock::new(config.time_rate);
        let ctx = Arc::new(SimContext::new(config, Arc::clone(&world), clock));
        let collector = Arc::new(ResultsCollector::new(world, clock));
        let runtime = tokio::runtime::Runtime::new()?;
        Ok(Self {
            ctx,
            collector,
            runtime,
        })
    }

    /// The shared world, for external observers (renderers, exporters). Safe
    /// to query at any time; reads never disturb the simulation.
    #[must_use]
    pub fn world(&self) -> Arc<SpatialWorld> {
        Arc::clone(&self.ctx.world)
    }

    /// Cooperative stop/inspection handle.
    #[must_use]
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            ctx: Arc::clone(&self.ctx),
            collector: Arc::clone(&self.collector),
        }
    }

    /// Seed the configured populations and run to completion: extinction,
    /// simulated timeout, or an external stop, whichever comes first.
    pub fn run(self) -> SimulationResults {
        let Self {
            ctx,
            collector,
            runtime,
        } = self;

        runtime.block_on(run_inner(&ctx, &collector));
        ctx.world.clear_observers();
        collector.snapshot()
    }
}

async fn run_inner(ctx: &Arc<SimContext>, collector: &Arc<ResultsCollector>) {
    ctx.world
        .subscribe(Arc::clone(collector) as Arc<dyn WorldObserver>);

    seed_population(ctx);
    let spawner = tokio::spawn(food_loop(Arc::clone(ctx)));

    let (herbivores, carnivores, food) = ctx.world.counts();
    info!(herbivores, carnivores, food, "simulation started");

    let timeout = ctx.config.timeout_secs;
    loop {
        if ctx.is_stopped() {
            info!("stop requested");
            break;
        }
        if ctx.live_agents() == 0 {
            info!("all creatures have died");
            break;
        }
        if timeout.is_some_and(|secs| ctx.clock.sim_elapsed_secs() >= secs) {
            info!(
                sim_elapsed = ctx.clock.sim_elapsed_secs(),
                "simulated timeout elapsed"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    ctx.request_stop();
    ctx.wait_idle().await;
    spawner.abort();
    let _ = spawner.await;

    collector.sample();
    let (herbivores, carnivores, food) = ctx.world.counts();
    info!(herbivores, carnivores, food, "simulation finished");
}

fn seed_population(ctx: &Arc<SimContext>) {
    let mut rng = ctx.fork_rng();
    for species in [Species::Herbivore, Species::Carnivore] {
        let species_config = ctx.config.species(species);
        for index in 0..species_config.initial_population {
            let traits = Traits::roll(species_config.initial_credits, &mut rng);
            // Seed populations alternate gender; offspring gender is random.
            let gender = if index % 2 == 0 {
                Gender::Female
            } else {
                Gender::Male
            };
            let creature = Creature::new(species, gender, 0, traits);
            let pos = Position::new(
                rng.random_range(0.0..=ctx.world.width()),
                rng.random_range(0.0..=ctx.world.height()),
            );
            let entity = ctx.world.add(EntityKind::Creature(creature), pos);
            spawn_agent(ctx, entity);
        }
    }

    // Day one's food is present from the start.
    for _ in 0..ctx.config.food_per_day {
        spawn_food(ctx, &mut rng);
    }
}

/// Periodic food spawning and expiry sweeping, one task per run.
async fn food_loop(ctx: Arc<SimContext>) {
    let mut rng = ctx.fork_rng();
    let spawn_interval = (ctx.config.food_per_day > 0).then(|| {
        scale_secs(
            86_400.0 / f64::from(ctx.config.food_per_day),
            ctx.config.time_rate,
        )
        .max(Duration::from_millis(1))
    });
    let lifetime = scale_secs(ctx.config.food_lifetime_secs, ctx.config.time_rate);

    let mut next_spawn = spawn_interval.map(|interval| std::time::Instant::now() + interval);
    let mut ticks_until_sweep = 0u32;

    while !ctx.is_stopped() {
        tokio::time::sleep(TICK).await;

        if let (Some(interval), Some(due)) = (spawn_interval, next_spawn.as_mut()) {
            while std::time::Instant::now() >= *due {
                spawn_food(&ctx, &mut rng);
                *due += interval;
            }
        }

        if ctx.config.food_expires {
            if ticks_until_sweep == 0 {
                ticks_until_sweep = 20;
                sweep_expired_food(&ctx, lifetime);
            }
            ticks_until_sweep -= 1;
        }
    }
}

fn sweep_expired_food(ctx: &SimContext, lifetime: Duration) {
    let mut swept = 0usize;
    for entity in ctx.world.all_entities() {
        if let EntityKind::Food(food) = entity.kind() {
            if food.is_expired(lifetime) && food.try_consume() {
                ctx.world.remove(entity.id());
                swept += 1;
            }
        }
    }
    if swept > 0 {
        debug!(swept, "expired food removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_fails_construction() {
        let mut config = WorldConfig::default();
        config.mutation_chance = 2.0;
        assert!(matches!(
            Simulation::new(config),
            Err(SimulationError::Config(_))
        ));
    }

    #[test]
    fn empty_world_run_returns_immediately() {
        let mut config = WorldConfig::default();
        config.herbivore.initial_population = 0;
        config.carnivore.initial_population = 0;
        config.food_per_day = 0;
        let sim = Simulation::new(config).expect("simulation");
        let results = sim.run();
        assert_eq!(results.total_herbivores, 0);
        assert_eq!(results.total_carnivores, 0);
    }

    #[test]
    fn results_track_initial_population_totals() {
        let mut config = WorldConfig::default();
        config.rng_seed = Some(21);
        config.herbivore.initial_population = 5;
        config.carnivore.initial_population = 3;
        config.food_per_day = 4;
        // Everything starves almost instantly at this rate.
        config.time_rate = 500_000.0;
        config.energy_drain_per_hour = 1.0;
        config.starvation_damage_per_hour = 1.0;
        let sim = Simulation::new(config).expect("simulation");
        let results = sim.run();

        assert_eq!(results.total_herbivores, 5);
        assert_eq!(results.total_carnivores, 3);
        assert!(results.total_food >= 4);
        assert_eq!(results.herbivore_generations, 0);
        // Final sample shows the extinct population.
        assert_eq!(results.herbivores_alive.last(), Some(&0));
        assert_eq!(results.carnivores_alive.last(), Some(&0));
    }

    #[test]
    fn results_serialize_to_stable_shape() {
        let results = SimulationResults::default();
        let json = serde_json::to_value(&results).expect("serialize");
        for key in [
            "timestamps",
            "herbivores_alive",
            "carnivores_alive",
            "food_present",
            "total_herbivores",
            "total_carnivores",
            "total_food",
            "herbivore_generations",
            "carnivore_generations",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }
}
