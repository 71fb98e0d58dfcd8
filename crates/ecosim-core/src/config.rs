//! World and species configuration, including the time-scaling pass.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when constructing a simulation from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Diet tag selecting an agent's target-selection rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Species {
    Herbivore,
    Carnivore,
}

impl Species {
    /// Human-readable label used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Herbivore => "herbivore",
            Self::Carnivore => "carnivore",
        }
    }
}

/// Per-species tunables. Raw durations are expressed in real-world days and
/// converted by the scaling pass once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeciesConfig {
    /// Creatures seeded at run start.
    pub initial_population: usize,
    /// Smallest litter a mating can produce.
    pub min_children: u32,
    /// Largest litter a mating can produce.
    pub max_children: u32,
    /// Gestation length in days.
    pub pregnancy_days: f64,
    /// Natural lifespan in days, honored when death from old age is enabled.
    pub life_expectancy_days: f64,
    /// Trait budget distributed across seed-population creatures.
    pub initial_credits: f64,
}

impl SpeciesConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_children == 0 {
            return Err(ConfigError::InvalidConfig("min_children must be at least 1"));
        }
        if self.min_children > self.max_children {
            return Err(ConfigError::InvalidConfig(
                "min_children cannot exceed max_children",
            ));
        }
        if self.pregnancy_days <= 0.0 || self.life_expectancy_days <= 0.0 {
            return Err(ConfigError::InvalidConfig(
                "pregnancy and life expectancy must be positive",
            ));
        }
        if self.initial_credits <= 0.0 {
            return Err(ConfigError::InvalidConfig(
                "initial_credits must be positive",
            ));
        }
        Ok(())
    }
}

/// Static configuration for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Simulated seconds elapsing per real second.
    pub time_rate: f64,
    /// Map width in world units.
    pub map_width: f64,
    /// Map height in world units.
    pub map_height: f64,
    /// Hard cap on live creatures; births beyond it are declined.
    pub max_creatures: usize,
    /// Food items spawned per simulated day; 0 disables the spawner.
    pub food_per_day: u32,
    /// Whether uneaten food disappears after its lifetime.
    pub food_expires: bool,
    /// Food lifetime in simulated seconds, honored when `food_expires` is set.
    pub food_lifetime_secs: f64,
    /// Energy restored by one food item.
    pub food_energy: f64,
    /// Probability that a single offspring trait mutates.
    pub mutation_chance: f64,
    /// Relative magnitude bound of a trait mutation.
    pub mutation_impact: f64,
    /// Whether creatures die once their scaled life expectancy elapses.
    pub death_from_old_age: bool,
    /// Run timeout in simulated seconds; `None` runs until extinction or stop.
    pub timeout_secs: Option<f64>,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Fraction of max energy below which a creature counts as hungry.
    pub hunger_threshold: f64,
    /// Fraction of max energy drained per simulated hour.
    pub energy_drain_per_hour: f64,
    /// Fraction of max health lost per simulated hour while starving.
    pub starvation_damage_per_hour: f64,
    pub herbivore: SpeciesConfig,
    pub carnivore: SpeciesConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            time_rate: 60.0,
            map_width: 800.0,
            map_height: 800.0,
            max_creatures: 500,
            food_per_day: 60,
            food_expires: true,
            food_lifetime_secs: 86_400.0,
            food_energy: 40.0,
            mutation_chance: 0.1,
            mutation_impact: 0.1,
            death_from_old_age: true,
            timeout_secs: None,
            rng_seed: None,
            hunger_threshold: 0.5,
            energy_drain_per_hour: 1.0 / 48.0,
            starvation_damage_per_hour: 1.0 / 24.0,
            herbivore: SpeciesConfig {
                initial_population: 24,
                min_children: 1,
                max_children: 6,
                pregnancy_days: 1.0,
                life_expectancy_days: 15.0,
                initial_credits: 150.0,
            },
            carnivore: SpeciesConfig {
                initial_population: 6,
                min_children: 1,
                max_children: 3,
                pregnancy_days: 2.0,
                life_expectancy_days: 20.0,
                initial_credits: 100.0,
            },
        }
    }
}

impl WorldConfig {
    /// Validates construction-time invariants. Violations are configuration
    /// errors and never surface at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_rate > 0.0) {
            return Err(ConfigError::InvalidConfig("time_rate must be positive"));
        }
        if !(self.map_width > 0.0) || !(self.map_height > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "map dimensions must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.mutation_chance) {
            return Err(ConfigError::InvalidConfig(
                "mutation_chance must be within [0, 1]",
            ));
        }
        if self.mutation_impact < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "mutation_impact must be non-negative",
            ));
        }
        if self.food_energy < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "food_energy must be non-negative",
            ));
        }
        if self.food_expires && !(self.food_lifetime_secs > 0.0) {
            return Err(ConfigError::InvalidConfig(
                "food_lifetime_secs must be positive when food expires",
            ));
        }
        if !(self.hunger_threshold > 0.0 && self.hunger_threshold <= 1.0) {
            return Err(ConfigError::InvalidConfig(
                "hunger_threshold must be within (0, 1]",
            ));
        }
        if !(self.energy_drain_per_hour > 0.0 && self.energy_drain_per_hour <= 1.0)
            || !(self.starvation_damage_per_hour > 0.0 && self.starvation_damage_per_hour <= 1.0)
        {
            return Err(ConfigError::InvalidConfig(
                "metabolism rates must be within (0, 1]",
            ));
        }
        if let Some(timeout) = self.timeout_secs {
            if !(timeout > 0.0) {
                return Err(ConfigError::InvalidConfig("timeout_secs must be positive"));
            }
        }
        self.herbivore.validate()?;
        self.carnivore.validate()?;
        Ok(())
    }

    /// Species table lookup.
    #[must_use]
    pub fn species(&self, species: Species) -> &SpeciesConfig {
        match species {
            Species::Herbivore => &self.herbivore,
            Species::Carnivore => &self.carnivore,
        }
    }
}

/// Scale a simulated duration in seconds to real elapsed time under the
/// configured time rate, truncating to whole milliseconds.
#[must_use]
pub fn scale_secs(secs: f64, time_rate: f64) -> Duration {
    Duration::from_millis((secs * 1000.0 / time_rate) as u64)
}

const EATING_SECS: f64 = 120.0;
const MATING_SECS: f64 = 300.0;
const WAIT_TO_MATE_SECS: f64 = 50.0;
const MOVE_ONE_DIRECTION_SECS: f64 = 300.0;
const SECS_PER_DAY: f64 = 86_400.0;

/// Per-species durations scaled to the run's time rate.
///
/// Values are real-time durations directly comparable against `Instant`
/// arithmetic. The conversion is pure: recomputing with the same inputs
/// always yields the same outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledDurations {
    /// Time spent consuming one food item or carcass.
    pub eating: Duration,
    /// Length of the mating interaction.
    pub mating: Duration,
    /// Cooldown before a creature may mate again.
    pub wait_to_mate: Duration,
    /// How long a searching creature holds one wander heading.
    pub move_one_direction: Duration,
    /// Gestation length.
    pub pregnancy: Duration,
    /// Natural lifespan.
    pub life_expectancy: Duration,
}

impl ScaledDurations {
    /// Derive the scaled duration set for one species.
    #[must_use]
    pub fn for_species(species: &SpeciesConfig, time_rate: f64) -> Self {
        Self {
            eating: scale_secs(EATING_SECS, time_rate),
            mating: scale_secs(MATING_SECS, time_rate),
            wait_to_mate: scale_secs(WAIT_TO_MATE_SECS, time_rate),
            move_one_direction: scale_secs(MOVE_ONE_DIRECTION_SECS, time_rate),
            pregnancy: scale_secs(SECS_PER_DAY * species.pregnancy_days, time_rate),
            life_expectancy: scale_secs(SECS_PER_DAY * species.life_expectancy_days, time_rate),
        }
    }
}
