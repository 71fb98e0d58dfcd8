//! Core engine for a closed predator-prey ecosystem.
//!
//! Herbivores, carnivores, and a renewable food resource occupy a bounded
//! 2-D map and act autonomously in scaled real time: one lightweight task
//! per creature runs a perceive/update/decide/act cycle against the shared
//! [`world::SpatialWorld`], with all durations derived from a single global
//! time rate. Rendering, export, and configuration front-ends are external
//! consumers of the snapshot and lifecycle-event surfaces exposed here.

mod agent;
pub mod clock;
pub mod config;
pub mod entity;
pub mod genetics;
pub mod simulation;
pub mod world;

pub use clock::SimClock;
pub use config::{ConfigError, ScaledDurations, Species, SpeciesConfig, WorldConfig, scale_secs};
pub use entity::{
    Creature, Entity, EntityId, EntityKind, Food, Gender, Position, State, StateSet, Traits,
};
pub use genetics::{CreatureSeed, Litter};
pub use simulation::{SimHandle, Simulation, SimulationError, SimulationResults};
pub use world::{SpatialWorld, WorldObserver};
