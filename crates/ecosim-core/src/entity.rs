//! Entities placed in the world: creatures and food.
//!
//! A creature's continuous traits are fixed at birth; everything that changes
//! over its lifetime lives in [`Vitals`] behind a mutex owned conceptually by
//! the creature's agent task. The world only indexes entities and never
//! mutates them.

use crate::config::Species;
use crate::genetics::Litter;
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

new_key_type! {
    /// Stable handle for world entities backed by a generational slot map.
    pub struct EntityId;
}

/// 2-D world coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Advance toward `target` by at most `distance`, never overshooting.
    #[must_use]
    pub fn step_toward(self, target: Self, distance: f32) -> Self {
        let gap = self.distance_to(target);
        if gap <= distance || gap == 0.0 {
            return target;
        }
        let scale = distance / gap;
        Self {
            x: self.x + (target.x - self.x) * scale,
            y: self.y + (target.y - self.y) * scale,
        }
    }

    /// Advance along a unit heading by `distance`, clamped to the map bounds.
    #[must_use]
    pub fn step_heading(self, heading: (f32, f32), distance: f32, width: f32, height: f32) -> Self {
        Self {
            x: (self.x + heading.0 * distance).clamp(0.0, width),
            y: (self.y + heading.1 * distance).clamp(0.0, height),
        }
    }
}

/// Lock-free position cell; both coordinates are packed into one atomic so
/// readers always observe a consistent pair.
#[derive(Debug)]
pub(crate) struct AtomicPosition(AtomicU64);

impl AtomicPosition {
    pub(crate) fn new(pos: Position) -> Self {
        Self(AtomicU64::new(Self::pack(pos)))
    }

    fn pack(pos: Position) -> u64 {
        (u64::from(pos.x.to_bits()) << 32) | u64::from(pos.y.to_bits())
    }

    pub(crate) fn load(&self) -> Position {
        let bits = self.0.load(Ordering::Acquire);
        Position {
            x: f32::from_bits((bits >> 32) as u32),
            y: f32::from_bits(bits as u32),
        }
    }

    pub(crate) fn store(&self, pos: Position) {
        self.0.store(Self::pack(pos), Ordering::Release);
    }
}

/// Binary gender assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub(crate) fn roll(rng: &mut SmallRng) -> Self {
        if rng.random_bool(0.5) {
            Self::Male
        } else {
            Self::Female
        }
    }
}

/// Behavioral flags carried by a creature. Flags form a set; only
/// `Alive`/`Dead` are mutually exclusive and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Thinking,
    Moving,
    Eating,
    Hungry,
    Pregnant,
    Alive,
    Dead,
    SearchingForFood,
    Mating,
}

impl State {
    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Compact set of [`State`] flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSet {
    bits: u16,
}

impl StateSet {
    /// Fresh creature state: alive, nothing else.
    #[must_use]
    pub fn alive() -> Self {
        Self {
            bits: State::Alive.bit(),
        }
    }

    #[must_use]
    pub const fn contains(self, state: State) -> bool {
        self.bits & state.bit() != 0
    }

    /// Insert a flag. Re-inserting `Alive` after death is ignored: `Dead`
    /// is terminal.
    pub fn insert(&mut self, state: State) {
        if matches!(state, State::Alive) && self.contains(State::Dead) {
            return;
        }
        if matches!(state, State::Dead) {
            self.bits &= !State::Alive.bit();
        }
        self.bits |= state.bit();
    }

    pub fn remove(&mut self, state: State) {
        self.bits &= !state.bit();
    }
}

/// Continuous traits, immutable after birth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Traits {
    pub max_health: f64,
    pub max_energy: f64,
    pub sight_range: f64,
    pub interaction_range: f64,
    /// Distance covered per simulated minute.
    pub movement_speed: f64,
}

impl Traits {
    /// Roll a seed-population trait set, distributing a credit budget across
    /// the five traits with random weights.
    pub fn roll(credits: f64, rng: &mut SmallRng) -> Self {
        let mut weights = [0.0f64; 5];
        for w in &mut weights {
            *w = rng.random_range(0.4..1.0);
        }
        let total: f64 = weights.iter().sum();
        let share = |i: usize| credits * weights[i] / total;

        Self {
            max_health: share(0).max(10.0),
            max_energy: share(1).max(10.0),
            sight_range: (share(2) * 2.5).max(20.0),
            interaction_range: (share(3) * 0.5).max(3.0),
            movement_speed: (share(4) * 0.35).max(2.0),
        }
    }
}

/// Mutable creature state, guarded by the creature's mutex.
#[derive(Debug)]
pub struct Vitals {
    pub health: f64,
    pub energy: f64,
    pub states: StateSet,
    /// Simulated-seconds timestamp recorded once, at death.
    pub death_at: Option<f64>,
    /// Brood carried by a mated female, conceived at the mating handshake.
    pub carrying: Option<Litter>,
    /// Start of the most recent mating, driving the wait-to-mate cooldown.
    pub mated_at: Option<Instant>,
    /// End of the in-progress mating interaction.
    pub mating_until: Option<Instant>,
    /// End of the in-progress eating action.
    pub eating_until: Option<Instant>,
}

impl Vitals {
    fn new(traits: &Traits) -> Self {
        Self {
            health: traits.max_health,
            energy: traits.max_energy,
            states: StateSet::alive(),
            death_at: None,
            carrying: None,
            mated_at: None,
            mating_until: None,
            eating_until: None,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.states.contains(State::Alive)
    }

    /// Mating eligibility evaluated against an already-held guard.
    #[must_use]
    pub fn mating_ready(&self, wait_to_mate: Duration, now: Instant) -> bool {
        self.is_alive()
            && self.carrying.is_none()
            && !self.mating_until.is_some_and(|until| now < until)
            && self
                .mated_at
                .is_none_or(|at| now.duration_since(at) >= wait_to_mate)
    }

    /// Flip to the terminal dead state, recording the timestamp once.
    pub fn mark_dead(&mut self, now_sim: f64) {
        if self.states.contains(State::Dead) {
            return;
        }
        self.states.insert(State::Dead);
        self.death_at = Some(now_sim);
    }
}

/// An autonomous creature.
#[derive(Debug)]
pub struct Creature {
    pub species: Species,
    pub gender: Gender,
    pub generation: u32,
    pub traits: Traits,
    pub born_at: Instant,
    vitals: Mutex<Vitals>,
}

impl Creature {
    #[must_use]
    pub fn new(species: Species, gender: Gender, generation: u32, traits: Traits) -> Self {
        Self {
            species,
            gender,
            generation,
            vitals: Mutex::new(Vitals::new(&traits)),
            traits,
            born_at: Instant::now(),
        }
    }

    /// Lock the mutable state, recovering from a poisoned lock; an agent
    /// panicking mid-update must not take unrelated agents down with it.
    pub fn vitals(&self) -> MutexGuard<'_, Vitals> {
        self.vitals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.vitals().is_alive()
    }

    /// Whether this creature can enter a mating interaction right now.
    #[must_use]
    pub fn can_mate(&self, wait_to_mate: Duration, now: Instant) -> bool {
        self.vitals().mating_ready(wait_to_mate, now)
    }

    /// Take the creature's remaining health pool, killing it. Returns `None`
    /// if it was already dead (a concurrent predator won the race).
    pub fn harvest(&self, now_sim: f64) -> Option<f64> {
        let mut vitals = self.vitals();
        if !vitals.is_alive() {
            return None;
        }
        let pool = vitals.health;
        vitals.health = 0.0;
        vitals.mark_dead(now_sim);
        Some(pool)
    }

    /// Add energy, clamped to the trait cap.
    pub fn gain_energy(&self, amount: f64) {
        let mut vitals = self.vitals();
        vitals.energy = (vitals.energy + amount).clamp(0.0, self.traits.max_energy);
    }
}

/// A consumable resource; eaten atomically by at most one creature.
#[derive(Debug)]
pub struct Food {
    pub energy: f64,
    pub spawned_at: Instant,
    consumed: AtomicBool,
}

impl Food {
    #[must_use]
    pub fn new(energy: f64) -> Self {
        Self {
            energy,
            spawned_at: Instant::now(),
            consumed: AtomicBool::new(false),
        }
    }

    /// Whether the food is still unclaimed. Racy by nature; `try_consume`
    /// is the authoritative claim.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.consumed.load(Ordering::Acquire)
    }

    /// Claim this food. Exactly one caller ever wins.
    pub fn try_consume(&self) -> bool {
        self.consumed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.spawned_at.elapsed() >= lifetime
    }
}

/// Discriminated payload of a world entity.
#[derive(Debug)]
pub enum EntityKind {
    Creature(Creature),
    Food(Food),
}

/// Anything placed in the world: a unique identity, a position, and either a
/// creature or a food payload. Owned by the world once registered; removed
/// entities are detached, never reused.
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    pos: AtomicPosition,
    kind: EntityKind,
}

impl Entity {
    pub(crate) fn new(id: EntityId, pos: Position, kind: EntityKind) -> Self {
        Self {
            id,
            pos: AtomicPosition::new(pos),
            kind,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub fn position(&self) -> Position {
        self.pos.load()
    }

    pub(crate) fn set_position(&self, pos: Position) {
        self.pos.store(pos);
    }

    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    #[must_use]
    pub fn as_creature(&self) -> Option<&Creature> {
        match &self.kind {
            EntityKind::Creature(creature) => Some(creature),
            EntityKind::Food(_) => None,
        }
    }

    #[must_use]
    pub fn as_food(&self) -> Option<&Food> {
        match &self.kind {
            EntityKind::Food(food) => Some(food),
            EntityKind::Creature(_) => None,
        }
    }

    /// Whether this is a living creature of the given species.
    #[must_use]
    pub fn is_living(&self, species: Species) -> bool {
        self.as_creature()
            .is_some_and(|c| c.species == species && c.is_alive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn dead_is_terminal() {
        let mut states = StateSet::alive();
        states.insert(State::Dead);
        assert!(!states.contains(State::Alive));
        states.insert(State::Alive);
        assert!(!states.contains(State::Alive));
        assert!(states.contains(State::Dead));
    }

    #[test]
    fn flags_are_a_set() {
        let mut states = StateSet::alive();
        states.insert(State::Hungry);
        states.insert(State::SearchingForFood);
        states.insert(State::Moving);
        assert!(states.contains(State::Hungry));
        assert!(states.contains(State::Moving));
        states.remove(State::Moving);
        assert!(!states.contains(State::Moving));
        assert!(states.contains(State::SearchingForFood));
    }

    #[test]
    fn step_toward_never_overshoots() {
        let from = Position::new(0.0, 0.0);
        let to = Position::new(3.0, 4.0);
        assert_eq!(from.step_toward(to, 10.0), to);
        let partial = from.step_toward(to, 2.5);
        assert!((partial.distance_to(from) - 2.5).abs() < 1e-4);
    }

    #[test]
    fn food_consumed_exactly_once() {
        let food = Food::new(25.0);
        assert!(food.try_consume());
        assert!(!food.try_consume());
    }

    #[test]
    fn harvest_races_yield_single_winner() {
        let traits = Traits {
            max_health: 40.0,
            max_energy: 40.0,
            sight_range: 50.0,
            interaction_range: 5.0,
            movement_speed: 5.0,
        };
        let creature = Creature::new(Species::Herbivore, Gender::Male, 0, traits);
        assert_eq!(creature.harvest(1.0), Some(40.0));
        assert_eq!(creature.harvest(2.0), None);
        assert!(!creature.is_alive());
        assert_eq!(creature.vitals().death_at, Some(1.0));
    }

    #[test]
    fn energy_gain_clamps_to_cap() {
        let traits = Traits {
            max_health: 40.0,
            max_energy: 50.0,
            sight_range: 50.0,
            interaction_range: 5.0,
            movement_speed: 5.0,
        };
        let creature = Creature::new(Species::Herbivore, Gender::Female, 0, traits);
        creature.gain_energy(500.0);
        assert_eq!(creature.vitals().energy, 50.0);
    }

    #[test]
    fn rolled_traits_stay_positive() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..64 {
            let traits = Traits::roll(150.0, &mut rng);
            assert!(traits.max_health > 0.0);
            assert!(traits.max_energy > 0.0);
            assert!(traits.sight_range >= 20.0);
            assert!(traits.interaction_range >= 3.0);
            assert!(traits.movement_speed >= 2.0);
        }
    }

    #[test]
    fn atomic_position_round_trips() {
        let cell = AtomicPosition::new(Position::new(1.5, -2.25));
        assert_eq!(cell.load(), Position::new(1.5, -2.25));
        cell.store(Position::new(100.0, 200.0));
        assert_eq!(cell.load(), Position::new(100.0, 200.0));
    }
}
