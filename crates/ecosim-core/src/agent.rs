//! The per-creature agent loop: perceive, update self-state, decide, act,
//! sleep, repeat until dead.
//!
//! Every live creature is driven by exactly one tokio task. The task owns the
//! creature's behavioral decisions; the only shared mutation points are the
//! world registry and other entities' vitals during direct interactions
//! (predation, the mating handshake). Errors never cross task boundaries: a
//! task that finds itself in an impossible state marks its creature dead and
//! exits alone.

use crate::clock::SimClock;
use crate::config::{ScaledDurations, Species, WorldConfig};
use crate::entity::{Creature, Entity, EntityKind, Food, Gender, Position, State};
use crate::genetics::{self, Litter};
use crate::world::SpatialWorld;
use ordered_float::OrderedFloat;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Real-time pause between agent cycles, independent of the time rate.
pub(crate) const TICK: Duration = Duration::from_millis(50);

/// Jitter applied to newborn spawn positions around the mother.
const BIRTH_JITTER: f32 = 5.0;

/// Shared context injected into every agent at spawn time. Explicitly
/// constructed by the orchestrator; there is no ambient world lookup.
pub(crate) struct SimContext {
    pub world: Arc<SpatialWorld>,
    pub config: WorldConfig,
    pub clock: SimClock,
    herbivore_times: ScaledDurations,
    carnivore_times: ScaledDurations,
    stop: AtomicBool,
    live_agents: AtomicUsize,
    idle: Notify,
    seed: u64,
    agent_serial: AtomicU64,
}

impl SimContext {
    pub(crate) fn new(config: WorldConfig, world: Arc<SpatialWorld>, clock: SimClock) -> Self {
        let herbivore_times = ScaledDurations::for_species(&config.herbivore, config.time_rate);
        let carnivore_times = ScaledDurations::for_species(&config.carnivore, config.time_rate);
        let seed = config.rng_seed.unwrap_or_else(rand::random);
        Self {
            world,
            clock,
            herbivore_times,
            carnivore_times,
            config,
            stop: AtomicBool::new(false),
            live_agents: AtomicUsize::new(0),
            idle: Notify::new(),
            seed,
            agent_serial: AtomicU64::new(0),
        }
    }

    pub(crate) fn times(&self, species: Species) -> &ScaledDurations {
        match species {
            Species::Herbivore => &self.herbivore_times,
            Species::Carnivore => &self.carnivore_times,
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn live_agents(&self) -> usize {
        self.live_agents.load(Ordering::Acquire)
    }

    /// Fork a deterministic per-agent RNG from the run seed.
    pub(crate) fn fork_rng(&self) -> SmallRng {
        let serial = self.agent_serial.fetch_add(1, Ordering::AcqRel);
        SmallRng::seed_from_u64(
            self.seed ^ (serial.wrapping_add(1)).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        )
    }

    /// Resolve once every agent task has exited.
    ///
    /// The waiter must be registered before the count check: `notify_waiters`
    /// stores no permit, so an unpolled `Notified` created in between would
    /// miss the last agent's wakeup and hang forever.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live_agents() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps the live-agent count accurate even if a task unwinds.
struct AgentGuard {
    ctx: Arc<SimContext>,
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        if self.ctx.live_agents.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx.idle.notify_waiters();
        }
    }
}

/// Launch the agent task for a registered creature entity.
pub(crate) fn spawn_agent(ctx: &Arc<SimContext>, entity: Arc<Entity>) {
    ctx.live_agents.fetch_add(1, Ordering::AcqRel);
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let guard = AgentGuard { ctx };
        drive(&guard.ctx, entity).await;
    });
}

async fn drive(ctx: &Arc<SimContext>, entity: Arc<Entity>) {
    let Some(creature) = entity.as_creature() else {
        // Unreachable by construction; terminate just this unit of control.
        warn!(entity = ?entity.id(), "agent task attached to a non-creature entity");
        return;
    };

    let mut agent = Agent {
        ctx,
        entity: &entity,
        creature,
        times: ctx.times(creature.species),
        rng: ctx.fork_rng(),
        last_tick: Instant::now(),
        wander: None,
    };

    while !ctx.is_stopped() {
        if !agent.cycle() {
            break;
        }
        tokio::time::sleep(TICK).await;
    }

    if !creature.is_alive() {
        // Idempotent; a predator may already have removed the corpse.
        ctx.world.remove(entity.id());
    }
}

/// One action selected per tick.
enum Action {
    Eat(Arc<Entity>),
    Attack(Arc<Entity>),
    Mate(Arc<Entity>),
    MoveTo(Arc<Entity>),
    Wander,
    Rest,
}

/// Self-state snapshot taken while updating, released before deciding.
struct StateView {
    hungry: bool,
    busy: bool,
    seek_mate: bool,
}

struct WanderHeading {
    heading: (f32, f32),
    until: Instant,
}

struct Agent<'a> {
    ctx: &'a Arc<SimContext>,
    entity: &'a Arc<Entity>,
    creature: &'a Creature,
    times: &'a ScaledDurations,
    rng: SmallRng,
    last_tick: Instant,
    wander: Option<WanderHeading>,
}

impl Agent<'_> {
    /// Run one perceive/update/decide/act cycle. Returns `false` once the
    /// creature is dead and the task must exit.
    fn cycle(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick);
        self.last_tick = now;

        let origin = self.entity.position();
        let nearby = self.ctx.world.query_nearby(
            self.entity.id(),
            origin,
            self.creature.traits.sight_range as f32,
        );

        let (view, litter) = self.update_state(now, elapsed);
        let Some(view) = view else {
            self.ctx.world.remove(self.entity.id());
            return false;
        };

        if let Some(litter) = litter {
            self.deliver(litter, origin);
        }

        let action = self.decide(&nearby, &view, origin, now);
        self.act(action, &view, origin, now, elapsed);
        true
    }

    /// Recompute flags from health/energy/age and harvest any due birth.
    /// Returns `None` when the creature died during the update.
    fn update_state(&mut self, now: Instant, elapsed: Duration) -> (Option<StateView>, Option<Litter>) {
        let traits = &self.creature.traits;
        let config = &self.ctx.config;
        let hours = self.ctx.clock.sim_hours(elapsed);

        let mut vitals = self.creature.vitals();
        if !vitals.is_alive() {
            return (None, None);
        }

        vitals.energy = (vitals.energy - config.energy_drain_per_hour * traits.max_energy * hours)
            .max(0.0);
        if vitals.energy <= 0.0 {
            vitals.health = (vitals.health
                - config.starvation_damage_per_hour * traits.max_health * hours)
                .max(0.0);
        }
        if vitals.health <= 0.0 {
            vitals.mark_dead(self.ctx.clock.sim_elapsed_secs());
            debug!(species = self.creature.species.label(), "starved");
            return (None, None);
        }
        if config.death_from_old_age && self.creature.born_at.elapsed() >= self.times.life_expectancy
        {
            vitals.mark_dead(self.ctx.clock.sim_elapsed_secs());
            debug!(species = self.creature.species.label(), "died of old age");
            return (None, None);
        }

        if vitals.eating_until.is_some_and(|until| now >= until) {
            vitals.eating_until = None;
            vitals.states.remove(State::Eating);
        }
        if vitals.mating_until.is_some_and(|until| now >= until) {
            vitals.mating_until = None;
            vitals.states.remove(State::Mating);
        }

        let gestation = self.times.mating + self.times.pregnancy;
        let due = vitals
            .carrying
            .as_ref()
            .is_some_and(|litter| litter.conceived_at.elapsed() >= gestation);
        let litter = if due {
            vitals.states.remove(State::Pregnant);
            vitals.carrying.take()
        } else {
            None
        };

        let hungry = vitals.energy < config.hunger_threshold * traits.max_energy;
        if hungry {
            vitals.states.insert(State::Hungry);
        } else {
            vitals.states.remove(State::Hungry);
            vitals.states.remove(State::SearchingForFood);
        }

        let busy = vitals.eating_until.is_some() || vitals.mating_until.is_some();
        let seek_mate = !hungry && vitals.mating_ready(self.times.wait_to_mate, now);
        (
            Some(StateView {
                hungry,
                busy,
                seek_mate,
            }),
            litter,
        )
    }

    /// Register a due litter and start one agent task per child. Births that
    /// would exceed the population cap are declined whole.
    fn deliver(&mut self, litter: Litter, origin: Position) {
        let world = &self.ctx.world;
        let creatures: Vec<(Creature, Position)> = litter
            .children
            .into_iter()
            .map(|seed| {
                let pos = Position::new(
                    (origin.x + self.rng.random_range(-BIRTH_JITTER..=BIRTH_JITTER))
                        .clamp(0.0, world.width()),
                    (origin.y + self.rng.random_range(-BIRTH_JITTER..=BIRTH_JITTER))
                        .clamp(0.0, world.height()),
                );
                (
                    Creature::new(self.creature.species, seed.gender, seed.generation, seed.traits),
                    pos,
                )
            })
            .collect();

        match world.try_add_creatures(creatures, self.ctx.config.max_creatures) {
            Some(children) => {
                for child in children {
                    spawn_agent(self.ctx, child);
                }
            }
            None => debug!(
                species = self.creature.species.label(),
                "birth declined by population cap"
            ),
        }
    }

    /// Pick exactly one action from the perceived snapshot and current flags.
    /// Nearest eligible target wins; exact distance ties resolve by entity id.
    fn decide(
        &mut self,
        nearby: &[Arc<Entity>],
        view: &StateView,
        origin: Position,
        now: Instant,
    ) -> Action {
        if view.busy {
            return Action::Rest;
        }

        if view.hungry {
            let target = match self.creature.species {
                Species::Herbivore => self.nearest(nearby, origin, |e| {
                    e.as_food().is_some_and(|food| food.is_available())
                }),
                Species::Carnivore => {
                    self.nearest(nearby, origin, |e| e.is_living(Species::Herbivore))
                }
            };
            return match target {
                Some((entity, distance)) => {
                    if f64::from(distance) <= self.creature.traits.interaction_range {
                        match self.creature.species {
                            Species::Herbivore => Action::Eat(entity),
                            Species::Carnivore => Action::Attack(entity),
                        }
                    } else {
                        Action::MoveTo(entity)
                    }
                }
                None => Action::Wander,
            };
        }

        if view.seek_mate {
            let wait = self.times.wait_to_mate;
            let species = self.creature.species;
            let gender = self.creature.gender;
            let partner = self.nearest(nearby, origin, |e| {
                e.as_creature().is_some_and(|c| {
                    c.species == species && c.gender != gender && c.can_mate(wait, now)
                })
            });
            return match partner {
                Some((entity, distance)) => {
                    if f64::from(distance) <= self.creature.traits.interaction_range {
                        Action::Mate(entity)
                    } else {
                        Action::MoveTo(entity)
                    }
                }
                None => Action::Rest,
            };
        }

        Action::Rest
    }

    fn nearest(
        &self,
        nearby: &[Arc<Entity>],
        origin: Position,
        mut eligible: impl FnMut(&Arc<Entity>) -> bool,
    ) -> Option<(Arc<Entity>, f32)> {
        nearby
            .iter()
            .filter(|e| eligible(e))
            .map(|e| (Arc::clone(e), e.position().distance_to(origin)))
            .min_by_key(|(e, d)| (OrderedFloat(*d), e.id()))
    }

    fn act(
        &mut self,
        action: Action,
        view: &StateView,
        origin: Position,
        now: Instant,
        elapsed: Duration,
    ) {
        match action {
            Action::Rest => self.set_transient(Some(State::Thinking)),
            Action::Wander => {
                let expired = self
                    .wander
                    .as_ref()
                    .is_none_or(|wander| now >= wander.until);
                if expired {
                    let angle = self.rng.random_range(0.0..std::f32::consts::TAU);
                    self.wander = Some(WanderHeading {
                        heading: (angle.cos(), angle.sin()),
                        until: now + self.times.move_one_direction,
                    });
                }
                let heading = self
                    .wander
                    .as_ref()
                    .map(|wander| wander.heading)
                    .unwrap_or((1.0, 0.0));
                let step = self.step_budget(elapsed);
                let next = origin.step_heading(
                    heading,
                    step,
                    self.ctx.world.width(),
                    self.ctx.world.height(),
                );
                self.ctx.world.relocate(self.entity, next);
                self.set_transient(Some(State::Moving));
                if view.hungry {
                    let mut vitals = self.creature.vitals();
                    vitals.states.insert(State::SearchingForFood);
                }
            }
            Action::MoveTo(target) => {
                let step = self.step_budget(elapsed);
                let next = origin.step_toward(target.position(), step);
                self.ctx.world.relocate(self.entity, next);
                self.set_transient(Some(State::Moving));
            }
            Action::Eat(target) => self.eat(&target, now),
            Action::Attack(target) => self.attack(&target, now),
            Action::Mate(target) => self.mate(&target, now),
        }
    }

    /// Distance covered this tick: speed (units per simulated minute) times
    /// the simulated minutes the tick represents.
    fn step_budget(&self, elapsed: Duration) -> f32 {
        (self.creature.traits.movement_speed * self.ctx.clock.sim_minutes(elapsed)) as f32
    }

    fn set_transient(&self, on: Option<State>) {
        let mut vitals = self.creature.vitals();
        vitals.states.remove(State::Thinking);
        vitals.states.remove(State::Moving);
        if let Some(state) = on {
            vitals.states.insert(state);
        }
    }

    fn eat(&mut self, target: &Arc<Entity>, now: Instant) {
        let Some(food) = target.as_food() else {
            return;
        };
        if !food.try_consume() {
            // Another herbivore claimed it between perceive and act.
            debug!("food already consumed; retrying next tick");
            return;
        }
        self.ctx.world.remove(target.id());
        self.creature.gain_energy(food.energy);
        let mut vitals = self.creature.vitals();
        vitals.eating_until = Some(now + self.times.eating);
        vitals.states.insert(State::Eating);
        vitals.states.remove(State::SearchingForFood);
    }

    fn attack(&mut self, target: &Arc<Entity>, now: Instant) {
        let Some(prey) = target.as_creature() else {
            return;
        };
        let Some(pool) = prey.harvest(self.ctx.clock.sim_elapsed_secs()) else {
            // Lost the race against another predator or a natural death.
            debug!("prey already dead; retrying next tick");
            return;
        };
        self.ctx.world.remove(target.id());
        self.creature.gain_energy(pool);
        let mut vitals = self.creature.vitals();
        vitals.eating_until = Some(now + self.times.eating);
        vitals.states.insert(State::Eating);
        vitals.states.remove(State::SearchingForFood);
    }

    /// Dual-lock mating handshake. Locks are taken in entity-id order so two
    /// creatures courting each other concurrently cannot deadlock.
    fn mate(&mut self, partner_entity: &Arc<Entity>, now: Instant) {
        let Some(partner) = partner_entity.as_creature() else {
            return;
        };
        if partner.gender == self.creature.gender {
            return;
        }

        let self_first = self.entity.id() < partner_entity.id();
        let (first, second) = if self_first {
            (self.creature, partner)
        } else {
            (partner, self.creature)
        };
        let first_guard = first.vitals();
        let second_guard = second.vitals();
        let (mut own, mut theirs) = if self_first {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };

        let wait = self.times.wait_to_mate;
        if !own.mating_ready(wait, now) || !theirs.mating_ready(wait, now) {
            debug!("mating partner no longer eligible");
            return;
        }
        let gap = self.entity.position().distance_to(partner_entity.position());
        if f64::from(gap) > self.creature.traits.interaction_range {
            return;
        }

        for vitals in [&mut own, &mut theirs] {
            vitals.states.insert(State::Mating);
            vitals.mating_until = Some(now + self.times.mating);
            vitals.mated_at = Some(now);
        }

        let (mother, father) = match self.creature.gender {
            Gender::Female => (self.creature, partner),
            Gender::Male => (partner, self.creature),
        };
        let litter = genetics::conceive(
            mother,
            father,
            &self.ctx.config,
            self.ctx.config.species(self.creature.species),
            &mut self.rng,
            now,
        );
        debug!(
            species = self.creature.species.label(),
            children = litter.children.len(),
            "mating completed"
        );

        let mut mother_guard = if self.creature.gender == Gender::Female {
            own
        } else {
            theirs
        };
        mother_guard.carrying = Some(litter);
        mother_guard.states.insert(State::Pregnant);
    }
}

/// Spawn a food item at a random position; used by the orchestrator's
/// food-spawner task.
pub(crate) fn spawn_food(ctx: &SimContext, rng: &mut SmallRng) {
    let pos = Position::new(
        rng.random_range(0.0..=ctx.world.width()),
        rng.random_range(0.0..=ctx.world.height()),
    );
    ctx.world
        .add(EntityKind::Food(Food::new(ctx.config.food_energy)), pos);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Traits;

    fn context(config: WorldConfig) -> Arc<SimContext> {
        let world = Arc::new(SpatialWorld::new(200.0, 200.0, 25.0).expect("world"));
        let clock = SimClock::new(config.time_rate);
        Arc::new(SimContext::new(config, world, clock))
    }

    fn seeded_creature(species: Species, gender: Gender) -> Creature {
        Creature::new(
            species,
            gender,
            0,
            Traits {
                max_health: 30.0,
                max_energy: 30.0,
                sight_range: 100.0,
                interaction_range: 10.0,
                movement_speed: 5.0,
            },
        )
    }

    #[tokio::test]
    async fn dying_creature_is_removed_and_task_exits() {
        let mut config = WorldConfig::default();
        config.rng_seed = Some(11);
        // Aggressive starvation at a fast clock so death lands within a tick or two.
        config.time_rate = 100_000.0;
        config.energy_drain_per_hour = 1.0;
        config.starvation_damage_per_hour = 1.0;
        config.death_from_old_age = false;
        let ctx = context(config);

        let entity = ctx.world.add(
            EntityKind::Creature(seeded_creature(Species::Herbivore, Gender::Male)),
            Position::new(50.0, 50.0),
        );
        spawn_agent(&ctx, Arc::clone(&entity));

        tokio::time::timeout(Duration::from_secs(10), ctx.wait_idle())
            .await
            .expect("agent should exit after dying");
        assert!(ctx.world.get(entity.id()).is_none());
        assert!(!entity.as_creature().expect("creature").is_alive());
    }

    #[tokio::test]
    async fn stop_flag_exits_all_agents_without_killing_them() {
        let mut config = WorldConfig::default();
        config.rng_seed = Some(12);
        config.energy_drain_per_hour = 1e-6;
        config.death_from_old_age = false;
        let ctx = context(config);

        for i in 0..4 {
            let entity = ctx.world.add(
                EntityKind::Creature(seeded_creature(Species::Herbivore, Gender::Male)),
                Position::new(20.0 + 10.0 * i as f32, 20.0),
            );
            spawn_agent(&ctx, Arc::clone(&entity));
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        ctx.request_stop();
        tokio::time::timeout(Duration::from_secs(5), ctx.wait_idle())
            .await
            .expect("agents should exit after stop");

        // Stopped agents stay alive and registered; stop is not death.
        assert_eq!(ctx.world.creature_count(), 4);
    }

    #[tokio::test]
    async fn herbivore_moves_toward_and_consumes_food() {
        let mut config = WorldConfig::default();
        config.rng_seed = Some(13);
        config.time_rate = 2_000.0;
        // Hungry from the start, but starving slowly enough to reach the food.
        config.energy_drain_per_hour = 0.02;
        config.starvation_damage_per_hour = 0.001;
        config.hunger_threshold = 1.0;
        config.death_from_old_age = false;
        let ctx = context(config);

        let food = ctx.world.add(
            EntityKind::Food(crate::entity::Food::new(25.0)),
            Position::new(80.0, 50.0),
        );
        let eater = ctx.world.add(
            EntityKind::Creature(seeded_creature(Species::Herbivore, Gender::Female)),
            Position::new(50.0, 50.0),
        );
        spawn_agent(&ctx, Arc::clone(&eater));

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctx.world.get(food.id()).is_some() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        ctx.request_stop();
        ctx.wait_idle().await;

        assert!(ctx.world.get(food.id()).is_none(), "food should be consumed");
        let vitals = eater.as_creature().expect("creature").vitals();
        assert!(vitals.is_alive());
    }

    #[tokio::test]
    async fn carnivore_kills_adjacent_prey_and_gains_energy() {
        let mut config = WorldConfig::default();
        config.rng_seed = Some(14);
        config.time_rate = 2_000.0;
        config.energy_drain_per_hour = 0.02;
        config.starvation_damage_per_hour = 0.001;
        config.hunger_threshold = 1.0;
        config.death_from_old_age = false;
        let ctx = context(config);

        let prey = ctx.world.add(
            EntityKind::Creature(seeded_creature(Species::Herbivore, Gender::Male)),
            Position::new(52.0, 50.0),
        );
        let hunter = ctx.world.add(
            EntityKind::Creature(seeded_creature(Species::Carnivore, Gender::Male)),
            Position::new(50.0, 50.0),
        );
        spawn_agent(&ctx, Arc::clone(&hunter));

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctx.world.get(prey.id()).is_some() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        ctx.request_stop();
        ctx.wait_idle().await;

        assert!(ctx.world.get(prey.id()).is_none(), "prey should be consumed");
        assert!(!prey.as_creature().expect("creature").is_alive());
        let vitals = hunter.as_creature().expect("creature").vitals();
        assert!(vitals.states.contains(State::Eating) || vitals.energy > 0.0);
    }
}
