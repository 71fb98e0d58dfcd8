//! The shared spatial registry: the single source of truth for what entities
//! currently exist and where.
//!
//! Synchronization discipline (used by every caller, never bespoke): one
//! `RwLock` guards the entity slot map and the grid index together. Queries
//! take the read lock; structural changes (`add`, `remove`) and relocations
//! take the write lock. Observer callbacks fire synchronously after the lock
//! is released, and only from the call that actually performed the mutation,
//! so concurrent removals of the same entity never double-notify.

use crate::config::Species;
use crate::entity::{Creature, Entity, EntityId, EntityKind, Position};
use ecosim_index::{IndexError, SpatialGrid};
use slotmap::SlotMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Observer of entity lifecycle events. Callbacks run synchronously on the
/// mutating agent's task and must stay cheap.
pub trait WorldObserver: Send + Sync {
    fn on_entity_added(&self, entity: &Arc<Entity>);
    fn on_entity_removed(&self, entity: &Arc<Entity>);
}

struct Registry {
    entities: SlotMap<EntityId, Arc<Entity>>,
    grid: SpatialGrid<EntityId>,
}

/// Concurrency-safe registry of all live entities, bounded by the map size.
pub struct SpatialWorld {
    width: f32,
    height: f32,
    registry: RwLock<Registry>,
    observers: RwLock<Vec<Arc<dyn WorldObserver>>>,
    herbivores: AtomicUsize,
    carnivores: AtomicUsize,
    food: AtomicUsize,
}

impl SpatialWorld {
    /// Build an empty world covering `width x height` with the given index
    /// cell size.
    pub fn new(width: f32, height: f32, cell_size: f32) -> Result<Self, IndexError> {
        let grid = SpatialGrid::new(width, height, cell_size)?;
        Ok(Self {
            width,
            height,
            registry: RwLock::new(Registry {
                entities: SlotMap::with_key(),
                grid,
            }),
            observers: RwLock::new(Vec::new()),
            herbivores: AtomicUsize::new(0),
            carnivores: AtomicUsize::new(0),
            food: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub const fn width(&self) -> f32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> f32 {
        self.height
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn count_cell(&self, entity: &Entity) -> &AtomicUsize {
        match entity.kind() {
            EntityKind::Creature(creature) => match creature.species {
                Species::Herbivore => &self.herbivores,
                Species::Carnivore => &self.carnivores,
            },
            EntityKind::Food(_) => &self.food,
        }
    }

    fn notify_added(&self, entity: &Arc<Entity>) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_entity_added(entity);
        }
    }

    fn notify_removed(&self, entity: &Arc<Entity>) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_entity_removed(entity);
        }
    }

    /// Register an entity, index its position, and notify subscribers.
    /// Safe to call concurrently from many agent tasks.
    pub fn add(&self, kind: EntityKind, pos: Position) -> Arc<Entity> {
        let entity = {
            let mut registry = self.write_registry();
            let id = registry
                .entities
                .insert_with_key(|id| Arc::new(Entity::new(id, pos, kind)));
            let entity = Arc::clone(&registry.entities[id]);
            registry.grid.insert(id, pos.x, pos.y);
            self.count_cell(&entity).fetch_add(1, Ordering::AcqRel);
            Arc::clone(&entity)
        };
        self.notify_added(&entity);
        entity
    }

    /// Register a whole litter, declining it entirely if the live creature
    /// count would exceed `cap`. Returns the registered entities, or `None`
    /// when the cap declined the birth (a policy outcome, not an error).
    pub fn try_add_creatures(
        &self,
        creatures: Vec<(Creature, Position)>,
        cap: usize,
    ) -> Option<Vec<Arc<Entity>>> {
        let added = {
            let mut registry = self.write_registry();
            let live = self.creature_count();
            if live + creatures.len() > cap {
                return None;
            }
            creatures
                .into_iter()
                .map(|(creature, pos)| {
                    let id = registry.entities.insert_with_key(|id| {
                        Arc::new(Entity::new(id, pos, EntityKind::Creature(creature)))
                    });
                    let entity = Arc::clone(&registry.entities[id]);
                    registry.grid.insert(id, pos.x, pos.y);
                    self.count_cell(&entity).fetch_add(1, Ordering::AcqRel);
                    Arc::clone(&entity)
                })
                .collect::<Vec<_>>()
        };
        for entity in &added {
            self.notify_added(entity);
        }
        Some(added)
    }

    /// Deregister an entity. Idempotent: removing an already-removed entity
    /// is a no-op and produces no notification.
    pub fn remove(&self, id: EntityId) -> Option<Arc<Entity>> {
        let removed = {
            let mut registry = self.write_registry();
            let entity = registry.entities.remove(id)?;
            let pos = entity.position();
            registry.grid.remove(id, pos.x, pos.y);
            self.count_cell(&entity).fetch_sub(1, Ordering::AcqRel);
            entity
        };
        self.notify_removed(&removed);
        Some(removed)
    }

    /// Move an entity to a new position, keeping the index coherent. Called
    /// only by the entity's owning agent. Returns `false` if the entity was
    /// already removed.
    pub fn relocate(&self, entity: &Entity, pos: Position) -> bool {
        let mut registry = self.write_registry();
        if !registry.entities.contains_key(entity.id()) {
            return false;
        }
        let old = entity.position();
        registry
            .grid
            .relocate(entity.id(), old.x, old.y, pos.x, pos.y);
        entity.set_position(pos);
        true
    }

    /// Point-in-time snapshot of entities within `radius` of `center`,
    /// excluding the origin entity itself. The returned copies are unaffected
    /// by concurrent mutation.
    #[must_use]
    pub fn query_nearby(&self, origin: EntityId, center: Position, radius: f32) -> Vec<Arc<Entity>> {
        let registry = self.read_registry();
        let mut found = Vec::new();
        registry.grid.visit_circle(center.x, center.y, radius, &mut |id| {
            if id == origin {
                return;
            }
            if let Some(entity) = registry.entities.get(id) {
                if entity.position().distance_to(center) <= radius {
                    found.push(Arc::clone(entity));
                }
            }
        });
        found
    }

    /// Full snapshot of every registered entity.
    #[must_use]
    pub fn all_entities(&self) -> Vec<Arc<Entity>> {
        let registry = self.read_registry();
        registry.entities.values().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<Arc<Entity>> {
        self.read_registry().entities.get(id).cloned()
    }

    /// Live creatures, both species.
    #[must_use]
    pub fn creature_count(&self) -> usize {
        self.herbivores.load(Ordering::Acquire) + self.carnivores.load(Ordering::Acquire)
    }

    /// `(herbivores, carnivores, food)` currently registered.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.herbivores.load(Ordering::Acquire),
            self.carnivores.load(Ordering::Acquire),
            self.food.load(Ordering::Acquire),
        )
    }

    /// Register a lifecycle observer. The orchestrator owns subscription
    /// lifetimes; nothing subscribes implicitly.
    pub fn subscribe(&self, observer: Arc<dyn WorldObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Drop all observers, typically at run teardown.
    pub fn clear_observers(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for SpatialWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (herbivores, carnivores, food) = self.counts();
        f.debug_struct("SpatialWorld")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("herbivores", &herbivores)
            .field("carnivores", &carnivores)
            .field("food", &food)
            .finish()
    }
}
