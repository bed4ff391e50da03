use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use hecs::{Component, Entity, World};
use hearth_events::EventBus;
use thiserror::Error;

use crate::id::EntityId;

/// Published on the bus after a component of type `C` is attached.
pub struct ComponentAdded<C> {
    pub entity: Entity,
    _marker: PhantomData<fn() -> C>,
}

impl<C> ComponentAdded<C> {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            _marker: PhantomData,
        }
    }
}

/// Published immediately before an entity is despawned, while its components
/// are still readable.
pub struct EntityDestroyed {
    pub entity: Entity,
}

#[derive(Debug, Error)]
pub enum EcsError {
    #[error("no such entity")]
    NoSuchEntity,
}

/// The entity store: a fascia over `hecs::World` that issues handles and
/// publishes lifecycle notifications on the shared event bus.
///
/// Storage and iteration mechanics are hecs's. What this type adds is the
/// notification contract: `attach` publishes [`ComponentAdded<C>`] after the
/// insert, `destroy` publishes [`EntityDestroyed`] before the despawn, and
/// both release their world borrow first so handlers may re-enter the store.
pub struct EntityStore {
    world: RefCell<World>,
    bus: Rc<EventBus>,
}

impl EntityStore {
    pub fn new(bus: Rc<EventBus>) -> Self {
        Self {
            world: RefCell::new(World::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    /// Create a fresh, empty entity.
    pub fn create(&self) -> Entity {
        self.world.borrow_mut().spawn(())
    }

    /// Destroy an entity, notifying subscribers first.
    pub fn destroy(&self, entity: Entity) -> anyhow::Result<()> {
        if !self.world.borrow().contains(entity) {
            return Err(EcsError::NoSuchEntity.into());
        }
        self.bus.emit(&EntityDestroyed { entity })?;
        self.world
            .borrow_mut()
            .despawn(entity)
            .map_err(|_| EcsError::NoSuchEntity)?;
        Ok(())
    }

    /// Attach a component, then notify subscribers.
    pub fn attach<C: Component>(&self, entity: Entity, component: C) -> anyhow::Result<()> {
        self.world
            .borrow_mut()
            .insert_one(entity, component)
            .map_err(|_| EcsError::NoSuchEntity)?;
        self.bus.emit(&ComponentAdded::<C>::new(entity))
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.borrow().contains(entity)
    }

    pub fn id_of(&self, entity: Entity) -> EntityId {
        EntityId::from(entity)
    }

    /// Invoke `f` for every entity carrying a `C` component.
    ///
    /// The world stays borrowed for the duration; `f` must not re-enter
    /// mutating store operations.
    pub fn each<C: Component>(&self, mut f: impl FnMut(Entity, &C)) {
        let world = self.world.borrow();
        for (entity, component) in world.query::<&C>().iter() {
            f(entity, component);
        }
    }

    /// Scoped read access to the underlying world.
    pub fn world(&self) -> Ref<'_, World> {
        self.world.borrow()
    }

    /// Scoped mutable access to the underlying world.
    pub fn world_mut(&self) -> RefMut<'_, World> {
        self.world.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.world.borrow().len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
