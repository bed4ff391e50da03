use std::fmt;

use hecs::Entity;

/// A stable `(index, version)` entity identifier.
///
/// The packing follows `hecs::Entity::to_bits`: the slot index occupies the
/// low 32 bits and the slot version (generation) the high 32. Two ids are
/// equal iff index and version both match, so a recycled slot never compares
/// equal to its previous occupant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    /// Reconstruct an id from its packed form. Returns `None` for bit
    /// patterns that do not encode a live-constructible handle.
    pub fn from_bits(bits: u64) -> Option<Self> {
        Entity::from_bits(bits).map(|_| Self(bits))
    }

    /// The packed 64-bit form, suitable for round-tripping.
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// Alias of [`EntityId::to_bits`], the composite numeric identifier.
    pub fn id(self) -> u64 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 as u32
    }

    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The native handle this id names.
    pub fn entity(self) -> Entity {
        Entity::from_bits(self.0).expect("EntityId always holds valid handle bits")
    }
}

impl From<Entity> for EntityId {
    fn from(entity: Entity) -> Self {
        Self(entity.to_bits().get())
    }
}

impl From<EntityId> for Entity {
    fn from(id: EntityId) -> Self {
        id.entity()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Entity::Id {}.{}>", self.index(), self.version())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}.{})", self.index(), self.version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> Entity {
        let mut world = hecs::World::new();
        world.spawn(())
    }

    #[test]
    fn test_round_trip_through_bits() {
        let entity = sample_entity();
        let id = EntityId::from(entity);
        let back = EntityId::from_bits(id.to_bits()).unwrap();
        assert_eq!(id, back);
        assert_eq!(back.entity(), entity);
    }

    #[test]
    fn test_index_and_version_unpack() {
        let entity = sample_entity();
        let id = EntityId::from(entity);
        assert_eq!(id.index(), entity.id());
        assert_eq!(
            id.to_bits(),
            (u64::from(id.version()) << 32) | u64::from(id.index())
        );
    }

    #[test]
    fn test_display_format() {
        let id = EntityId::from(sample_entity());
        assert_eq!(
            id.to_string(),
            format!("<Entity::Id {}.{}>", id.index(), id.version())
        );
    }

    #[test]
    fn test_zero_bits_are_rejected() {
        assert!(EntityId::from_bits(0).is_none());
    }
}
