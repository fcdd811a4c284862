//! Identity, locking, naming and destruction shared by every graph entity.

use crate::error::EntityKind;
use crate::state::{EventEmitter, Lifecycle, SubscriptionId, ValueState};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Common behaviour of the typed entity identifiers.
pub trait EntityId: Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + 'static {
    const KIND: EntityKind;

    /// Allocate a fresh, globally unique id.
    fn generate() -> Self;
    fn as_str(&self) -> &str;
    fn from_raw(raw: String) -> Self;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                <Self as EntityId>::generate()
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl EntityId for $name {
            const KIND: EntityKind = EntityKind::$kind;

            fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            fn as_str(&self) -> &str {
                &self.0
            }

            fn from_raw(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a [`NodeModel`](crate::graph::NodeModel).
    NodeId,
    Node
);
entity_id!(
    /// Identifies a [`PortModel`](crate::graph::PortModel).
    PortId,
    Port
);
entity_id!(
    /// Identifies a [`LinkModel`](crate::graph::LinkModel).
    LinkId,
    Link
);
entity_id!(
    /// Identifies a [`PointModel`](crate::graph::PointModel).
    PointId,
    Point
);
entity_id!(
    /// Identifies a [`LabelModel`](crate::graph::LabelModel).
    LabelId,
    Label
);

/// Emitted by [`EntityCore::lock_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent<I> {
    pub id: I,
    pub locked: bool,
}

/// State every entity carries: id, type tag, lock flag, names and lifecycle.
pub struct EntityCore<I: EntityId> {
    id: I,
    type_tag: String,
    lifecycle: Lifecycle,
    locked: ValueState<bool>,
    name: ValueState<String>,
    display_name: ValueState<String>,
    destroyed: EventEmitter<I>,
}

impl<I: EntityId> EntityCore<I> {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self::with_id(I::generate(), type_tag)
    }

    pub fn with_id(id: I, type_tag: impl Into<String>) -> Self {
        let lifecycle = Lifecycle::new();
        Self {
            id,
            type_tag: type_tag.into(),
            locked: ValueState::new(false, &lifecycle),
            name: ValueState::new("default".to_string(), &lifecycle),
            display_name: ValueState::new(String::new(), &lifecycle),
            destroyed: EventEmitter::new(),
            lifecycle,
        }
    }

    pub fn id(&self) -> &I {
        &self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Lifecycle token for the entity's own reactive fields.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.get()
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked.set(locked);
    }

    /// Subscribe to lock state changes.
    pub fn lock_changes(
        &mut self,
        mut observer: impl FnMut(&LockEvent<I>) + 'static,
    ) -> Option<SubscriptionId> {
        let id = self.id.clone();
        self.locked.select(move |locked| {
            observer(&LockEvent {
                id: id.clone(),
                locked: *locked,
            })
        })
    }

    pub fn name(&self) -> &str {
        self.name.get()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name.set(name.into());
    }

    pub fn select_name(&mut self, observer: impl FnMut(&String) + 'static) -> Option<SubscriptionId> {
        self.name.select(observer)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.get()
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name.set(name.into());
    }

    /// Register a callback fired once when the entity is destroyed.
    pub fn on_destroy(&mut self, observer: impl FnMut(&I) + 'static) -> Option<SubscriptionId> {
        if self.is_destroyed() {
            return None;
        }
        Some(self.destroyed.subscribe(observer))
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_ended()
    }

    /// End the lifecycle, notify destroy observers and release every
    /// subscription held by the core. Idempotent.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        tracing::trace!(entity = %self.id, type_tag = %self.type_tag, "entity destroyed");
        self.lifecycle.end();
        self.destroyed.emit(&self.id);
        self.destroyed.clear();
        self.locked.close();
        self.name.close();
        self.display_name.close();
    }

    /// Copy of the core under a new id with a fresh lifecycle and no observers.
    pub fn fork(&self, id: I) -> Self {
        let lifecycle = Lifecycle::new();
        Self {
            id,
            type_tag: self.type_tag.clone(),
            locked: self.locked.fork(&lifecycle),
            name: self.name.fork(&lifecycle),
            display_name: self.display_name.fork(&lifecycle),
            destroyed: EventEmitter::new(),
            lifecycle,
        }
    }
}

impl<I: EntityId> fmt::Debug for EntityCore<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCore")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("locked", &self.is_locked())
            .field("name", &self.name())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Identity map used while cloning an entity graph.
///
/// Maps the kind and raw id of every original entity to the id of its clone.
/// Passing the same table through a batch of clone calls makes shared or
/// cyclic references resolve to one clone instead of being duplicated.
#[derive(Debug, Default, Clone)]
pub struct CloneTable {
    map: HashMap<(EntityKind, String), String>,
}

fn table_key<I: EntityId>(id: &I) -> (EntityKind, String) {
    (I::KIND, id.as_str().to_string())
}

impl CloneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the clone of `original`, if it has been cloned through this table.
    pub fn get<I: EntityId>(&self, original: &I) -> Option<I> {
        self.map
            .get(&table_key(original))
            .map(|raw| I::from_raw(raw.clone()))
    }

    /// Clone id if one exists, otherwise the original id.
    pub fn resolve<I: EntityId>(&self, id: &I) -> I {
        self.get(id).unwrap_or_else(|| id.clone())
    }

    pub fn contains<I: EntityId>(&self, original: &I) -> bool {
        self.map.contains_key(&table_key(original))
    }

    /// Return the existing clone id or allocate and record a new one.
    pub fn allocate<I: EntityId>(&mut self, original: &I) -> I {
        let raw = self
            .map
            .entry(table_key(original))
            .or_insert_with(|| I::generate().as_str().to_string());
        I::from_raw(raw.clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
