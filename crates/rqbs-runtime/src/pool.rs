//! Item arena
//!
//! Items live in an [`ItemPool`] and refer to each other by [`ItemId`]. The
//! pool is built single-threaded through `&mut` access and then shared
//! read-only (`&ItemPool`) by evaluators running on worker threads. Module
//! prototypes are shared by every product, so any access to a `Module` item
//! takes its exclusive lock ([`LockedModule`]).
//!
//! Guards are never held across calls back into the pool.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::builtins;
use crate::declaration::PropertyDeclaration;
use crate::error::{LangError, LangResult};
use crate::file::FileContext;
use crate::item::{Item, ItemType, ModuleEdge};
use crate::location::CodeLocation;
use crate::value::{Value, ValueKind, ValuePtr};

static NEXT_POOL_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Handle of an item in its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

impl ItemId {
    pub fn index(self) -> u32 {
        self.index
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(index: u32) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Receives a call after every [`ItemPool::set_property`]
pub trait ItemObserver: Send + Sync {
    fn on_item_property_changed(&self, item: ItemId, name: &str);
}

struct Slot {
    item: RwLock<Item>,
    module: AtomicBool,
    /// Threads currently delivering a change notification for this item
    notifying: Mutex<Vec<ThreadId>>,
}

impl Slot {
    fn new(item: Item) -> Self {
        let module = item.item_type == ItemType::Module;
        Self {
            item: RwLock::new(item),
            module: AtomicBool::new(module),
            notifying: Mutex::new(Vec::new()),
        }
    }
}

/// Exclusive access to a module prototype
pub struct LockedModule<'a> {
    guard: RwLockWriteGuard<'a, Item>,
}

impl Deref for LockedModule<'_> {
    type Target = Item;

    fn deref(&self) -> &Item {
        &self.guard
    }
}

impl DerefMut for LockedModule<'_> {
    fn deref_mut(&mut self) -> &mut Item {
        &mut self.guard
    }
}

/// Read access to an item; module items are locked exclusively
pub enum ItemGuard<'a> {
    Shared(RwLockReadGuard<'a, Item>),
    Locked(LockedModule<'a>),
}

impl Deref for ItemGuard<'_> {
    type Target = Item;

    fn deref(&self) -> &Item {
        match self {
            ItemGuard::Shared(guard) => guard,
            ItemGuard::Locked(locked) => locked,
        }
    }
}

pub struct ItemPool {
    generation: u32,
    slots: Vec<Slot>,
    observers: Mutex<Vec<Weak<dyn ItemObserver>>>,
}

impl Default for ItemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ItemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemPool")
            .field("generation", &self.generation)
            .field("items", &self.slots.len())
            .finish()
    }
}

impl ItemPool {
    pub fn new() -> Self {
        Self {
            generation: NEXT_POOL_GENERATION.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, item: Item) -> ItemId {
        let id = ItemId {
            index: self.slots.len() as u32,
            generation: self.generation,
        };
        self.slots.push(Slot::new(item));
        id
    }

    /// Allocate a new empty item
    pub fn create(&mut self, item_type: ItemType) -> ItemId {
        self.push(Item::new(item_type))
    }

    fn slot(&self, id: ItemId) -> &Slot {
        debug_assert_eq!(id.generation, self.generation, "item {} belongs to another pool", id);
        &self.slots[id.index as usize]
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Read access; module items are locked exclusively for the guard's lifetime
    pub fn get(&self, id: ItemId) -> ItemGuard<'_> {
        let slot = self.slot(id);
        if slot.module.load(Ordering::Acquire) {
            ItemGuard::Locked(self.lock_module(id))
        } else {
            ItemGuard::Shared(slot.item.read())
        }
    }

    /// Unlocked mutable access during construction
    pub fn get_mut(&mut self, id: ItemId) -> &mut Item {
        debug_assert_eq!(id.generation, self.generation, "item {} belongs to another pool", id);
        self.slots[id.index as usize].item.get_mut()
    }

    /// Take the exclusive lock of a module prototype
    pub fn lock_module(&self, id: ItemId) -> LockedModule<'_> {
        let guard = self.slot(id).item.write();
        debug_assert_eq!(
            guard.item_type,
            ItemType::Module,
            "item {} is not a module",
            id
        );
        LockedModule { guard }
    }

    pub fn set_item_type(&mut self, id: ItemId, item_type: ItemType) {
        let slot = &mut self.slots[id.index as usize];
        slot.item.get_mut().item_type = item_type;
        slot.module
            .store(item_type == ItemType::Module, Ordering::Release);
    }

    pub fn item_type(&self, id: ItemId) -> ItemType {
        self.get(id).item_type
    }

    pub fn type_name(&self, id: ItemId) -> String {
        self.get(id).type_name.clone()
    }

    pub fn prototype(&self, id: ItemId) -> Option<ItemId> {
        self.get(id).prototype
    }

    pub fn scope(&self, id: ItemId) -> Option<ItemId> {
        self.get(id).scope
    }

    pub fn outer_item(&self, id: ItemId) -> Option<ItemId> {
        self.get(id).outer_item
    }

    pub fn parent(&self, id: ItemId) -> Option<ItemId> {
        self.get(id).parent
    }

    pub fn children(&self, id: ItemId) -> Vec<ItemId> {
        self.get(id).children.clone()
    }

    pub fn location(&self, id: ItemId) -> CodeLocation {
        self.get(id).location.clone()
    }

    pub fn file(&self, id: ItemId) -> Option<Arc<FileContext>> {
        self.get(id).file.clone()
    }

    pub fn modules(&self, id: ItemId) -> Vec<ModuleEdge> {
        self.get(id).modules.clone()
    }

    pub fn own_property(&self, id: ItemId, name: &str) -> Option<ValuePtr> {
        self.get(id).properties.get(name).cloned()
    }

    pub fn own_property_names(&self, id: ItemId) -> Vec<String> {
        self.get(id).properties.keys().cloned().collect()
    }

    pub fn own_declaration(&self, id: ItemId, name: &str) -> Option<PropertyDeclaration> {
        self.get(id).declarations.get(name).cloned()
    }

    // =========================================================================
    // Prototype lookups
    // =========================================================================

    /// The item followed by its prototypes
    pub fn prototype_chain(&self, id: ItemId) -> impl Iterator<Item = ItemId> + '_ {
        std::iter::successors(Some(id), move |&current| self.prototype(current))
    }

    /// Root of the prototype chain
    pub fn root_prototype(&self, id: ItemId) -> ItemId {
        self.prototype_chain(id).last().unwrap_or(id)
    }

    pub fn property_with_owner(&self, id: ItemId, name: &str) -> Option<(ItemId, ValuePtr)> {
        self.prototype_chain(id)
            .find_map(|current| self.own_property(current, name).map(|v| (current, v)))
    }

    pub fn property(&self, id: ItemId, name: &str) -> Option<ValuePtr> {
        self.property_with_owner(id, name).map(|(_, v)| v)
    }

    pub fn has_property(&self, id: ItemId, name: &str) -> bool {
        self.property_with_owner(id, name).is_some()
    }

    /// The item that owns `name` for scoping purposes. A module instance
    /// stops the walk at itself even if the value comes from its prototype.
    pub fn item_of_property(&self, id: ItemId, name: &str) -> Option<ItemId> {
        if !self.has_property(id, name) {
            return None;
        }
        self.prototype_chain(id).find(|&current| {
            let item = self.get(current);
            item.has_own_property(name) || item.item_type == ItemType::ModuleInstance
        })
    }

    /// Declaration of `name` on the item or a prototype, then the expired table
    pub fn property_declaration(&self, id: ItemId, name: &str) -> Option<PropertyDeclaration> {
        self.prototype_chain(id)
            .find_map(|current| self.own_declaration(current, name))
            .or_else(|| builtins::expired_declaration(self.item_type(id), name))
    }

    /// All declarations visible on the item, nearest first
    pub fn declarations(&self, id: ItemId) -> IndexMap<String, PropertyDeclaration> {
        let mut result = IndexMap::new();
        for current in self.prototype_chain(id) {
            for (name, decl) in self.get(current).declarations.iter() {
                result.entry(name.clone()).or_insert_with(|| decl.clone());
            }
        }
        result
    }

    // =========================================================================
    // Mutation with notification
    // =========================================================================

    pub fn add_observer(&self, observer: Weak<dyn ItemObserver>) {
        self.observers.lock().push(observer);
    }

    /// Replace an own property and notify observers.
    ///
    /// Setting a property of an item from inside its own notification, on
    /// the same thread, fails with [`LangError::ReentrantMutation`].
    pub fn set_property(&self, id: ItemId, name: &str, value: ValuePtr) -> LangResult<()> {
        let slot = self.slot(id);
        let current = thread::current().id();
        if slot.notifying.lock().contains(&current) {
            return Err(LangError::ReentrantMutation {
                item: id.to_string(),
                name: name.to_string(),
            });
        }

        if slot.module.load(Ordering::Acquire) {
            self.lock_module(id)
                .properties
                .insert(name.to_string(), value);
        } else {
            slot.item.write().properties.insert(name.to_string(), value);
        }

        slot.notifying.lock().push(current);
        self.notify(id, name);
        let mut notifying = slot.notifying.lock();
        if let Some(pos) = notifying.iter().position(|t| *t == current) {
            notifying.swap_remove(pos);
        }
        Ok(())
    }

    fn notify(&self, id: ItemId, name: &str) {
        let observers: Vec<Arc<dyn ItemObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_item_property_changed(id, name);
        }
    }

    // =========================================================================
    // Cloning
    // =========================================================================

    /// Deep copy of an item: children and item-valued properties are cloned,
    /// prototype, scope and outer links are shared.
    pub fn clone_item(&mut self, id: ItemId) -> ItemId {
        let copy = self.get_mut(id).clone();
        let children = copy.children.clone();
        let item_values: Vec<(String, ItemId)> = copy
            .properties
            .iter()
            .filter_map(|(name, v)| v.as_item().map(|item| (name.clone(), item)))
            .collect();
        let new_id = self.push(copy);

        let mut new_children = Vec::with_capacity(children.len());
        for child in children {
            let cloned = self.clone_item(child);
            self.get_mut(cloned).parent = Some(new_id);
            new_children.push(cloned);
        }
        self.get_mut(new_id).children = new_children;

        for (name, item) in item_values {
            let cloned = self.clone_item(item);
            let item = self.get_mut(new_id);
            if let Some(value) = item.properties.get_mut(&name) {
                Arc::make_mut(value).kind = ValueKind::Item(cloned);
            }
        }
        new_id
    }

    /// Create an item-valued property holding a fresh item of the given type
    pub fn create_item_value(
        &mut self,
        owner: ItemId,
        name: &str,
        item_type: ItemType,
    ) -> ItemId {
        let child = self.create(item_type);
        let file = self.get_mut(owner).file.clone();
        {
            let item = self.get_mut(child);
            item.file = file;
        }
        self.get_mut(owner)
            .properties
            .insert(name.to_string(), Value::item(child));
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VmValue;
    use parking_lot::Mutex as PlMutex;

    fn lit(i: i64) -> ValuePtr {
        Value::literal(VmValue::Int(i))
    }

    #[test]
    fn prototype_lookup_walks_chain() {
        let mut pool = ItemPool::new();
        let base = pool.create(ItemType::Product);
        let derived = pool.create(ItemType::Product);
        pool.get_mut(derived).prototype = Some(base);
        pool.get_mut(base).properties.insert("x".into(), lit(1));

        assert!(pool.has_property(derived, "x"));
        assert_eq!(pool.property_with_owner(derived, "x").unwrap().0, base);
        assert!(pool.own_property(derived, "x").is_none());
        assert_eq!(pool.item_of_property(derived, "x"), Some(base));
        assert_eq!(pool.root_prototype(derived), base);
    }

    #[test]
    fn module_instance_owns_inherited_properties() {
        let mut pool = ItemPool::new();
        let module = pool.create(ItemType::Module);
        let instance = pool.create(ItemType::ModuleInstance);
        pool.get_mut(instance).prototype = Some(module);
        pool.get_mut(module).properties.insert("x".into(), lit(1));

        assert_eq!(pool.item_of_property(instance, "x"), Some(instance));
        assert_eq!(pool.item_of_property(instance, "missing"), None);
    }

    #[test]
    fn module_items_are_locked_exclusively() {
        let mut pool = ItemPool::new();
        let module = pool.create(ItemType::Module);
        {
            let mut locked = pool.lock_module(module);
            locked.properties.insert("x".into(), lit(1));
        }
        assert!(matches!(pool.get(module), ItemGuard::Locked(_)));
        pool.set_item_type(module, ItemType::Product);
        assert!(matches!(pool.get(module), ItemGuard::Shared(_)));
    }

    struct Recorder {
        pool: PlMutex<Option<Arc<ItemPool>>>,
        seen: PlMutex<Vec<(ItemId, String)>>,
        reentrant: PlMutex<Option<bool>>,
    }

    impl ItemObserver for Recorder {
        fn on_item_property_changed(&self, item: ItemId, name: &str) {
            self.seen.lock().push((item, name.to_string()));
            if let Some(pool) = self.pool.lock().clone() {
                let result = pool.set_property(item, "other", lit(0));
                *self.reentrant.lock() =
                    Some(matches!(result, Err(LangError::ReentrantMutation { .. })));
            }
        }
    }

    #[test]
    fn set_property_notifies_and_rejects_reentrance() {
        let mut pool = ItemPool::new();
        let item = pool.create(ItemType::Product);
        let pool = Arc::new(pool);

        let recorder = Arc::new(Recorder {
            pool: PlMutex::new(Some(Arc::clone(&pool))),
            seen: PlMutex::new(Vec::new()),
            reentrant: PlMutex::new(None),
        });
        let observer: Arc<dyn ItemObserver> = recorder.clone();
        pool.add_observer(Arc::downgrade(&observer));

        pool.set_property(item, "x", lit(5)).unwrap();
        assert_eq!(recorder.seen.lock().as_slice(), &[(item, "x".to_string())]);
        assert_eq!(*recorder.reentrant.lock(), Some(true));
        assert!(pool.own_property(item, "other").is_none());

        // Notification finished, so mutation is allowed again
        pool.set_property(item, "other", lit(1)).unwrap();

        // Break the cycle between the observer and the pool
        recorder.pool.lock().take();
    }

    #[test]
    fn concurrent_set_property_on_one_item() {
        struct Slow;
        impl ItemObserver for Slow {
            fn on_item_property_changed(&self, _item: ItemId, _name: &str) {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
        }

        let mut pool = ItemPool::new();
        let item = pool.create(ItemType::Product);
        let observer: Arc<dyn ItemObserver> = Arc::new(Slow);
        pool.add_observer(Arc::downgrade(&observer));

        let barrier = std::sync::Barrier::new(4);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let (pool, barrier) = (&pool, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        pool.set_property(item, &format!("p{}", i), lit(i))
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });
        for i in 0..4 {
            assert!(pool.own_property(item, &format!("p{}", i)).is_some());
        }
    }

    #[test]
    fn clone_copies_children_and_item_values() {
        let mut pool = ItemPool::new();
        let product = pool.create(ItemType::Product);
        let group = pool.create(ItemType::Group);
        pool.get_mut(group).parent = Some(product);
        pool.get_mut(product).children.push(group);
        let placeholder = pool.create_item_value(product, "cpp", ItemType::ModuleInstancePlaceholder);
        pool.get_mut(placeholder)
            .properties
            .insert("defines".into(), lit(1));

        let copy = pool.clone_item(product);
        let copied_group = pool.children(copy)[0];
        assert_ne!(copied_group, group);
        assert_eq!(pool.parent(copied_group), Some(copy));
        let copied_placeholder = pool.own_property(copy, "cpp").unwrap().as_item().unwrap();
        assert_ne!(copied_placeholder, placeholder);
        assert!(pool.own_property(copied_placeholder, "defines").is_some());
    }
}
