//! Ordered construction and teardown of servers.
//!
//! Servers are registered as slots, each with four hooks: a constructor, an
//! initializer, a finalizer and a destructor. [`ServerRegistry::init_all`]
//! walks the slots in registration order; [`ServerRegistry::finish_all`]
//! walks them in reverse.
//!
//! # Dependency rule
//!
//! A constructor receives a [`RegistryView`] through which it may look up
//! servers registered *before* it. Looking up a later slot (or itself) is a
//! contract violation and fails with [`ServerError::ContractViolation`].
//!
//! # Rollback
//!
//! If any constructor or initializer fails, every slot that was already
//! initialized is finalized and destroyed in reverse order, the failing slot
//! is destroyed, and the original error is returned.

use std::any::Any;

use crate::handle::{ServerHandle, ServerState};
use crate::servers::Lifecycle;
use crate::ServerError;

type Constructor<S> = Box<dyn FnOnce(&RegistryView<'_>) -> Result<S, ServerError>>;
type Initializer<S> = Box<dyn FnMut(&mut S) -> Result<(), ServerError>>;
type Finalizer<S> = Box<dyn FnMut(&mut S)>;
type Destructor<S> = Box<dyn FnOnce(S)>;

// ---------------------------------------------------------------------------
// Type-erased slots
// ---------------------------------------------------------------------------

trait ErasedSlot {
    fn name(&self) -> &str;
    fn state(&self) -> ServerState;
    fn construct(&mut self, view: &RegistryView<'_>) -> Result<(), ServerError>;
    fn initialize(&mut self) -> Result<(), ServerError>;
    fn finalize(&mut self);
    fn destroy(&mut self);
    fn active_any(&self) -> Result<&dyn Any, ServerError>;
    fn active_any_mut(&mut self) -> Result<&mut dyn Any, ServerError>;
}

struct TypedSlot<S> {
    handle: ServerHandle<S>,
    constructor: Option<Constructor<S>>,
    initializer: Initializer<S>,
    finalizer: Finalizer<S>,
    destructor: Option<Destructor<S>>,
}

impl<S: 'static> ErasedSlot for TypedSlot<S> {
    fn name(&self) -> &str {
        self.handle.name()
    }

    fn state(&self) -> ServerState {
        self.handle.state()
    }

    fn construct(&mut self, view: &RegistryView<'_>) -> Result<(), ServerError> {
        let constructor = self.constructor.take().ok_or_else(|| {
            ServerError::ContractViolation(format!("'{}' constructed twice", self.handle.name()))
        })?;
        let instance = constructor(view)?;
        self.handle.construct(instance)
    }

    fn initialize(&mut self) -> Result<(), ServerError> {
        let initializer = &mut self.initializer;
        self.handle.initialize(|s| initializer(s))
    }

    fn finalize(&mut self) {
        let finalizer = &mut self.finalizer;
        if let Err(e) = self.handle.finish(|s| finalizer(s)) {
            tracing::warn!(error = %e, "finalize skipped");
        }
    }

    fn destroy(&mut self) {
        match self.handle.destroy() {
            Ok(Some(instance)) => {
                if let Some(destructor) = self.destructor.take() {
                    destructor(instance);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "destroy skipped"),
        }
    }

    fn active_any(&self) -> Result<&dyn Any, ServerError> {
        self.handle.active().map(|s| s as &dyn Any)
    }

    fn active_any_mut(&mut self) -> Result<&mut dyn Any, ServerError> {
        self.handle.active_mut().map(|s| s as &mut dyn Any)
    }
}

fn downcast_ref<'a, T: 'static>(
    slot: &'a dyn ErasedSlot,
) -> Result<&'a T, ServerError> {
    slot.active_any()?
        .downcast_ref::<T>()
        .ok_or_else(|| ServerError::TypeMismatch {
            name: slot.name().to_string(),
            expected: std::any::type_name::<T>(),
        })
}

// ---------------------------------------------------------------------------
// RegistryView
// ---------------------------------------------------------------------------

/// Read access to the slots registered before the one being constructed.
pub struct RegistryView<'a> {
    requester: &'a str,
    earlier: &'a [Box<dyn ErasedSlot>],
    later: &'a [Box<dyn ErasedSlot>],
}

impl<'a> RegistryView<'a> {
    /// Look up an earlier, initialized server by name.
    pub fn get<T: 'static>(&self, name: &str) -> Result<&'a T, ServerError> {
        if let Some(slot) = self.earlier.iter().find(|s| s.name() == name) {
            return downcast_ref::<T>(slot.as_ref());
        }
        if name == self.requester || self.later.iter().any(|s| s.name() == name) {
            return Err(ServerError::ContractViolation(format!(
                "'{}' observed '{name}', which is not registered before it",
                self.requester
            )));
        }
        Err(ServerError::NotRegistered(name.to_string()))
    }

    /// Name of the slot being constructed.
    pub fn requester(&self) -> &str {
        self.requester
    }
}

// ---------------------------------------------------------------------------
// ServerRegistry
// ---------------------------------------------------------------------------

/// Owns every server and runs their lifecycles in order.
#[derive(Default)]
pub struct ServerRegistry {
    slots: Vec<Box<dyn ErasedSlot>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a slot. Names must be unique.
    pub fn register<S: 'static>(
        &mut self,
        name: &str,
        constructor: impl FnOnce(&RegistryView<'_>) -> Result<S, ServerError> + 'static,
        initializer: impl FnMut(&mut S) -> Result<(), ServerError> + 'static,
        finalizer: impl FnMut(&mut S) + 'static,
        destructor: impl FnOnce(S) + 'static,
    ) -> Result<(), ServerError> {
        if self.slots.iter().any(|s| s.name() == name) {
            return Err(ServerError::ContractViolation(format!(
                "server '{name}' registered twice"
            )));
        }
        self.slots.push(Box::new(TypedSlot {
            handle: ServerHandle::new(name),
            constructor: Some(Box::new(constructor)),
            initializer: Box::new(initializer),
            finalizer: Box::new(finalizer),
            destructor: Some(Box::new(destructor)),
        }));
        tracing::trace!(server = name, "registered");
        Ok(())
    }

    /// Register a server whose hooks are its [`Lifecycle`] methods.
    pub fn register_server<S: Lifecycle + 'static>(
        &mut self,
        name: &str,
        constructor: impl FnOnce(&RegistryView<'_>) -> Result<S, ServerError> + 'static,
    ) -> Result<(), ServerError> {
        self.register(name, constructor, S::init, S::finish, drop)
    }

    /// Construct and initialize every slot still `Uninit`, in registration
    /// order. On failure everything already initialized is rolled back.
    pub fn init_all(&mut self) -> Result<(), ServerError> {
        for index in 0..self.slots.len() {
            if self.slots[index].state() != ServerState::Uninit {
                continue;
            }
            let name = self.slots[index].name().to_string();
            let (earlier, rest) = self.slots.split_at_mut(index);
            let Some((current, later)) = rest.split_first_mut() else {
                break;
            };
            let view = RegistryView {
                requester: &name,
                earlier,
                later,
            };

            let result = current
                .construct(&view)
                .and_then(|()| current.initialize());

            if let Err(e) = result {
                tracing::warn!(server = %name, error = %e, "server init failed, rolling back");
                self.teardown();
                return Err(e);
            }
            tracing::debug!(server = %name, "server initialized");
        }
        Ok(())
    }

    /// Finalize and destroy every live slot in reverse registration order.
    /// Calling it again is a no-op.
    pub fn finish_all(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        for slot in self.slots.iter_mut().rev() {
            match slot.state() {
                ServerState::Initialized => {
                    slot.finalize();
                    slot.destroy();
                    tracing::debug!(server = slot.name(), "server finished");
                }
                ServerState::Constructed | ServerState::Finished => slot.destroy(),
                ServerState::Uninit | ServerState::Destroyed => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// An initialized server by name.
    pub fn get<T: 'static>(&self, name: &str) -> Result<&T, ServerError> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| ServerError::NotRegistered(name.to_string()))?;
        downcast_ref::<T>(slot.as_ref())
    }

    /// An initialized server by name, mutably.
    pub fn get_mut<T: 'static>(&mut self, name: &str) -> Result<&mut T, ServerError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| ServerError::NotRegistered(name.to_string()))?;
        let slot_name = slot.name().to_string();
        slot.active_any_mut()?
            .downcast_mut::<T>()
            .ok_or(ServerError::TypeMismatch {
                name: slot_name,
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.name() == name)
    }

    pub fn state(&self, name: &str) -> Option<ServerState> {
        self.slots.iter().find(|s| s.name() == name).map(|s| s.state())
    }

    /// Slot names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (s.name(), s.state())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn register_logged(registry: &mut ServerRegistry, log: &Log, name: &'static str, fail_init: bool) {
        let (c, i, f, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        registry
            .register(
                name,
                move |_| {
                    c.borrow_mut().push(format!("construct {name}"));
                    Ok(name.len())
                },
                move |_| {
                    i.borrow_mut().push(format!("init {name}"));
                    if fail_init {
                        Err(ServerError::InitFailed {
                            server: name.into(),
                            reason: "boom".into(),
                        })
                    } else {
                        Ok(())
                    }
                },
                move |_| f.borrow_mut().push(format!("finish {name}")),
                move |_| d.borrow_mut().push(format!("destroy {name}")),
            )
            .unwrap();
    }

    // -- 1. Ordering --------------------------------------------------------

    #[test]
    fn init_in_order_finish_in_reverse() {
        let log: Log = Rc::default();
        let mut registry = ServerRegistry::new();
        for name in ["audio", "physics_2d", "rendering"] {
            register_logged(&mut registry, &log, name, false);
        }

        registry.init_all().unwrap();
        registry.finish_all();

        assert_eq!(
            *log.borrow(),
            vec![
                "construct audio",
                "init audio",
                "construct physics_2d",
                "init physics_2d",
                "construct rendering",
                "init rendering",
                "finish rendering",
                "destroy rendering",
                "finish physics_2d",
                "destroy physics_2d",
                "finish audio",
                "destroy audio",
            ]
        );
    }

    #[test]
    fn finish_all_is_idempotent() {
        let log: Log = Rc::default();
        let mut registry = ServerRegistry::new();
        register_logged(&mut registry, &log, "audio", false);
        registry.init_all().unwrap();
        registry.finish_all();
        let len = log.borrow().len();
        registry.finish_all();
        assert_eq!(log.borrow().len(), len);
        assert_eq!(registry.state("audio"), Some(ServerState::Destroyed));
    }

    #[test]
    fn second_init_all_only_touches_new_slots() {
        let log: Log = Rc::default();
        let mut registry = ServerRegistry::new();
        register_logged(&mut registry, &log, "audio", false);
        registry.init_all().unwrap();
        register_logged(&mut registry, &log, "camera", false);
        registry.init_all().unwrap();

        let inits = log.borrow().iter().filter(|l| l.starts_with("init")).count();
        assert_eq!(inits, 2);
    }

    // -- 2. Rollback ----------------------------------------------------------

    #[test]
    fn failed_init_rolls_back_in_reverse_and_returns_original_error() {
        let log: Log = Rc::default();
        let mut registry = ServerRegistry::new();
        register_logged(&mut registry, &log, "audio", false);
        register_logged(&mut registry, &log, "physics_2d", false);
        register_logged(&mut registry, &log, "rendering", true);
        register_logged(&mut registry, &log, "camera", false);

        let err = registry.init_all().unwrap_err();
        assert_eq!(
            err,
            ServerError::InitFailed {
                server: "rendering".into(),
                reason: "boom".into()
            }
        );

        let tail: Vec<_> = log.borrow()[6..].to_vec();
        assert_eq!(
            tail,
            vec![
                "destroy rendering",
                "finish physics_2d",
                "destroy physics_2d",
                "finish audio",
                "destroy audio",
            ]
        );
        assert_eq!(registry.state("camera"), Some(ServerState::Uninit));
        assert!(!log.borrow().iter().any(|l| l.contains("camera")));
    }

    #[test]
    fn failed_constructor_rolls_back() {
        let log: Log = Rc::default();
        let mut registry = ServerRegistry::new();
        register_logged(&mut registry, &log, "audio", false);
        registry
            .register(
                "broken",
                |_| Err::<(), _>(ServerError::NotRegistered("gpu".into())),
                |_| Ok(()),
                |_| {},
                |_| {},
            )
            .unwrap();

        assert_eq!(
            registry.init_all().unwrap_err(),
            ServerError::NotRegistered("gpu".into())
        );
        assert_eq!(registry.state("audio"), Some(ServerState::Destroyed));
        assert_eq!(registry.state("broken"), Some(ServerState::Uninit));
    }

    // -- 3. Dependency rule ---------------------------------------------------

    #[test]
    fn constructor_sees_earlier_slots() {
        let mut registry = ServerRegistry::new();
        registry
            .register("base", |_| Ok(41u32), |_| Ok(()), |_| {}, drop)
            .unwrap();
        registry
            .register(
                "derived",
                |view| Ok(*view.get::<u32>("base")? + 1),
                |_| Ok(()),
                |_| {},
                drop,
            )
            .unwrap();

        registry.init_all().unwrap();
        assert_eq!(*registry.get::<u32>("derived").unwrap(), 42);
    }

    #[test]
    fn observing_a_later_slot_is_a_contract_violation() {
        let mut registry = ServerRegistry::new();
        registry
            .register(
                "early",
                |view| view.get::<u32>("late").map(|v| *v),
                |_| Ok(()),
                |_| {},
                drop,
            )
            .unwrap();
        registry
            .register("late", |_| Ok(1u32), |_| Ok(()), |_| {}, drop)
            .unwrap();

        assert!(matches!(
            registry.init_all(),
            Err(ServerError::ContractViolation(_))
        ));
    }

    #[test]
    fn observing_self_is_a_contract_violation() {
        let mut registry = ServerRegistry::new();
        registry
            .register(
                "selfish",
                |view| view.get::<u32>("selfish").map(|v| *v),
                |_| Ok(()),
                |_| {},
                drop,
            )
            .unwrap();
        assert!(matches!(
            registry.init_all(),
            Err(ServerError::ContractViolation(_))
        ));
    }

    // -- 4. Lookup ------------------------------------------------------------

    #[test]
    fn lookup_checks_type_and_state() {
        let mut registry = ServerRegistry::new();
        registry
            .register("n", |_| Ok(5u32), |_| Ok(()), |_| {}, drop)
            .unwrap();
        assert!(registry.get::<u32>("n").is_err());

        registry.init_all().unwrap();
        assert!(matches!(
            registry.get::<String>("n"),
            Err(ServerError::TypeMismatch { .. })
        ));
        *registry.get_mut::<u32>("n").unwrap() = 6;
        assert_eq!(*registry.get::<u32>("n").unwrap(), 6);
        assert!(matches!(
            registry.get::<u32>("missing"),
            Err(ServerError::NotRegistered(_))
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ServerRegistry::new();
        registry
            .register("a", |_| Ok(()), |_| Ok(()), |_| {}, drop)
            .unwrap();
        assert!(registry
            .register("a", |_| Ok(()), |_| Ok(()), |_| {}, drop)
            .is_err());
        assert_eq!(registry.names(), vec!["a"]);
    }
}
