//! Scoped service resolution.
//!
//! Handlers, middleware and broadcasting strategies are created by resolving
//! them from a [`ServiceScope`]. Services are registered in a [`Container`]
//! at startup, the container is frozen into a [`ServiceProvider`], and every
//! logical call resolves from a scope created by that provider.
//!
//! # Example
//!
//! ```rust
//! use emissary_core::di::{Container, Lifetime};
//! use std::sync::Arc;
//!
//! struct Clock;
//! struct RequestLog(Vec<String>);
//!
//! let mut container = Container::new();
//! container.register(Arc::new(Clock));
//! container.register_factory(Lifetime::Scoped, |_| Ok(RequestLog(Vec::new())));
//!
//! let provider = container.build();
//! let scope = provider.create_scope();
//!
//! let clock: Arc<Clock> = scope.resolve().unwrap();
//! let log_a = scope.resolve_required::<RequestLog>().unwrap();
//! let log_b = scope.resolve_required::<RequestLog>().unwrap();
//! assert!(Arc::ptr_eq(&log_a, &log_b));
//! ```

use crate::error::{DispatchError, DispatchResult};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceScope) -> DispatchResult<Instance> + Send + Sync>;

/// How long a factory-created instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// One instance per provider.
    Singleton,
    /// One instance per scope.
    Scoped,
    /// A new instance for every resolution.
    #[default]
    Transient,
}

enum Provision {
    Instance(Instance),
    Factory { lifetime: Lifetime, factory: Factory },
}

struct Registration {
    type_name: &'static str,
    provision: Provision,
}

/// A registry of services, filled at startup.
///
/// Registering a type again replaces the earlier registration.
#[derive(Default)]
pub struct Container {
    registrations: HashMap<TypeId, Registration>,
}

impl Container {
    /// Creates a new empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Registers a shared instance.
    pub fn register<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: std::any::type_name::<T>(),
                provision: Provision::Instance(service),
            },
        );
    }

    /// Registers a factory with the given lifetime.
    pub fn register_factory<T, F>(&mut self, lifetime: Lifetime, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> DispatchResult<T> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |scope: &ServiceScope| -> DispatchResult<Instance> {
            let instance: Instance = Arc::new(factory(scope)?);
            Ok(instance)
        });
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: std::any::type_name::<T>(),
                provision: Provision::Factory { lifetime, factory },
            },
        );
    }

    /// Registers `T::default()` with the given lifetime.
    pub fn register_default<T>(&mut self, lifetime: Lifetime)
    where
        T: Default + Send + Sync + 'static,
    {
        self.register_factory(lifetime, |_| Ok(T::default()));
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Freezes the container into a provider.
    #[must_use]
    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            inner: Arc::new(ProviderInner {
                registrations: self.registrations,
                singletons: DashMap::new(),
                next_scope_id: AtomicU64::new(1),
            }),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.registrations.len())
            .finish()
    }
}

struct ProviderInner {
    registrations: HashMap<TypeId, Registration>,
    singletons: DashMap<TypeId, Instance>,
    next_scope_id: AtomicU64,
}

/// A frozen set of registrations. Cheap to clone and share.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ProviderInner>,
}

impl ServiceProvider {
    /// Creates a new resolution scope.
    #[must_use]
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            provider: self.clone(),
            state: Arc::new(ScopeState {
                id: self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed),
                scoped: DashMap::new(),
            }),
        }
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.inner.registrations.contains_key(&TypeId::of::<T>())
    }

    /// Returns the type names of all registered services.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .inner
            .registrations
            .values()
            .map(|r| r.type_name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service_count", &self.inner.registrations.len())
            .field("singletons", &self.inner.singletons.len())
            .finish()
    }
}

struct ScopeState {
    id: u64,
    scoped: DashMap<TypeId, Instance>,
}

/// A resolution scope for one logical call (or a group of calls).
///
/// Clones share the scope and its scoped instances.
#[derive(Clone)]
pub struct ServiceScope {
    provider: ServiceProvider,
    state: Arc<ScopeState>,
}

impl ServiceScope {
    /// Returns the id of this scope, unique within its provider.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Returns the provider this scope was created from.
    #[must_use]
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    /// Returns `true` if both handles refer to the same scope.
    #[must_use]
    pub fn same_scope(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.provider.contains::<T>()
    }

    /// Resolves a service, returning `None` if it is not available.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve_required().ok()
    }

    /// Resolves a service or returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Resolution`] if the service is not registered,
    /// or the error of a failing factory.
    pub fn resolve_required<T: Send + Sync + 'static>(&self) -> DispatchResult<Arc<T>> {
        let type_id = TypeId::of::<T>();
        let registration = self
            .provider
            .inner
            .registrations
            .get(&type_id)
            .ok_or_else(DispatchError::not_registered::<T>)?;

        let instance = match &registration.provision {
            Provision::Instance(instance) => instance.clone(),
            Provision::Factory { lifetime, factory } => match lifetime {
                Lifetime::Singleton => {
                    cached(&self.provider.inner.singletons, type_id, || factory(self))?
                }
                Lifetime::Scoped => cached(&self.state.scoped, type_id, || factory(self))?,
                Lifetime::Transient => factory(self)?,
            },
        };

        instance
            .downcast::<T>()
            .map_err(|_| DispatchError::resolution::<T>("registered instance has a different type"))
    }
}

// Factories run without holding a map lock so they can resolve other services.
fn cached(
    instances: &DashMap<TypeId, Instance>,
    type_id: TypeId,
    create: impl FnOnce() -> DispatchResult<Instance>,
) -> DispatchResult<Instance> {
    if let Some(existing) = instances.get(&type_id) {
        return Ok(existing.value().clone());
    }
    let created = create()?;
    Ok(instances.entry(type_id).or_insert(created).value().clone())
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("id", &self.state.id)
            .field("scoped_instances", &self.state.scoped.len())
            .finish()
    }
}
