//! Registry of known middleware types.
//!
//! A pipeline only accepts middleware whose type was registered here. A
//! registration may also declare base types: a middleware registered as
//! derived from `Base` is matched by `without::<Base>()` and
//! `configure::<Base>()` on a pipeline builder.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};

/// One registered middleware type.
#[derive(Debug, Clone)]
pub struct MiddlewareRegistration {
    type_id: TypeId,
    type_name: &'static str,
    bases: Vec<TypeId>,
}

impl MiddlewareRegistration {
    /// The middleware type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The middleware type id.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The base types this middleware was registered as derived from.
    ///
    /// Only direct bases; ancestry is resolved by the registry.
    #[must_use]
    pub fn bases(&self) -> &[TypeId] {
        &self.bases
    }
}

/// The set of middleware types an application registered.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<TypeId, MiddlewareRegistration>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers middleware type `T`.
    ///
    /// Registering the same type again is a no-op.
    pub fn register<T: 'static>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<T>();
        self.entries
            .entry(type_id)
            .or_insert_with(|| MiddlewareRegistration {
                type_id,
                type_name: type_name::<T>(),
                bases: Vec::new(),
            });
        tracing::trace!(middleware = type_name::<T>(), "middleware registered");
        self
    }

    /// Registers middleware type `T` as derived from `Base`.
    ///
    /// `T` also matches every ancestor of `Base`, including ancestors
    /// registered later.
    pub fn register_derived<T: 'static, Base: 'static>(&mut self) -> &mut Self {
        let base_id = TypeId::of::<Base>();
        let type_id = TypeId::of::<T>();
        let registration = self
            .entries
            .entry(type_id)
            .or_insert_with(|| MiddlewareRegistration {
                type_id,
                type_name: type_name::<T>(),
                bases: Vec::new(),
            });
        if !registration.bases.contains(&base_id) {
            registration.bases.push(base_id);
        }

        tracing::trace!(
            middleware = type_name::<T>(),
            base = type_name::<Base>(),
            "derived middleware registered"
        );
        self
    }

    /// Returns `true` if `T` is registered.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the registration for `type_id`.
    #[must_use]
    pub fn get(&self, type_id: TypeId) -> Option<&MiddlewareRegistration> {
        self.entries.get(&type_id)
    }

    /// Returns `true` if the middleware `type_id` is `target` or derives
    /// from it. Unregistered types only match themselves.
    #[must_use]
    pub fn is_assignable(&self, type_id: TypeId, target: TypeId) -> bool {
        let mut pending = vec![type_id];
        let mut visited = HashSet::new();
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(registration) = self.entries.get(&current) {
                pending.extend(registration.bases.iter().copied());
            }
        }
        false
    }

    /// Iterates over all registrations.
    pub fn iter(&self) -> impl Iterator<Item = &MiddlewareRegistration> {
        self.entries.values()
    }

    /// Number of registered middleware types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Auth;
    struct JwtAuth;
    struct ScopedJwtAuth;
    struct Retry;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = MiddlewareRegistry::new();
        registry.register::<Retry>().register::<Retry>();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains::<Retry>());
        assert!(!registry.contains::<Auth>());
    }

    #[test]
    fn test_derived_matches_base() {
        let mut registry = MiddlewareRegistry::new();
        registry.register::<Auth>();
        registry.register_derived::<JwtAuth, Auth>();

        let jwt = TypeId::of::<JwtAuth>();
        assert!(registry.is_assignable(jwt, TypeId::of::<Auth>()));
        assert!(registry.is_assignable(jwt, jwt));
        assert!(!registry.is_assignable(TypeId::of::<Auth>(), jwt));
    }

    #[test]
    fn test_lineage_is_transitive() {
        let mut registry = MiddlewareRegistry::new();
        registry.register_derived::<JwtAuth, Auth>();
        registry.register_derived::<ScopedJwtAuth, JwtAuth>();

        let scoped = TypeId::of::<ScopedJwtAuth>();
        assert!(registry.is_assignable(scoped, TypeId::of::<JwtAuth>()));
        assert!(registry.is_assignable(scoped, TypeId::of::<Auth>()));
        assert!(!registry.contains::<Auth>());
    }

    #[test]
    fn test_lineage_registered_out_of_order() {
        let mut registry = MiddlewareRegistry::new();
        registry.register_derived::<ScopedJwtAuth, JwtAuth>();
        registry.register_derived::<JwtAuth, Auth>();

        let scoped = TypeId::of::<ScopedJwtAuth>();
        assert!(registry.is_assignable(scoped, TypeId::of::<Auth>()));
        assert_eq!(registry.get(scoped).map(|r| r.bases().len()), Some(1));
    }

    #[test]
    fn test_unregistered_only_matches_itself() {
        let registry = MiddlewareRegistry::new();
        let retry = TypeId::of::<Retry>();
        assert!(registry.is_assignable(retry, retry));
        assert!(!registry.is_assignable(retry, TypeId::of::<Auth>()));
    }
}
