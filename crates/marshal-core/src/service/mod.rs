//! Process-wide registry of cross-cutting capabilities.
//!
//! A [`ServiceRegistry`] owns one instance per [`CapabilityId`]. Services are
//! added eagerly during bootstrap or created on first request through a
//! [`DefaultService`] factory, and are never removed.
//!
//! Lookup follows three steps, in order:
//!
//! 1. an exact hit on the requested type's capability identity;
//! 2. a scan, in registration order, for any service that exposed a view of
//!    the requested type through its [`Witnesses`];
//! 3. for [`ServiceRegistry::get_or_create`], the type's default factory,
//!    whose result is registered and returned.
//!
//! Anything else is reported as [`ServiceError::Missing`].

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::capability::CapabilityId;
use crate::error::ServiceError;

/// Tracing target for service wiring.
const SERVICE_TARGET: &str = "marshal_core::service";

/// A component owned by the [`ServiceRegistry`].
///
/// Implementors may override [`Service::expose`] to publish additional views
/// of themselves, typically as trait objects, so that a lookup by trait finds
/// them even though they are registered under their concrete identity.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use marshal_core::{Service, ServiceRegistry, Witnesses};
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// struct FixedClock;
///
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 {
///         42
///     }
/// }
///
/// impl Service for FixedClock {
///     fn expose(self: Arc<Self>, witnesses: &mut Witnesses) {
///         witnesses.expose::<dyn Clock>(self);
///     }
/// }
///
/// let mut registry = ServiceRegistry::new();
/// registry.add(FixedClock).expect("add");
/// let clock = registry.get::<dyn Clock>().expect("clock");
/// assert_eq!(clock.now(), 42);
/// ```
pub trait Service: Send + Sync + 'static {
    /// Publishes additional views of this service.
    fn expose(self: Arc<Self>, _witnesses: &mut Witnesses) {}
}

/// Factory used when a capability is requested but nothing provides it.
pub trait DefaultService: Send + Sync + 'static {
    /// Builds the default instance, reading any dependencies from `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error when a dependency is missing or construction fails.
    fn create_default(registry: &mut ServiceRegistry) -> Result<Arc<Self>, ServiceError>;
}

/// Typed views a service publishes of itself.
#[derive(Default)]
pub struct Witnesses {
    views: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Witnesses {
    /// Publishes `service` as a view of type `T`.
    pub fn expose<T>(&mut self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.views.insert(TypeId::of::<T>(), Box::new(service));
    }

    fn view<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.views
            .get(&TypeId::of::<T>())
            .and_then(|view| view.downcast_ref::<Arc<T>>())
            .map(Arc::clone)
    }
}

struct Entry {
    id: CapabilityId,
    type_name: &'static str,
    witnesses: Witnesses,
}

/// Registry mapping capability identities to service instances.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Vec<Entry>,
    index: HashMap<CapabilityId, usize>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.id))
            .finish()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its concrete capability identity.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] if the identity is already taken.
    pub fn add<S: Service>(&mut self, service: S) -> Result<Arc<S>, ServiceError> {
        self.add_arc(Arc::new(service))
    }

    /// Registers an already shared service under its concrete identity.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] if the identity is already taken.
    pub fn add_arc<S: Service>(&mut self, service: Arc<S>) -> Result<Arc<S>, ServiceError> {
        let mut witnesses = Witnesses::default();
        witnesses.expose::<S>(Arc::clone(&service));
        Arc::clone(&service).expose(&mut witnesses);
        self.insert(CapabilityId::of::<S>(), type_name::<S>(), witnesses)?;
        Ok(service)
    }

    /// Registers `service` directly under the identity of `T`.
    ///
    /// Use this to provide a trait-object capability without a concrete
    /// [`Service`] implementation.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] if the identity is already taken.
    pub fn provide<T>(&mut self, service: Arc<T>) -> Result<(), ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut witnesses = Witnesses::default();
        witnesses.expose::<T>(service);
        self.insert(CapabilityId::of::<T>(), type_name::<T>(), witnesses)
    }

    /// Returns `true` when a service is registered under `T`'s identity.
    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.index.contains_key(&CapabilityId::of::<T>())
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the capability `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TargetMismatch`] when `T`'s identity is
    /// registered but cannot be viewed as `T`, and [`ServiceError::Missing`]
    /// when no service provides it.
    pub fn get<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let capability = CapabilityId::of::<T>();

        if let Some(entry) = self
            .index
            .get(&capability)
            .and_then(|position| self.entries.get(*position))
        {
            return entry
                .witnesses
                .view::<T>()
                .ok_or(ServiceError::TargetMismatch {
                    capability,
                    registered: entry.type_name,
                });
        }

        if let Some((entry, view)) = self
            .entries
            .iter()
            .find_map(|entry| entry.witnesses.view::<T>().map(|view| (entry, view)))
        {
            debug!(
                target: SERVICE_TARGET,
                requested = %capability,
                provider = %entry.id,
                "capability satisfied by a conforming service"
            );
            return Ok(view);
        }

        Err(ServiceError::Missing { capability })
    }

    /// Resolves `T`, creating and registering its default when nothing
    /// provides it yet.
    ///
    /// # Errors
    ///
    /// Propagates lookup errors other than [`ServiceError::Missing`] and any
    /// failure raised by the factory.
    pub fn get_or_create<T>(&mut self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + DefaultService,
    {
        match self.get::<T>() {
            Err(ServiceError::Missing { capability }) => {
                debug!(
                    target: SERVICE_TARGET,
                    capability = %capability,
                    "creating default service"
                );
                let service = T::create_default(self)?;
                self.provide::<T>(Arc::clone(&service))?;
                Ok(service)
            }
            other => other,
        }
    }

    fn insert(
        &mut self,
        id: CapabilityId,
        type_name: &'static str,
        witnesses: Witnesses,
    ) -> Result<(), ServiceError> {
        if self.index.contains_key(&id) {
            return Err(ServiceError::Duplicate { capability: id });
        }
        debug!(target: SERVICE_TARGET, capability = %id, "registering service");
        self.index.insert(id, self.entries.len());
        self.entries.push(Entry {
            id,
            type_name,
            witnesses,
        });
        Ok(())
    }
}

impl Service for marshal_config::Config {}
