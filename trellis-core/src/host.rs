//! The contracts a host service platform must satisfy.
//!
//! Programs never talk to a concrete registry; the primitive
//! constructors consume these traits through a shared [`Context`]. A
//! host dispatches every callback synchronously on whichever thread
//! performed the triggering mutation, and may use a different thread
//! per event source.
use crate::{atomic_id, filter::Filter, value::Props};
use anyhow::Result;
use arcstr::ArcStr;
use enumflags2::{bitflags, BitFlags};
use std::{
    any::{type_name, Any, TypeId},
    fmt,
    marker::PhantomData,
    sync,
};
use triomphe::Arc;

/// an opaque service instance owned by the registry
pub type ServiceInstance = sync::Arc<dyn Any + Send + Sync>;

/// the host handle a program is executed against
pub type Context = sync::Arc<dyn Host>;

atomic_id!(ServiceId);
atomic_id!(BundleId);

/// the class a service is registered under, a rust type plus its name.
/// the name is what the synthetic `objectclass` property carries, so
/// user filters can select on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceClass {
    id: TypeId,
    name: ArcStr,
}

impl ServiceClass {
    pub fn of<T: 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: ArcStr::from(type_name::<T>()) }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }
}

/// a snapshot reference to a registered service. the property
/// dictionary is the one that was current when the snapshot was taken;
/// a property change produces a fresh reference.
#[derive(Debug, Clone)]
pub struct ServiceRef {
    id: ServiceId,
    class: ServiceClass,
    props: Arc<Props>,
}

impl ServiceRef {
    pub fn new(id: ServiceId, class: ServiceClass, props: Arc<Props>) -> Self {
        Self { id, class, props }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn class(&self) -> &ServiceClass {
        &self.class
    }

    pub fn props(&self) -> &Arc<Props> {
        &self.props
    }
}

/// where the instances of a registration come from
pub enum ServiceSource {
    /// one shared instance handed to every consumer
    Singleton(ServiceInstance),
    /// a factory invoked once per checkout
    Prototype(sync::Arc<dyn Fn() -> ServiceInstance + Send + Sync>),
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Singleton(_) => write!(f, "Singleton(..)"),
            ServiceSource::Prototype(_) => write!(f, "Prototype(..)"),
        }
    }
}

/// what a service tracker selects: a class, optionally narrowed by a
/// filter over the service properties
#[derive(Debug, Clone)]
pub struct ServiceQuery {
    class: ServiceClass,
    filter: Option<Filter>,
}

impl ServiceQuery {
    pub fn new(class: ServiceClass, filter: Option<Filter>) -> Self {
        Self { class, filter }
    }

    pub fn class(&self) -> &ServiceClass {
        &self.class
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn matches(&self, class: &ServiceClass, props: &Props) -> bool {
        self.class.type_id() == class.type_id()
            && self.filter.as_ref().is_none_or(|f| f.matches(props))
    }
}

/// bundle lifecycle states, combined into masks with [`BitFlags`]
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

/// a snapshot of a bundle's identity and state
#[derive(Debug, Clone)]
pub struct BundleInfo {
    id: BundleId,
    name: ArcStr,
    state: BundleState,
}

impl BundleInfo {
    pub fn new(id: BundleId, name: ArcStr, state: BundleState) -> Self {
        Self { id, name, state }
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn state(&self) -> BundleState {
        self.state
    }
}

/// a live watch on the registry. closing a service or bundle tracker
/// delivers `removed` for everything it currently tracks before it
/// detaches; closing a configuration watch just detaches it.
pub trait Subscription: Send + Sync {
    fn close(&self);
}

/// callbacks of a service tracker. `adding` is invoked once per
/// appearing match, `modified` on a property change of a tracked match,
/// `removed` when a tracked match departs.
pub trait ServiceEvents: Send + Sync {
    fn adding(&self, reference: &ServiceRef);
    fn modified(&self, reference: &ServiceRef);
    fn removed(&self, reference: &ServiceRef);
}

/// callbacks of a bundle tracker, keyed by a state mask: `adding` on a
/// transition into the mask, `modified` on a transition within it,
/// `removed` on a transition out of it
pub trait BundleEvents: Send + Sync {
    fn adding(&self, bundle: &BundleInfo);
    fn modified(&self, bundle: &BundleInfo);
    fn removed(&self, bundle: &BundleInfo);
}

/// callback of a singleton configuration watch; `None` is delivered
/// when the configuration is deleted
pub trait ConfigEvents: Send + Sync {
    fn updated(&self, dict: Option<Arc<Props>>);
}

/// callbacks of a factory configuration watch, keyed by the factory
/// instance pid
pub trait FactoryConfigEvents: Send + Sync {
    fn updated(&self, pid: &ArcStr, dict: &Arc<Props>);
    fn deleted(&self, pid: &ArcStr);
}

pub trait RegistrationHandle: Send + Sync {
    fn reference(&self) -> ServiceRef;
    fn set_properties(&self, props: Props) -> Result<()>;
    fn unregister(&self) -> Result<()>;
}

/// clonable handle to a live service registration
#[derive(Clone)]
pub struct Registration(sync::Arc<dyn RegistrationHandle>);

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Registration").field(&self.reference()).finish()
    }
}

impl Registration {
    pub fn new(handle: sync::Arc<dyn RegistrationHandle>) -> Self {
        Self(handle)
    }

    pub fn reference(&self) -> ServiceRef {
        self.0.reference()
    }

    /// replace the registration's properties, notifying trackers of the
    /// modification
    pub fn set_properties(&self, props: Props) -> Result<()> {
        self.0.set_properties(props)
    }

    pub fn unregister(&self) -> Result<()> {
        self.0.unregister()
    }
}

pub trait ServiceObjectsHandle: Send + Sync {
    fn reference(&self) -> ServiceRef;
    fn get(&self) -> Option<ServiceInstance>;
    fn unget(&self, instance: ServiceInstance);
}

/// reference counted checkout handle for a service's instances
#[derive(Clone)]
pub struct ServiceObjects(sync::Arc<dyn ServiceObjectsHandle>);

impl fmt::Debug for ServiceObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceObjects").field(&self.reference()).finish()
    }
}

impl ServiceObjects {
    pub fn new(handle: sync::Arc<dyn ServiceObjectsHandle>) -> Self {
        Self(handle)
    }

    pub fn reference(&self) -> ServiceRef {
        self.0.reference()
    }

    pub fn get(&self) -> Option<ServiceInstance> {
        self.0.get()
    }

    pub fn unget(&self, instance: ServiceInstance) {
        self.0.unget(instance)
    }
}

/// typed view over a prototype scoped service's objects handle. the
/// consumer owns the instance lifecycle: every [`Prototype::get`] is
/// paired with a [`Prototype::unget`] by the caller, not by the library.
pub struct Prototype<T> {
    objects: ServiceObjects,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Prototype<T> {
    fn clone(&self) -> Self {
        Self { objects: self.objects.clone(), marker: PhantomData }
    }
}

impl<T> fmt::Debug for Prototype<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Prototype").field(&self.objects).finish()
    }
}

impl<T: Send + Sync + 'static> Prototype<T> {
    pub fn new(objects: ServiceObjects) -> Self {
        Self { objects, marker: PhantomData }
    }

    pub fn reference(&self) -> ServiceRef {
        self.objects.reference()
    }

    pub fn get(&self) -> Option<sync::Arc<T>> {
        self.objects.get().and_then(|i| i.downcast::<T>().ok())
    }

    pub fn unget(&self, instance: sync::Arc<T>) {
        let instance: ServiceInstance = instance;
        self.objects.unget(instance)
    }

    pub fn objects(&self) -> &ServiceObjects {
        &self.objects
    }
}

/// the capabilities a host platform offers to programs
pub trait Host: Send + Sync {
    /// register a service, returning the handle that owns it
    fn register_service(
        &self,
        class: ServiceClass,
        source: ServiceSource,
        props: Props,
    ) -> Result<Registration>;

    /// open a tracker over every service matching `query`. `adding` is
    /// delivered for all current matches before this returns.
    fn track_services(
        &self,
        query: ServiceQuery,
        events: sync::Arc<dyn ServiceEvents>,
    ) -> Result<Box<dyn Subscription>>;

    /// obtain the checkout handle for a service
    fn service_objects(&self, reference: &ServiceRef) -> Result<ServiceObjects>;

    /// open a tracker over every bundle whose state is within `mask`.
    /// `adding` is delivered for all current matches before this
    /// returns.
    fn track_bundles(
        &self,
        mask: BitFlags<BundleState>,
        events: sync::Arc<dyn BundleEvents>,
    ) -> Result<Box<dyn Subscription>>;

    /// watch the configuration stored under `pid`. the current
    /// configuration, if any, is delivered before this returns.
    fn watch_configuration(
        &self,
        pid: ArcStr,
        events: sync::Arc<dyn ConfigEvents>,
    ) -> Result<Box<dyn Subscription>>;

    /// watch the factory configuration instances of `factory_pid`. the
    /// current instances, if any, are delivered before this returns.
    fn watch_factory_configurations(
        &self,
        factory_pid: ArcStr,
        events: sync::Arc<dyn FactoryConfigEvents>,
    ) -> Result<Box<dyn Subscription>>;
}
