//! Service registry primitives: registration and the three tracker
//! backed views (references, checked out instances, prototype handles).
use super::{CloseFn, Execution, Program, StartFn};
use crate::{
    filter::Filter,
    host::{
        Context, Prototype, Registration, ServiceClass, ServiceEvents, ServiceId,
        ServiceInstance, ServiceObjects, ServiceQuery, ServiceRef, ServiceSource,
        Subscription,
    },
    pipe::Pipe,
    token::Token,
    value::Props,
};
use anyhow::Result;
use arcstr::ArcStr;
use fxhash::FxHashMap;
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;

/// register `instance` under its type while the program is
/// materialized. start emits the registration handle; close
/// unregisters, swallowing unregistration errors.
pub fn register<T: Send + Sync + 'static>(
    instance: Arc<T>,
    props: Props,
) -> Program<Registration> {
    let instance: ServiceInstance = instance;
    registering::<T>(ServiceSource::Singleton(instance), props)
}

/// like [`register`], but the registration is prototype scoped:
/// `factory` is invoked once per checkout
pub fn register_prototype<T: Send + Sync + 'static>(
    factory: impl Fn() -> Arc<T> + Send + Sync + 'static,
    props: Props,
) -> Program<Registration> {
    let source = ServiceSource::Prototype(Arc::new(move || -> ServiceInstance {
        factory()
    }));
    registering::<T>(source, props)
}

fn registering<T: Send + Sync + 'static>(
    source: ServiceSource,
    props: Props,
) -> Program<Registration> {
    let source = Arc::new(source);
    Program::new(move |ctx: &Context| {
        let source = match &*source {
            ServiceSource::Singleton(i) => ServiceSource::Singleton(Arc::clone(i)),
            ServiceSource::Prototype(f) => ServiceSource::Prototype(Arc::clone(f)),
        };
        let registration =
            ctx.register_service(ServiceClass::of::<T>(), source, props.clone())?;
        let added = Pipe::new();
        let start: StartFn = {
            let added = added.clone();
            let registration = registration.clone();
            Arc::new(move || {
                added.emit(&Token::new(registration.clone()));
                Ok(())
            })
        };
        let close: CloseFn = Arc::new(move || {
            if let Err(e) = registration.unregister() {
                warn!("unregister failed: {e:?}")
            }
        });
        Ok(Execution::new(added, Pipe::new(), start, close))
    })
}

fn query_for<T: 'static>(filter: &Option<ArcStr>) -> Result<ServiceQuery> {
    let filter = filter.as_ref().map(|f| Filter::parse(f)).transpose()?;
    Ok(ServiceQuery::new(ServiceClass::of::<T>(), filter))
}

type SubSlot = Arc<Mutex<Option<Box<dyn Subscription>>>>;

fn tracker_execution<T: Clone + Send + Sync + 'static>(
    added: Pipe<T>,
    removed: Pipe<T>,
    open: impl Fn() -> Result<Box<dyn Subscription>> + Send + Sync + 'static,
) -> Execution<T> {
    let slot: SubSlot = Arc::new(Mutex::new(None));
    let start: StartFn = {
        let slot = Arc::clone(&slot);
        Arc::new(move || {
            let sub = open()?;
            *slot.lock() = Some(sub);
            Ok(())
        })
    };
    let close: CloseFn = Arc::new(move || {
        if let Some(sub) = slot.lock().take() {
            sub.close()
        }
    });
    Execution::new(added, removed, start, close)
}

struct RefTracker {
    added: Pipe<ServiceRef>,
    removed: Pipe<ServiceRef>,
    tracked: Mutex<FxHashMap<ServiceId, Token<ServiceRef>>>,
}

impl ServiceEvents for RefTracker {
    fn adding(&self, reference: &ServiceRef) {
        let t = Token::new(reference.clone());
        self.tracked.lock().insert(reference.id(), t.clone());
        self.added.emit(&t)
    }

    fn modified(&self, reference: &ServiceRef) {
        let old = self.tracked.lock().remove(&reference.id());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
        self.adding(reference)
    }

    fn removed(&self, reference: &ServiceRef) {
        let old = self.tracked.lock().remove(&reference.id());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
    }
}

/// track the references of services of type `T` matching `filter`. a
/// property modification is a remove of the old token followed by an
/// add with a fresh identity.
pub fn service_references<T: 'static>(filter: Option<&str>) -> Program<ServiceRef> {
    let filter: Option<ArcStr> = filter.map(ArcStr::from);
    Program::new(move |ctx: &Context| {
        let query = query_for::<T>(&filter)?;
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(RefTracker {
            added: added.clone(),
            removed: removed.clone(),
            tracked: Mutex::new(FxHashMap::default()),
        });
        let ctx = ctx.clone();
        Ok(tracker_execution(added, removed, move || {
            ctx.track_services(query.clone(), events.clone())
        }))
    })
}

struct Checkout<T> {
    token: Token<Arc<T>>,
    objects: ServiceObjects,
    instance: ServiceInstance,
}

struct InstanceTracker<T> {
    added: Pipe<Arc<T>>,
    removed: Pipe<Arc<T>>,
    ctx: Context,
    tracked: Mutex<FxHashMap<ServiceId, Checkout<T>>>,
}

impl<T: Send + Sync + 'static> InstanceTracker<T> {
    fn checkout(&self, reference: &ServiceRef) {
        let objects = match self.ctx.service_objects(reference) {
            Ok(o) => o,
            Err(e) => {
                warn!("no service objects for {:?}: {e:?}", reference.id());
                return;
            }
        };
        let Some(instance) = objects.get() else {
            warn!("service {:?} vanished before checkout", reference.id());
            return;
        };
        let typed = match instance.clone().downcast::<T>() {
            Ok(t) => t,
            Err(_) => {
                warn!("service {:?} is not of the tracked type", reference.id());
                objects.unget(instance);
                return;
            }
        };
        let token = Token::new(typed);
        self.tracked
            .lock()
            .insert(reference.id(), Checkout { token: token.clone(), objects, instance });
        self.added.emit(&token)
    }

    fn checkin(&self, reference: &ServiceRef) {
        let checkout = self.tracked.lock().remove(&reference.id());
        if let Some(c) = checkout {
            self.removed.emit(&c.token);
            c.objects.unget(c.instance)
        }
    }
}

impl<T: Send + Sync + 'static> ServiceEvents for InstanceTracker<T> {
    fn adding(&self, reference: &ServiceRef) {
        self.checkout(reference)
    }

    fn modified(&self, reference: &ServiceRef) {
        self.checkin(reference);
        self.checkout(reference)
    }

    fn removed(&self, reference: &ServiceRef) {
        self.checkin(reference)
    }
}

/// track services of type `T` matching `filter`, checking an instance
/// out per appearing match. the remove path emits the original token
/// and then returns the instance through the same checkout handle.
pub fn services<T: Send + Sync + 'static>(filter: Option<&str>) -> Program<Arc<T>> {
    let filter: Option<ArcStr> = filter.map(ArcStr::from);
    Program::new(move |ctx: &Context| {
        let query = query_for::<T>(&filter)?;
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(InstanceTracker {
            added: added.clone(),
            removed: removed.clone(),
            ctx: ctx.clone(),
            tracked: Mutex::new(FxHashMap::default()),
        });
        let ctx = ctx.clone();
        Ok(tracker_execution(added, removed, move || {
            ctx.track_services(query.clone(), events.clone())
        }))
    })
}

struct PrototypeTracker<T> {
    added: Pipe<Prototype<T>>,
    removed: Pipe<Prototype<T>>,
    ctx: Context,
    tracked: Mutex<FxHashMap<ServiceId, Token<Prototype<T>>>>,
}

impl<T: Send + Sync + 'static> PrototypeTracker<T> {
    fn track(&self, reference: &ServiceRef) {
        let objects = match self.ctx.service_objects(reference) {
            Ok(o) => o,
            Err(e) => {
                warn!("no service objects for {:?}: {e:?}", reference.id());
                return;
            }
        };
        let token = Token::new(Prototype::new(objects));
        self.tracked.lock().insert(reference.id(), token.clone());
        self.added.emit(&token)
    }

    fn untrack(&self, reference: &ServiceRef) {
        let old = self.tracked.lock().remove(&reference.id());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
    }
}

impl<T: Send + Sync + 'static> ServiceEvents for PrototypeTracker<T> {
    fn adding(&self, reference: &ServiceRef) {
        self.track(reference)
    }

    fn modified(&self, reference: &ServiceRef) {
        self.untrack(reference);
        self.track(reference)
    }

    fn removed(&self, reference: &ServiceRef) {
        self.untrack(reference)
    }
}

/// track services of type `T` matching `filter`, emitting the checkout
/// handle itself; the consumer manages the prototype instance
/// lifecycle
pub fn prototypes<T: Send + Sync + 'static>(
    filter: Option<&str>,
) -> Program<Prototype<T>> {
    let filter: Option<ArcStr> = filter.map(ArcStr::from);
    Program::new(move |ctx: &Context| {
        let query = query_for::<T>(&filter)?;
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(PrototypeTracker {
            added: added.clone(),
            removed: removed.clone(),
            ctx: ctx.clone(),
            tracked: Mutex::new(FxHashMap::default()),
        });
        let ctx = ctx.clone();
        Ok(tracker_execution(added, removed, move || {
            ctx.track_services(query.clone(), events.clone())
        }))
    })
}
