//! The service registry: registration, property mutation, filter
//! scoped trackers, and checkout accounting.
use crate::{Platform, ServiceRecord, ServiceTrackerRecord, WatcherId};
use anyhow::{bail, Result};
use fxhash::FxHashSet;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{
    Props, Registration, RegistrationHandle, ServiceClass, ServiceEvents, ServiceId,
    ServiceInstance, ServiceObjects, ServiceObjectsHandle, ServiceQuery, ServiceRef,
    ServiceSource, Subscription,
};
use triomphe::Arc as TArc;

enum Change {
    Added,
    Modified,
    Removed,
}

impl Platform {
    /// register a singleton instance directly with the platform
    pub fn register_singleton<T: Send + Sync + 'static>(
        &self,
        instance: Arc<T>,
        props: Props,
    ) -> Registration {
        let instance: ServiceInstance = instance;
        self.do_register(ServiceClass::of::<T>(), ServiceSource::Singleton(instance), props)
    }

    /// register a prototype scoped service: `factory` runs once per
    /// checkout
    pub fn register_prototype<T: Send + Sync + 'static>(
        &self,
        factory: impl Fn() -> Arc<T> + Send + Sync + 'static,
        props: Props,
    ) -> Registration {
        let factory: Arc<dyn Fn() -> ServiceInstance + Send + Sync> =
            Arc::new(move || -> ServiceInstance { factory() });
        self.do_register(ServiceClass::of::<T>(), ServiceSource::Prototype(factory), props)
    }

    /// current checkout count of a service, for inspection
    pub fn checkouts(&self, id: ServiceId) -> usize {
        self.0.lock().services.get(&id).map(|r| r.checkouts).unwrap_or(0)
    }

    pub(crate) fn do_register(
        &self,
        class: ServiceClass,
        source: ServiceSource,
        mut props: Props,
    ) -> Registration {
        let id = ServiceId::new();
        props.insert("objectclass", class.name().clone());
        props.insert("service.id", id.inner() as i64);
        let props = TArc::new(props);
        let reference = ServiceRef::new(id, class.clone(), props.clone());
        let notify: Vec<Arc<dyn ServiceEvents>> = {
            let mut st = self.0.lock();
            st.services.insert(id, ServiceRecord { class, source, props, checkouts: 0 });
            st.service_trackers
                .values_mut()
                .filter(|t| t.query.matches(reference.class(), reference.props()))
                .map(|t| {
                    t.matched.insert(id);
                    Arc::clone(&t.events)
                })
                .collect()
        };
        debug!("registered {reference:?}");
        for events in notify {
            events.adding(&reference)
        }
        Registration::new(Arc::new(RegistrationImpl {
            platform: self.clone(),
            id,
            last: Mutex::new(reference),
        }))
    }

    pub(crate) fn set_service_properties(
        &self,
        id: ServiceId,
        mut props: Props,
    ) -> Result<ServiceRef> {
        let (reference, notify) = {
            let mut st = self.0.lock();
            let rec = match st.services.get_mut(&id) {
                Some(rec) => rec,
                None => bail!("service {id:?} is not registered"),
            };
            props.insert("objectclass", rec.class.name().clone());
            props.insert("service.id", id.inner() as i64);
            rec.props = TArc::new(props);
            let reference = ServiceRef::new(id, rec.class.clone(), rec.props.clone());
            let mut notify = Vec::new();
            for t in st.service_trackers.values_mut() {
                let was = t.matched.contains(&id);
                let is = t.query.matches(reference.class(), reference.props());
                match (was, is) {
                    (false, true) => {
                        t.matched.insert(id);
                        notify.push((Arc::clone(&t.events), Change::Added))
                    }
                    (true, true) => notify.push((Arc::clone(&t.events), Change::Modified)),
                    (true, false) => {
                        t.matched.remove(&id);
                        notify.push((Arc::clone(&t.events), Change::Removed))
                    }
                    (false, false) => (),
                }
            }
            (reference, notify)
        };
        for (events, change) in notify {
            match change {
                Change::Added => events.adding(&reference),
                Change::Modified => events.modified(&reference),
                Change::Removed => events.removed(&reference),
            }
        }
        Ok(reference)
    }

    pub(crate) fn unregister_service(&self, id: ServiceId) -> Result<()> {
        let (reference, notify) = {
            let mut st = self.0.lock();
            let rec = match st.services.shift_remove(&id) {
                Some(rec) => rec,
                None => bail!("service {id:?} is not registered"),
            };
            let reference = ServiceRef::new(id, rec.class, rec.props);
            let notify: Vec<Arc<dyn ServiceEvents>> = st
                .service_trackers
                .values_mut()
                .filter_map(|t| t.matched.remove(&id).then(|| Arc::clone(&t.events)))
                .collect();
            (reference, notify)
        };
        debug!("unregistered {reference:?}");
        for events in notify {
            events.removed(&reference)
        }
        Ok(())
    }

    pub(crate) fn open_service_tracker(
        &self,
        query: ServiceQuery,
        events: Arc<dyn ServiceEvents>,
    ) -> Box<dyn Subscription> {
        let id = WatcherId::new();
        let initial: Vec<ServiceRef> = {
            let mut st = self.0.lock();
            let mut matched = FxHashSet::default();
            let initial: Vec<ServiceRef> = st
                .services
                .iter()
                .filter(|(_, rec)| query.matches(&rec.class, &rec.props))
                .map(|(sid, rec)| {
                    matched.insert(*sid);
                    ServiceRef::new(*sid, rec.class.clone(), rec.props.clone())
                })
                .collect();
            let record =
                ServiceTrackerRecord { query, events: Arc::clone(&events), matched };
            st.service_trackers.insert(id, record);
            initial
        };
        debug!("service tracker {id:?} opened with {} matches", initial.len());
        for reference in &initial {
            events.adding(reference)
        }
        Box::new(ServiceTrackerSub { platform: self.clone(), id })
    }

    pub(crate) fn close_service_tracker(&self, id: WatcherId) {
        let closing = {
            let mut st = self.0.lock();
            st.service_trackers.shift_remove(&id).map(|t| {
                let refs: Vec<ServiceRef> = st
                    .services
                    .iter()
                    .filter(|(sid, _)| t.matched.contains(sid))
                    .map(|(sid, rec)| {
                        ServiceRef::new(*sid, rec.class.clone(), rec.props.clone())
                    })
                    .collect();
                (t.events, refs)
            })
        };
        if let Some((events, refs)) = closing {
            debug!("service tracker {id:?} closed, withdrawing {}", refs.len());
            for reference in &refs {
                events.removed(reference)
            }
        }
    }

    pub(crate) fn objects_for(&self, reference: &ServiceRef) -> Result<ServiceObjects> {
        if !self.0.lock().services.contains_key(&reference.id()) {
            bail!("service {:?} is not registered", reference.id())
        }
        Ok(ServiceObjects::new(Arc::new(ObjectsImpl {
            platform: self.clone(),
            reference: reference.clone(),
        })))
    }

    pub(crate) fn checkout(&self, id: ServiceId) -> Option<ServiceInstance> {
        let factory = {
            let mut st = self.0.lock();
            let rec = st.services.get_mut(&id)?;
            rec.checkouts += 1;
            match &rec.source {
                ServiceSource::Singleton(instance) => return Some(Arc::clone(instance)),
                ServiceSource::Prototype(factory) => Arc::clone(factory),
            }
        };
        // prototype factories run user code, keep them outside the lock
        Some(factory())
    }

    pub(crate) fn checkin(&self, id: ServiceId) {
        let mut st = self.0.lock();
        if let Some(rec) = st.services.get_mut(&id) {
            rec.checkouts = rec.checkouts.saturating_sub(1)
        }
    }
}

struct RegistrationImpl {
    platform: Platform,
    id: ServiceId,
    last: Mutex<ServiceRef>,
}

impl RegistrationHandle for RegistrationImpl {
    fn reference(&self) -> ServiceRef {
        self.last.lock().clone()
    }

    fn set_properties(&self, props: Props) -> Result<()> {
        let reference = self.platform.set_service_properties(self.id, props)?;
        *self.last.lock() = reference;
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        self.platform.unregister_service(self.id)
    }
}

struct ObjectsImpl {
    platform: Platform,
    reference: ServiceRef,
}

impl ServiceObjectsHandle for ObjectsImpl {
    fn reference(&self) -> ServiceRef {
        self.reference.clone()
    }

    fn get(&self) -> Option<ServiceInstance> {
        self.platform.checkout(self.reference.id())
    }

    fn unget(&self, _instance: ServiceInstance) {
        self.platform.checkin(self.reference.id())
    }
}

struct ServiceTrackerSub {
    platform: Platform,
    id: WatcherId,
}

impl Subscription for ServiceTrackerSub {
    fn close(&self) {
        self.platform.close_service_tracker(self.id)
    }
}
