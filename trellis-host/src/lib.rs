//! An in memory service platform for trellis programs.
//!
//! [`Platform`] implements the full host contract of `trellis-core`: a
//! service registry with filter scoped trackers and checkout
//! accounting, a bundle lifecycle table, and a configuration admin for
//! singleton and factory configurations. All state sits behind one
//! mutex; every mutation updates the state under the lock, collects
//! the watcher callbacks it affects, and dispatches them after the
//! lock is released, so a callback is free to re-enter the platform
//! (a dependent program registering a service from inside a cascade
//! must not deadlock).
use arcstr::ArcStr;
use enumflags2::BitFlags;
use fxhash::FxHashSet;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{
    atomic_id, BundleEvents, BundleId, BundleState, ConfigEvents, Context,
    FactoryConfigEvents, Host, Props, Registration, ServiceClass, ServiceEvents,
    ServiceId, ServiceObjects, ServiceQuery, ServiceRef, ServiceSource, Subscription,
};
use triomphe::Arc as TArc;

mod bundle;
mod config;
mod service;
#[cfg(test)]
mod test;

atomic_id!(WatcherId);

pub(crate) struct ServiceRecord {
    pub(crate) class: ServiceClass,
    pub(crate) source: ServiceSource,
    pub(crate) props: TArc<Props>,
    pub(crate) checkouts: usize,
}

pub(crate) struct ServiceTrackerRecord {
    pub(crate) query: ServiceQuery,
    pub(crate) events: Arc<dyn ServiceEvents>,
    pub(crate) matched: FxHashSet<ServiceId>,
}

pub(crate) struct BundleRecord {
    pub(crate) name: ArcStr,
    pub(crate) state: BundleState,
}

pub(crate) struct BundleTrackerRecord {
    pub(crate) mask: BitFlags<BundleState>,
    pub(crate) events: Arc<dyn BundleEvents>,
    pub(crate) matched: FxHashSet<BundleId>,
}

pub(crate) struct ConfigWatcherRecord {
    pub(crate) pid: ArcStr,
    pub(crate) events: Arc<dyn ConfigEvents>,
}

pub(crate) struct FactoryWatcherRecord {
    pub(crate) factory_pid: ArcStr,
    pub(crate) events: Arc<dyn FactoryConfigEvents>,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) services: IndexMap<ServiceId, ServiceRecord>,
    pub(crate) service_trackers: IndexMap<WatcherId, ServiceTrackerRecord>,
    pub(crate) bundles: IndexMap<BundleId, BundleRecord>,
    pub(crate) bundle_trackers: IndexMap<WatcherId, BundleTrackerRecord>,
    pub(crate) configs: IndexMap<ArcStr, TArc<Props>>,
    pub(crate) config_watchers: IndexMap<WatcherId, ConfigWatcherRecord>,
    pub(crate) factory_configs: IndexMap<ArcStr, IndexMap<ArcStr, TArc<Props>>>,
    pub(crate) factory_watchers: IndexMap<WatcherId, FactoryWatcherRecord>,
}

/// A self contained in memory service platform.
///
/// Clones share the same state. Trackers and watchers enumerate their
/// targets in registration order, which keeps tests deterministic.
#[derive(Clone, Default)]
pub struct Platform(pub(crate) Arc<Mutex<State>>);

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    /// the host handle programs are executed against
    pub fn context(&self) -> Context {
        Arc::new(self.clone())
    }
}

impl Host for Platform {
    fn register_service(
        &self,
        class: ServiceClass,
        source: ServiceSource,
        props: Props,
    ) -> anyhow::Result<Registration> {
        Ok(self.do_register(class, source, props))
    }

    fn track_services(
        &self,
        query: ServiceQuery,
        events: Arc<dyn ServiceEvents>,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        Ok(self.open_service_tracker(query, events))
    }

    fn service_objects(&self, reference: &ServiceRef) -> anyhow::Result<ServiceObjects> {
        self.objects_for(reference)
    }

    fn track_bundles(
        &self,
        mask: BitFlags<BundleState>,
        events: Arc<dyn BundleEvents>,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        Ok(self.open_bundle_tracker(mask, events))
    }

    fn watch_configuration(
        &self,
        pid: ArcStr,
        events: Arc<dyn ConfigEvents>,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        Ok(self.open_config_watch(pid, events))
    }

    fn watch_factory_configurations(
        &self,
        factory_pid: ArcStr,
        events: Arc<dyn FactoryConfigEvents>,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        Ok(self.open_factory_watch(factory_pid, events))
    }
}
