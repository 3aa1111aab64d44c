//! The configuration admin: singleton pids and factory instances.
use crate::{ConfigWatcherRecord, FactoryWatcherRecord, Platform, WatcherId};
use arcstr::ArcStr;
use std::sync::Arc;
use trellis_core::{ConfigEvents, FactoryConfigEvents, Props, Subscription};
use triomphe::Arc as TArc;

impl Platform {
    /// store the configuration for `pid` and deliver it to its watchers
    pub fn update_config(&self, pid: impl Into<ArcStr>, props: Props) {
        let pid = pid.into();
        let mut props = props;
        props.insert("service.pid", pid.clone());
        let dict = TArc::new(props);
        let notify: Vec<Arc<dyn ConfigEvents>> = {
            let mut st = self.0.lock();
            st.configs.insert(pid.clone(), dict.clone());
            st.config_watchers
                .values()
                .filter(|w| w.pid == pid)
                .map(|w| Arc::clone(&w.events))
                .collect()
        };
        for events in notify {
            events.updated(Some(dict.clone()))
        }
    }

    /// delete the configuration for `pid`; watchers observe `None`
    pub fn remove_config(&self, pid: &str) {
        let notify: Vec<Arc<dyn ConfigEvents>> = {
            let mut st = self.0.lock();
            match st.configs.shift_remove(pid) {
                None => Vec::new(),
                Some(_) => st
                    .config_watchers
                    .values()
                    .filter(|w| w.pid.as_str() == pid)
                    .map(|w| Arc::clone(&w.events))
                    .collect(),
            }
        };
        for events in notify {
            events.updated(None)
        }
    }

    /// store a factory configuration instance and deliver it
    pub fn update_factory_config(
        &self,
        factory_pid: impl Into<ArcStr>,
        instance_pid: impl Into<ArcStr>,
        props: Props,
    ) {
        let factory_pid = factory_pid.into();
        let instance_pid = instance_pid.into();
        let mut props = props;
        props.insert("service.factorypid", factory_pid.clone());
        props.insert("service.pid", instance_pid.clone());
        let dict = TArc::new(props);
        let notify: Vec<Arc<dyn FactoryConfigEvents>> = {
            let mut st = self.0.lock();
            st.factory_configs
                .entry(factory_pid.clone())
                .or_default()
                .insert(instance_pid.clone(), dict.clone());
            st.factory_watchers
                .values()
                .filter(|w| w.factory_pid == factory_pid)
                .map(|w| Arc::clone(&w.events))
                .collect()
        };
        for events in notify {
            events.updated(&instance_pid, &dict)
        }
    }

    /// delete a factory configuration instance
    pub fn remove_factory_config(&self, factory_pid: &str, instance_pid: &str) {
        let notify: Vec<Arc<dyn FactoryConfigEvents>> = {
            let mut st = self.0.lock();
            let gone = st
                .factory_configs
                .get_mut(factory_pid)
                .and_then(|m| m.shift_remove(instance_pid))
                .is_some();
            if gone {
                st.factory_watchers
                    .values()
                    .filter(|w| w.factory_pid.as_str() == factory_pid)
                    .map(|w| Arc::clone(&w.events))
                    .collect()
            } else {
                Vec::new()
            }
        };
        let pid = ArcStr::from(instance_pid);
        for events in notify {
            events.deleted(&pid)
        }
    }

    pub(crate) fn open_config_watch(
        &self,
        pid: ArcStr,
        events: Arc<dyn ConfigEvents>,
    ) -> Box<dyn Subscription> {
        let id = WatcherId::new();
        let current = {
            let mut st = self.0.lock();
            let current = st.configs.get(&pid).cloned();
            st.config_watchers
                .insert(id, ConfigWatcherRecord { pid, events: Arc::clone(&events) });
            current
        };
        if let Some(dict) = current {
            events.updated(Some(dict))
        }
        Box::new(ConfigWatchSub { platform: self.clone(), id })
    }

    pub(crate) fn close_config_watch(&self, id: WatcherId) {
        self.0.lock().config_watchers.shift_remove(&id);
    }

    pub(crate) fn open_factory_watch(
        &self,
        factory_pid: ArcStr,
        events: Arc<dyn FactoryConfigEvents>,
    ) -> Box<dyn Subscription> {
        let id = WatcherId::new();
        let current: Vec<(ArcStr, TArc<Props>)> = {
            let mut st = self.0.lock();
            let current = st
                .factory_configs
                .get(&factory_pid)
                .map(|m| m.iter().map(|(pid, dict)| (pid.clone(), dict.clone())).collect())
                .unwrap_or_default();
            st.factory_watchers
                .insert(id, FactoryWatcherRecord { factory_pid, events: Arc::clone(&events) });
            current
        };
        for (pid, dict) in &current {
            events.updated(pid, dict)
        }
        Box::new(FactoryWatchSub { platform: self.clone(), id })
    }

    pub(crate) fn close_factory_watch(&self, id: WatcherId) {
        self.0.lock().factory_watchers.shift_remove(&id);
    }
}

struct ConfigWatchSub {
    platform: Platform,
    id: WatcherId,
}

impl Subscription for ConfigWatchSub {
    fn close(&self) {
        self.platform.close_config_watch(self.id)
    }
}

struct FactoryWatchSub {
    platform: Platform,
    id: WatcherId,
}

impl Subscription for FactoryWatchSub {
    fn close(&self) {
        self.platform.close_factory_watch(self.id)
    }
}
