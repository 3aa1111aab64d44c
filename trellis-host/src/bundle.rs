//! The bundle lifecycle table and its mask keyed trackers.
use crate::{BundleRecord, BundleTrackerRecord, Platform, WatcherId};
use anyhow::{bail, Result};
use arcstr::ArcStr;
use enumflags2::BitFlags;
use fxhash::FxHashSet;
use log::debug;
use std::sync::Arc;
use trellis_core::{BundleEvents, BundleId, BundleInfo, BundleState, Subscription};

enum Change {
    Added,
    Modified,
    Removed,
}

impl Platform {
    /// install a bundle; it starts out in the `Installed` state
    pub fn install_bundle(&self, name: impl Into<ArcStr>) -> BundleId {
        let id = BundleId::new();
        let name = name.into();
        let info = BundleInfo::new(id, name.clone(), BundleState::Installed);
        let notify: Vec<Arc<dyn BundleEvents>> = {
            let mut st = self.0.lock();
            st.bundles.insert(id, BundleRecord { name, state: BundleState::Installed });
            st.bundle_trackers
                .values_mut()
                .filter(|t| t.mask.contains(BundleState::Installed))
                .map(|t| {
                    t.matched.insert(id);
                    Arc::clone(&t.events)
                })
                .collect()
        };
        debug!("installed bundle {info:?}");
        for events in notify {
            events.adding(&info)
        }
        id
    }

    /// drive a bundle to `state`, notifying every tracker that observes
    /// the transition
    pub fn set_bundle_state(&self, id: BundleId, state: BundleState) -> Result<()> {
        let (info, notify) = {
            let mut st = self.0.lock();
            let rec = match st.bundles.get_mut(&id) {
                Some(rec) => rec,
                None => bail!("bundle {id:?} is not installed"),
            };
            rec.state = state;
            let info = BundleInfo::new(id, rec.name.clone(), state);
            let mut notify = Vec::new();
            for t in st.bundle_trackers.values_mut() {
                let was = t.matched.contains(&id);
                let is = t.mask.contains(state);
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
            (info, notify)
        };
        for (events, change) in notify {
            match change {
                Change::Added => events.adding(&info),
                Change::Modified => events.modified(&info),
                Change::Removed => events.removed(&info),
            }
        }
        Ok(())
    }

    /// remove a bundle from the platform entirely
    pub fn uninstall_bundle(&self, id: BundleId) -> Result<()> {
        let (info, notify) = {
            let mut st = self.0.lock();
            let rec = match st.bundles.shift_remove(&id) {
                Some(rec) => rec,
                None => bail!("bundle {id:?} is not installed"),
            };
            let info = BundleInfo::new(id, rec.name, BundleState::Uninstalled);
            let notify: Vec<Arc<dyn BundleEvents>> = st
                .bundle_trackers
                .values_mut()
                .filter_map(|t| t.matched.remove(&id).then(|| Arc::clone(&t.events)))
                .collect();
            (info, notify)
        };
        for events in notify {
            events.removed(&info)
        }
        Ok(())
    }

    pub(crate) fn open_bundle_tracker(
        &self,
        mask: BitFlags<BundleState>,
        events: Arc<dyn BundleEvents>,
    ) -> Box<dyn Subscription> {
        let id = WatcherId::new();
        let initial: Vec<BundleInfo> = {
            let mut st = self.0.lock();
            let mut matched = FxHashSet::default();
            let initial: Vec<BundleInfo> = st
                .bundles
                .iter()
                .filter(|(_, rec)| mask.contains(rec.state))
                .map(|(bid, rec)| {
                    matched.insert(*bid);
                    BundleInfo::new(*bid, rec.name.clone(), rec.state)
                })
                .collect();
            let record = BundleTrackerRecord { mask, events: Arc::clone(&events), matched };
            st.bundle_trackers.insert(id, record);
            initial
        };
        debug!("bundle tracker {id:?} opened with {} matches", initial.len());
        for info in &initial {
            events.adding(info)
        }
        Box::new(BundleTrackerSub { platform: self.clone(), id })
    }

    pub(crate) fn close_bundle_tracker(&self, id: WatcherId) {
        let closing = {
            let mut st = self.0.lock();
            st.bundle_trackers.shift_remove(&id).map(|t| {
                let infos: Vec<BundleInfo> = st
                    .bundles
                    .iter()
                    .filter(|(bid, _)| t.matched.contains(bid))
                    .map(|(bid, rec)| BundleInfo::new(*bid, rec.name.clone(), rec.state))
                    .collect();
                (t.events, infos)
            })
        };
        if let Some((events, infos)) = closing {
            for info in &infos {
                events.removed(info)
            }
        }
    }
}

struct BundleTrackerSub {
    platform: Platform,
    id: WatcherId,
}

impl Subscription for BundleTrackerSub {
    fn close(&self) {
        self.platform.close_bundle_tracker(self.id)
    }
}
