//! Configuration primitives: the singleton watch and the factory
//! instance view.
use super::{CloseFn, Execution, Program, StartFn};
use crate::{
    host::{ConfigEvents, Context, FactoryConfigEvents, Subscription},
    pipe::Pipe,
    token::Token,
    value::Props,
};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::{mem, sync::Arc};
use triomphe::Arc as TArc;

struct ConfigWatch {
    added: Pipe<Option<TArc<Props>>>,
    removed: Pipe<Option<TArc<Props>>>,
    dict: Mutex<Option<TArc<Props>>>,
    slot: Mutex<Token<Option<TArc<Props>>>>,
}

impl ConfigEvents for ConfigWatch {
    fn updated(&self, dict: Option<TArc<Props>>) {
        let prior = {
            let mut g = self.dict.lock();
            mem::replace(&mut *g, dict.clone())
        };
        let fresh = Token::new(dict);
        let old = {
            let mut g = self.slot.lock();
            mem::replace(&mut *g, fresh.clone())
        };
        self.removed.emit(&old);
        // the very first delivery withdraws the pre initialized token
        // and announces nothing on added; this mirrors the reference
        // behavior, quirk included
        if prior.is_some() {
            self.added.emit(&fresh)
        }
    }
}

/// watch the configuration dictionary stored under `pid`. every
/// delivery emits the previously held token on removed; added emits
/// the replacement only when a prior dictionary existed.
pub fn configuration(pid: impl Into<arcstr::ArcStr>) -> Program<Option<TArc<Props>>> {
    let pid = pid.into();
    Program::new(move |ctx: &Context| {
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(ConfigWatch {
            added: added.clone(),
            removed: removed.clone(),
            dict: Mutex::new(None),
            slot: Mutex::new(Token::new(None)),
        });
        let slot: Arc<Mutex<Option<Box<dyn Subscription>>>> = Arc::new(Mutex::new(None));
        let start: StartFn = {
            let ctx = ctx.clone();
            let pid = pid.clone();
            let slot = Arc::clone(&slot);
            Arc::new(move || {
                let sub = ctx.watch_configuration(pid.clone(), events.clone())?;
                *slot.lock() = Some(sub);
                Ok(())
            })
        };
        let close: CloseFn = Arc::new(move || {
            if let Some(sub) = slot.lock().take() {
                sub.close()
            }
        });
        Ok(Execution::new(added, removed, start, close))
    })
}

struct FactoryWatch {
    added: Pipe<TArc<Props>>,
    removed: Pipe<TArc<Props>>,
    tracked: Mutex<FxHashMap<arcstr::ArcStr, Token<TArc<Props>>>>,
}

impl FactoryConfigEvents for FactoryWatch {
    fn updated(&self, pid: &arcstr::ArcStr, dict: &TArc<Props>) {
        let fresh = Token::new(dict.clone());
        let old = self.tracked.lock().insert(pid.clone(), fresh.clone());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
        self.added.emit(&fresh)
    }

    fn deleted(&self, pid: &arcstr::ArcStr) {
        let old = self.tracked.lock().remove(pid);
        if let Some(old) = old {
            self.removed.emit(&old)
        }
    }
}

/// track the factory configuration instances of `factory_pid`, one
/// token per instance pid. close detaches the watch and then withdraws
/// every token still held.
pub fn configurations(pid: impl Into<arcstr::ArcStr>) -> Program<TArc<Props>> {
    let factory_pid = pid.into();
    Program::new(move |ctx: &Context| {
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(FactoryWatch {
            added: added.clone(),
            removed: removed.clone(),
            tracked: Mutex::new(FxHashMap::default()),
        });
        let slot: Arc<Mutex<Option<Box<dyn Subscription>>>> = Arc::new(Mutex::new(None));
        let start: StartFn = {
            let ctx = ctx.clone();
            let factory_pid = factory_pid.clone();
            let slot = Arc::clone(&slot);
            let events = Arc::clone(&events);
            Arc::new(move || {
                let sub =
                    ctx.watch_factory_configurations(factory_pid.clone(), events.clone())?;
                *slot.lock() = Some(sub);
                Ok(())
            })
        };
        let close: CloseFn = Arc::new(move || {
            if let Some(sub) = slot.lock().take() {
                sub.close()
            }
            let drained: Vec<Token<TArc<Props>>> = {
                let mut tracked = events.tracked.lock();
                tracked.drain().map(|(_, t)| t).collect()
            };
            for t in drained {
                events.removed.emit(&t)
            }
        });
        Ok(Execution::new(added, removed, start, close))
    })
}
