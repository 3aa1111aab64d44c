//! Programs, their combinators, and the dependency cascade.
//!
//! A [`Program`] is an immutable description carrying an operation from
//! a host [`Context`] to an [`Execution`]. Nothing touches the registry
//! until an execution's `start` runs; `close` releases everything
//! acquired since. The driver [`run`] executes a whole program tree and
//! guards the root close so it is single shot.
use crate::{
    host::Context,
    pipe::Pipe,
    token::{Token, TokenId},
};
use anyhow::Result;
use fxhash::FxHashMap;
use log::error;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

mod bundle;
mod config;
mod service;

pub use bundle::{bundles, MultiProgram};
pub use config::{configuration, configurations};
pub use service::{prototypes, register, register_prototype, service_references, services};

pub type StartFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;
pub type CloseFn = Arc<dyn Fn() + Send + Sync>;
type Op<T> = Arc<dyn Fn(&Context) -> Result<Execution<T>> + Send + Sync>;
pub(crate) type DynK<T, U> = Arc<dyn Fn(&T) -> Program<U> + Send + Sync>;

pub(crate) fn noop_start() -> StartFn {
    Arc::new(|| Ok(()))
}

pub(crate) fn noop_close() -> CloseFn {
    Arc::new(|| ())
}

/// The materialized handle of an executing program: the add and remove
/// channels, a starter, and a closer.
///
/// An execution is owned by whoever ran the program's operation. After
/// `close` has run no further token is emitted on `added`; every
/// identity emitted on `removed` was previously emitted on `added`, at
/// most once, and in that order. A host side modification shows up as a
/// remove of the old token followed by an add with a fresh identity.
pub struct Execution<T> {
    added: Pipe<T>,
    removed: Pipe<T>,
    start: StartFn,
    close: CloseFn,
}

impl<T> Clone for Execution<T> {
    fn clone(&self) -> Self {
        Self {
            added: self.added.clone(),
            removed: self.removed.clone(),
            start: Arc::clone(&self.start),
            close: Arc::clone(&self.close),
        }
    }
}

impl<T: 'static> Execution<T> {
    pub fn new(added: Pipe<T>, removed: Pipe<T>, start: StartFn, close: CloseFn) -> Self {
        Self { added, removed, start, close }
    }

    pub fn added(&self) -> &Pipe<T> {
        &self.added
    }

    pub fn removed(&self) -> &Pipe<T> {
        &self.removed
    }

    /// wire the execution to the host and begin emission
    pub fn start(&self) -> Result<()> {
        (self.start)()
    }

    /// release every resource acquired since start
    pub fn close(&self) {
        (self.close)()
    }

    pub fn start_fn(&self) -> StartFn {
        Arc::clone(&self.start)
    }

    pub fn close_fn(&self) -> CloseFn {
        Arc::clone(&self.close)
    }
}

/// A description of a reactive computation, evaluated only when
/// executed against a host context.
pub struct Program<T> {
    op: Op<T>,
}

impl<T> Clone for Program<T> {
    fn clone(&self) -> Self {
        Self { op: Arc::clone(&self.op) }
    }
}

impl<T: Clone + Send + Sync + 'static> Program<T> {
    /// build a program from its operation
    pub fn new(op: impl Fn(&Context) -> Result<Execution<T>> + Send + Sync + 'static) -> Self {
        Self { op: Arc::new(op) }
    }

    /// run the operation against `ctx`, materializing an execution.
    /// nothing is emitted until the execution's start runs.
    pub fn execute(&self, ctx: &Context) -> Result<Execution<T>> {
        (self.op)(ctx)
    }

    /// a program that emits `v` once at start and holds no resources
    pub fn just(v: T) -> Self {
        Program::new(move |_| {
            let added = Pipe::new();
            let start: StartFn = {
                let added = added.clone();
                let v = v.clone();
                Arc::new(move || {
                    added.emit(&Token::new(v.clone()));
                    Ok(())
                })
            };
            Ok(Execution::new(added, Pipe::new(), start, noop_close()))
        })
    }

    /// the empty program: never emits, holds nothing
    pub fn nothing() -> Self {
        Program::new(|_| Ok(Execution::new(Pipe::new(), Pipe::new(), noop_start(), noop_close())))
    }

    /// transform every emitted value, preserving token identities on
    /// both channels. start and close are the upstream's.
    pub fn map<U: Clone + Send + Sync + 'static>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Program<U> {
        let p = self.clone();
        let f = Arc::new(f);
        Program::new(move |ctx| {
            let ex = p.execute(ctx)?;
            let added = {
                let f = Arc::clone(&f);
                ex.added().subscribe(move |t| t.map(|v| f(v)))
            };
            let removed = {
                let f = Arc::clone(&f);
                ex.removed().subscribe(move |t| t.map(|v| f(v)))
            };
            Ok(Execution::new(added, removed, ex.start_fn(), ex.close_fn()))
        })
    }

    /// materialize `k(v)` for every dependency `v` this program emits,
    /// and close it when the dependency departs. inner adds flow to the
    /// output unchanged; a departure announces the inner token it
    /// withdraws on the output removed channel.
    pub fn flat_map<U: Clone + Send + Sync + 'static>(
        &self,
        k: impl Fn(&T) -> Program<U> + Send + Sync + 'static,
    ) -> Program<U> {
        let p = self.clone();
        let k: DynK<T, U> = Arc::new(k);
        Program::new(move |ctx| cascade(&p, &k, ctx, true))
    }

    /// sequence: run `q` once per emission of this program, ignoring
    /// the emitted value
    pub fn then<U: Clone + Send + Sync + 'static>(&self, q: Program<U>) -> Program<U> {
        self.flat_map(move |_| q.clone())
    }

    /// run `k(v)` per dependency purely for its effects
    pub fn for_each<U: Clone + Send + Sync + 'static>(
        &self,
        k: impl Fn(&T) -> Program<U> + Send + Sync + 'static,
    ) -> Program<()> {
        self.flat_map(k).map(|_| ())
    }
}

/// one live inner execution of a cascade, keyed by the outer token's
/// identity. `last_added` is the most recent token the inner execution
/// emitted that has not been withdrawn.
struct Tracked<U> {
    execution: Execution<U>,
    last_added: Option<Token<U>>,
}

/// The dependency cascade backing `flat_map`.
///
/// Each outer token materializes `k(value)` against the same context
/// and starts it; the entry lives in an identity keyed table until the
/// outer token departs or the cascade is closed. With
/// `announce_removals` set, a departure emits the withdrawn inner token
/// on the output removed channel before closing the inner execution;
/// residual removed emissions fired once an entry has left the table
/// are dropped in either mode, the departure itself stands for them.
pub(crate) fn cascade<T, U>(
    p: &Program<T>,
    k: &DynK<T, U>,
    ctx: &Context,
    announce_removals: bool,
) -> Result<Execution<U>>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    let added: Pipe<U> = Pipe::new();
    let removed: Pipe<U> = Pipe::new();
    let live: Arc<Mutex<FxHashMap<TokenId, Tracked<U>>>> =
        Arc::new(Mutex::new(FxHashMap::default()));
    let upstream: Arc<Mutex<Option<Execution<T>>>> = Arc::new(Mutex::new(None));
    let start: StartFn = {
        let p = p.clone();
        let k = Arc::clone(k);
        let ctx = ctx.clone();
        let added = added.clone();
        let removed = removed.clone();
        let live = Arc::clone(&live);
        let upstream = Arc::clone(&upstream);
        Arc::new(move || {
            let outer = p.execute(&ctx)?;
            *upstream.lock() = Some(outer.clone());
            outer.added().on_event({
                let k = Arc::clone(&k);
                let ctx = ctx.clone();
                let added = added.clone();
                let removed = removed.clone();
                let live = Arc::clone(&live);
                move |to: &Token<T>| {
                    let inner = k(to.value());
                    let ri = match inner.execute(&ctx) {
                        Ok(ri) => ri,
                        Err(e) => {
                            error!("dependent program failed to materialize: {e:?}");
                            return;
                        }
                    };
                    let key = to.id();
                    live.lock()
                        .insert(key, Tracked { execution: ri.clone(), last_added: None });
                    ri.added().on_event({
                        let added = added.clone();
                        let live = Arc::clone(&live);
                        move |ti: &Token<U>| {
                            if let Some(rec) = live.lock().get_mut(&key) {
                                rec.last_added = Some(ti.clone());
                            }
                            added.emit(ti)
                        }
                    });
                    ri.removed().on_event({
                        let removed = removed.clone();
                        let live = Arc::clone(&live);
                        move |ti: &Token<U>| {
                            let live_entry = {
                                let mut tbl = live.lock();
                                match tbl.get_mut(&key) {
                                    None => false,
                                    Some(rec) => {
                                        if rec.last_added.as_ref().map(|t| t.id())
                                            == Some(ti.id())
                                        {
                                            rec.last_added = None;
                                        }
                                        true
                                    }
                                }
                            };
                            if live_entry {
                                removed.emit(ti)
                            }
                        }
                    });
                    if let Err(e) = ri.start() {
                        error!("dependent program failed to start: {e:?}");
                    }
                }
            });
            outer.removed().on_event({
                let removed = removed.clone();
                let live = Arc::clone(&live);
                move |to: &Token<T>| {
                    let rec = live.lock().remove(&to.id());
                    if let Some(rec) = rec {
                        if announce_removals && let Some(ti) = rec.last_added.as_ref() {
                            removed.emit(ti)
                        }
                        rec.execution.close()
                    }
                }
            });
            outer.start()
        })
    };
    let close: CloseFn = {
        let live = Arc::clone(&live);
        let upstream = Arc::clone(&upstream);
        Arc::new(move || {
            let drained: Vec<Tracked<U>> =
                live.lock().drain().map(|(_, rec)| rec).collect();
            for rec in drained {
                rec.execution.close()
            }
            if let Some(up) = upstream.lock().take() {
                up.close()
            }
        })
    };
    Ok(Execution::new(added, removed, start, close))
}

/// attach a teardown action at a chosen point in a composition. start
/// emits a single unit token; close runs the action.
pub fn on_close(action: impl Fn() + Send + Sync + 'static) -> Program<()> {
    let action = Arc::new(action);
    Program::new(move |_| {
        let added = Pipe::new();
        let start: StartFn = {
            let added = added.clone();
            Arc::new(move || {
                added.emit(&Token::new(()));
                Ok(())
            })
        };
        let close: CloseFn = {
            let action = Arc::clone(&action);
            Arc::new(move || action())
        };
        Ok(Execution::new(added, Pipe::new(), start, close))
    })
}

/// embed `p` so that it always runs against `ctx`, ignoring the context
/// of the enclosing composition
pub fn change_context<T: Clone + Send + Sync + 'static>(
    ctx: Context,
    p: &Program<T>,
) -> Program<T> {
    let p = p.clone();
    Program::new(move |_| p.execute(&ctx))
}

/// execute `p` against `ctx` and start it. the returned execution's
/// close is guarded: only the first invocation performs work.
pub fn run<T: Clone + Send + Sync + 'static>(
    ctx: &Context,
    p: &Program<T>,
) -> Result<Execution<T>> {
    let ex = p.execute(ctx)?;
    let closed = Arc::new(AtomicBool::new(false));
    let inner = ex.close_fn();
    let close: CloseFn = Arc::new(move || {
        if !closed.swap(true, Ordering::AcqRel) {
            inner()
        }
    });
    let ex = Execution::new(ex.added().clone(), ex.removed().clone(), ex.start_fn(), close);
    ex.start()?;
    Ok(ex)
}

/// invoke an execution's close action
pub fn close<T: 'static>(ex: &Execution<T>) {
    ex.close()
}
