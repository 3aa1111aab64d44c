//! Multi valued programs and the bundle registry view.
use super::{cascade, DynK, Execution, Program};
use crate::{
    host::{BundleEvents, BundleId, BundleInfo, BundleState, Context, Subscription},
    pipe::Pipe,
    token::Token,
};
use enumflags2::BitFlags;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A program whose source is a registry view that naturally emits many
/// concurrent tokens.
///
/// It derefs to the underlying [`Program`], so every ordinary
/// combinator applies; `flat_map` is overridden with the integrated
/// cascade, whose removal path is the inner close alone, with no
/// announcement on the output removed channel.
pub struct MultiProgram<T> {
    program: Program<T>,
}

impl<T> Clone for MultiProgram<T> {
    fn clone(&self) -> Self {
        Self { program: self.program.clone() }
    }
}

impl<T> Deref for MultiProgram<T> {
    type Target = Program<T>;

    fn deref(&self) -> &Program<T> {
        &self.program
    }
}

impl<T: Clone + Send + Sync + 'static> MultiProgram<T> {
    pub fn new(program: Program<T>) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Program<T> {
        &self.program
    }

    /// the dependency cascade of [`Program::flat_map`], integrated with
    /// the multi valued source: a departing outer token closes its
    /// inner execution and emits nothing
    pub fn flat_map<U: Clone + Send + Sync + 'static>(
        &self,
        k: impl Fn(&T) -> Program<U> + Send + Sync + 'static,
    ) -> Program<U> {
        let p = self.program.clone();
        let k: DynK<T, U> = Arc::new(k);
        Program::new(move |ctx| cascade(&p, &k, ctx, false))
    }

    /// restrict to the first ever emission. the one shot slot is never
    /// reset, so the departure of the chosen token is invisible
    /// downstream and no later token is ever admitted.
    pub fn once(&self) -> Program<T> {
        let p = self.program.clone();
        Program::new(move |ctx| {
            let taken = Arc::new(AtomicBool::new(false));
            let k: DynK<T, T> = Arc::new(move |v: &T| {
                if taken.swap(true, Ordering::AcqRel) {
                    Program::nothing()
                } else {
                    Program::just(v.clone())
                }
            });
            cascade(&p, &k, ctx, false)
        })
    }
}

struct BundleTracker {
    added: Pipe<BundleInfo>,
    removed: Pipe<BundleInfo>,
    tracked: Mutex<FxHashMap<BundleId, Token<BundleInfo>>>,
}

impl BundleEvents for BundleTracker {
    fn adding(&self, bundle: &BundleInfo) {
        let t = Token::new(bundle.clone());
        self.tracked.lock().insert(bundle.id(), t.clone());
        self.added.emit(&t)
    }

    fn modified(&self, bundle: &BundleInfo) {
        let old = self.tracked.lock().remove(&bundle.id());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
        self.adding(bundle)
    }

    fn removed(&self, bundle: &BundleInfo) {
        let old = self.tracked.lock().remove(&bundle.id());
        if let Some(old) = old {
            self.removed.emit(&old)
        }
    }
}

/// track every bundle whose state is within `mask`: a token per bundle
/// currently matching and per transition into the mask, a removal per
/// transition out. a transition within the mask is a remove followed by
/// an add with a fresh identity.
pub fn bundles(mask: BitFlags<BundleState>) -> MultiProgram<BundleInfo> {
    MultiProgram::new(Program::new(move |ctx: &Context| {
        let added = Pipe::new();
        let removed = Pipe::new();
        let events = Arc::new(BundleTracker {
            added: added.clone(),
            removed: removed.clone(),
            tracked: Mutex::new(FxHashMap::default()),
        });
        let slot: Arc<Mutex<Option<Box<dyn Subscription>>>> = Arc::new(Mutex::new(None));
        let start: super::StartFn = {
            let ctx = ctx.clone();
            let slot = Arc::clone(&slot);
            Arc::new(move || {
                let sub = ctx.track_bundles(mask, events.clone())?;
                *slot.lock() = Some(sub);
                Ok(())
            })
        };
        let close: super::CloseFn = Arc::new(move || {
            if let Some(sub) = slot.lock().take() {
                sub.close()
            }
        });
        Ok(Execution::new(added, removed, start, close))
    }))
}
