use crate::token::Token;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

type Listener<T> = Arc<dyn Fn(&Token<T>) + Send + Sync>;

struct Inner<T> {
    listeners: Mutex<SmallVec<[Listener<T>; 2]>>,
}

/// A synchronous broadcast channel of provenance tokens.
///
/// A pipe has no buffer. Emitting a token invokes every listener that
/// was installed before the emission began, in installation order, on
/// the emitter's stack. A listener installed while an emission is in
/// flight sees only later emissions. The pipe itself assumes a single
/// producer; concurrent emissions from different threads are the
/// caller's responsibility to serialize.
pub struct Pipe<T>(Arc<Inner<T>>);

impl<T> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: 'static> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Pipe<T> {
    pub fn new() -> Self {
        Self(Arc::new(Inner { listeners: Mutex::new(SmallVec::new()) }))
    }

    /// deliver a token to every currently installed listener
    pub fn emit(&self, t: &Token<T>) {
        let snapshot = { self.0.listeners.lock().clone() };
        for l in snapshot.iter() {
            l(t)
        }
    }

    /// install a side effecting listener
    pub fn on_event(&self, f: impl Fn(&Token<T>) + Send + Sync + 'static) {
        self.0.listeners.lock().push(Arc::new(f))
    }

    /// install a transforming listener and return the downstream pipe
    /// carrying its output
    pub fn subscribe<U: 'static>(
        &self,
        f: impl Fn(&Token<T>) -> Token<U> + Send + Sync + 'static,
    ) -> Pipe<U> {
        let down = Pipe::new();
        let tx = down.clone();
        self.on_event(move |t| tx.emit(&f(t)));
        down
    }

    /// forward every token unchanged to `to`
    pub fn forward(&self, to: &Pipe<T>) {
        let tx = to.clone();
        self.on_event(move |t| tx.emit(t))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn listeners_run_in_installation_order() {
        let p: Pipe<i64> = Pipe::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            p.on_event(move |_| order.lock().push(tag));
        }
        p.emit(&Token::new(0));
        assert_eq!(&*order.lock(), &["first", "second", "third"]);
    }

    #[test]
    fn listener_installed_during_emission_misses_the_current_event() {
        let p: Pipe<i64> = Pipe::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let p = p.clone();
            let seen = Arc::clone(&seen);
            p.clone().on_event(move |t| {
                let v = *t.value();
                if v == 1 {
                    let seen = Arc::clone(&seen);
                    p.on_event(move |t| seen.lock().push(*t.value()));
                }
            });
        }
        p.emit(&Token::new(1));
        assert!(seen.lock().is_empty());
        p.emit(&Token::new(2));
        assert_eq!(&*seen.lock(), &[2]);
    }

    #[test]
    fn subscribe_preserves_identity() {
        let p: Pipe<i64> = Pipe::new();
        let down = p.subscribe(|t| t.map(|v| v + 1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            down.on_event(move |t| seen.lock().push((t.id(), *t.value())));
        }
        let t = Token::new(41);
        p.emit(&t);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (t.id(), 42));
    }

    #[test]
    fn forward_is_identity() {
        let a: Pipe<&'static str> = Pipe::new();
        let b: Pipe<&'static str> = Pipe::new();
        a.forward(&b);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            b.on_event(move |t| seen.lock().push((t.id(), *t.value())));
        }
        let t = Token::new("x");
        a.emit(&t);
        assert_eq!(&*seen.lock(), &[(t.id(), "x")]);
    }
}
