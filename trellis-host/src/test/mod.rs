use crate::Platform;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{Pipe, Token, TokenId};

mod bundles;
mod config;
mod services;

pub(crate) fn init() -> Platform {
    let _ = env_logger::try_init();
    Platform::new()
}

/// records every token a pipe emits, in order
pub(crate) struct Recorder<T>(Arc<Mutex<Vec<Token<T>>>>);

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub(crate) fn watch(pipe: &Pipe<T>) -> Self {
        let log: Arc<Mutex<Vec<Token<T>>>> = Arc::new(Mutex::new(Vec::new()));
        let tx = Arc::clone(&log);
        pipe.on_event(move |t| tx.lock().push(t.clone()));
        Recorder(log)
    }

    pub(crate) fn tokens(&self) -> Vec<Token<T>> {
        self.0.lock().clone()
    }

    pub(crate) fn values(&self) -> Vec<T> {
        self.0.lock().iter().map(|t| t.value().clone()).collect()
    }

    pub(crate) fn ids(&self) -> Vec<TokenId> {
        self.0.lock().iter().map(|t| t.id()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }
}
