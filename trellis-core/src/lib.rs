//! Declarative dependency-tracking combinators for dynamic service
//! platforms.
//!
//! A [`Program`] describes a reactive computation over a live service
//! registry: named components appear and disappear at arbitrary times,
//! and derived computations must come up when all of their dependencies
//! are simultaneously present and tear down precisely when any of them
//! departs. Programs are plain descriptions; executing one against a
//! host [`Context`] materializes an [`Execution`], a pair of add/remove
//! token channels plus a starter and a closer. The [`Program::flat_map`]
//! cascade materializes an inner program per dependency and closes it
//! when the dependency goes away.
//!
//! The library owns no threads. Every event is delivered synchronously
//! on the stack of whichever host thread triggered it; see the channel
//! documentation in [`pipe`] for the ordering contract.
#[macro_use]
extern crate combine;

pub mod filter;
pub mod host;
pub mod pipe;
pub mod program;
pub mod token;
pub mod value;

pub use filter::Filter;
pub use host::{
    BundleEvents, BundleId, BundleInfo, BundleState, ConfigEvents, Context,
    FactoryConfigEvents, Host, Prototype, Registration, RegistrationHandle,
    ServiceClass, ServiceEvents, ServiceId, ServiceInstance, ServiceObjects,
    ServiceObjectsHandle, ServiceQuery, ServiceRef, ServiceSource, Subscription,
};
pub use pipe::Pipe;
pub use program::{
    bundles, change_context, close, configuration, configurations, on_close,
    prototypes, register, register_prototype, run, service_references, services,
    Execution, MultiProgram, Program,
};
pub use token::{Token, TokenId};
pub use value::{PropValue, Props};

/// define an opaque id type allocated from a per type atomic counter
#[macro_export]
macro_rules! atomic_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn new() -> Self {
                use ::std::sync::atomic::{AtomicU64, Ordering};
                static NEXT: AtomicU64 = AtomicU64::new(0);
                $name(NEXT.fetch_add(1, Ordering::Relaxed))
            }

            pub fn inner(&self) -> u64 {
                self.0
            }
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// build a [`Props`] dictionary from literal key value pairs
#[macro_export]
macro_rules! props {
    () => { $crate::Props::new() };
    ($($k:literal => $v:expr),+ $(,)?) => {{
        let mut p = $crate::Props::new();
        $(p.insert($k, $v);)+
        p
    }};
}
