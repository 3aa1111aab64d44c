use super::{init, Recorder};
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{
    props, prototypes, register, service_references, services, PropValue, Program, Props,
};

#[derive(Debug)]
struct Echo {
    id: i64,
}

#[derive(Debug)]
struct Derived {
    source: i64,
}

#[test]
fn cascade_follows_service_arrivals_and_departures() {
    let platform = init();
    let ctx = platform.context();
    let p = services::<Echo>(None).flat_map(|s| Program::just(s.id));
    let ex = p.execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    let ra = platform.register_singleton(Arc::new(Echo { id: 1 }), Props::new());
    assert_eq!(adds.values(), vec![1]);
    let _rb = platform.register_singleton(Arc::new(Echo { id: 2 }), Props::new());
    assert_eq!(adds.values(), vec![1, 2]);
    ra.unregister().unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[0]]);
    ex.close();
    // the tracker is gone: a further registration is invisible
    platform.register_singleton(Arc::new(Echo { id: 3 }), Props::new());
    assert_eq!(adds.len(), 2);
    assert_eq!(rems.len(), 1);
}

#[test]
fn modification_is_remove_then_add_with_a_fresh_identity() {
    let platform = init();
    let ctx = platform.context();
    let ex = service_references::<Echo>(None).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    let reg = platform.register_singleton(Arc::new(Echo { id: 1 }), props! { "rank" => 1 });
    assert_eq!(adds.len(), 1);
    reg.set_properties(props! { "rank" => 2 }).unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[0]]);
    assert_eq!(adds.len(), 2);
    assert_ne!(adds.ids()[1], adds.ids()[0]);
    let current = adds.tokens()[1].clone();
    assert_eq!(current.value().props().get("rank"), Some(&PropValue::Int(2)));
}

#[test]
fn trackers_respect_filters_across_property_changes() {
    let platform = init();
    let ctx = platform.context();
    let ex = service_references::<Echo>(Some("(rank>=2)")).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    let low = platform.register_singleton(Arc::new(Echo { id: 1 }), props! { "rank" => 1 });
    assert_eq!(adds.len(), 0);
    platform.register_singleton(Arc::new(Echo { id: 2 }), props! { "rank" => 3 });
    assert_eq!(adds.len(), 1);
    // crossing the filter boundary in either direction tracks and
    // untracks
    low.set_properties(props! { "rank" => 5 }).unwrap();
    assert_eq!(adds.len(), 2);
    low.set_properties(props! { "rank" => 0 }).unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[1]]);
}

#[test]
fn services_check_instances_out_and_return_them() {
    let platform = init();
    let ctx = platform.context();
    let ex = services::<Echo>(None).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    ex.start().unwrap();
    let reg = platform.register_singleton(Arc::new(Echo { id: 7 }), Props::new());
    let sid = reg.reference().id();
    assert_eq!(adds.values().iter().map(|s| s.id).collect::<Vec<_>>(), vec![7]);
    assert_eq!(platform.checkouts(sid), 1);
    // closing the tracker withdraws the token and returns the instance
    ex.close();
    assert_eq!(platform.checkouts(sid), 0);
}

#[test]
fn register_primitive_registers_at_execute_and_unregisters_at_close() {
    let platform = init();
    let ctx = platform.context();
    let obs = service_references::<Echo>(None).execute(&ctx).unwrap();
    let obs_adds = Recorder::watch(obs.added());
    let obs_rems = Recorder::watch(obs.removed());
    obs.start().unwrap();
    let p = register(Arc::new(Echo { id: 9 }), Props::new());
    let ex = p.execute(&ctx).unwrap();
    // registration happens when the operation runs, not at start
    assert_eq!(obs_adds.len(), 1);
    let adds = Recorder::watch(ex.added());
    ex.start().unwrap();
    assert_eq!(adds.len(), 1);
    let handle = adds.tokens()[0].value().clone();
    assert_eq!(
        handle.reference().props().get("objectclass").map(|v| v.to_string()),
        Some(std::any::type_name::<Echo>().to_string())
    );
    ex.close();
    assert_eq!(obs_rems.len(), 1);
    // the second close swallows the unregister failure
    ex.close();
    assert_eq!(obs_rems.len(), 1);
}

#[test]
fn a_dependent_program_may_register_services_reentrantly() {
    let platform = init();
    let ctx = platform.context();
    let obs = service_references::<Derived>(None).execute(&ctx).unwrap();
    let obs_adds = Recorder::watch(obs.added());
    let obs_rems = Recorder::watch(obs.removed());
    obs.start().unwrap();
    let p = services::<Echo>(None)
        .flat_map(|s| register(Arc::new(Derived { source: s.id }), Props::new()));
    let ex = p.execute(&ctx).unwrap();
    ex.start().unwrap();
    let reg = platform.register_singleton(Arc::new(Echo { id: 4 }), Props::new());
    // the derived service was registered from inside the dispatch of
    // the echo registration
    assert_eq!(obs_adds.len(), 1);
    reg.unregister().unwrap();
    assert_eq!(obs_rems.len(), 1);
    ex.close();
}

#[test]
fn prototypes_hand_out_fresh_instances_per_checkout() {
    let platform = init();
    let ctx = platform.context();
    let next = Arc::new(Mutex::new(0));
    let reg = {
        let next = Arc::clone(&next);
        platform.register_prototype::<Echo>(
            move || {
                let mut n = next.lock();
                *n += 1;
                Arc::new(Echo { id: *n })
            },
            Props::new(),
        )
    };
    let sid = reg.reference().id();
    let ex = prototypes::<Echo>(None).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    ex.start().unwrap();
    assert_eq!(adds.len(), 1);
    let proto = adds.tokens()[0].value().clone();
    let a = proto.get().unwrap();
    let b = proto.get().unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(platform.checkouts(sid), 2);
    proto.unget(a);
    assert_eq!(platform.checkouts(sid), 1);
    // the prototype layer performs no checkout of its own
    proto.unget(b);
    ex.close();
    assert_eq!(platform.checkouts(sid), 0);
}

#[test]
fn services_present_before_start_are_delivered_at_start() {
    let platform = init();
    let ctx = platform.context();
    platform.register_singleton(Arc::new(Echo { id: 1 }), Props::new());
    platform.register_singleton(Arc::new(Echo { id: 2 }), Props::new());
    let ex = services::<Echo>(None).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    ex.start().unwrap();
    // registration order, per the platform's enumeration contract
    assert_eq!(adds.values().iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
    ex.close();
}
