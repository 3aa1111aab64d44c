use super::{init, Recorder};
use trellis_core::{bundles, BundleState, Program};

#[test]
fn bundle_trackers_observe_mask_transitions() {
    let platform = init();
    let ctx = platform.context();
    let a = platform.install_bundle("a");
    platform.set_bundle_state(a, BundleState::Active).unwrap();
    let ex =
        bundles(BundleState::Starting | BundleState::Active).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    // `a` is already within the mask
    assert_eq!(adds.len(), 1);
    // a transition within the mask is a remove then an add with a
    // fresh identity
    platform.set_bundle_state(a, BundleState::Starting).unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[0]]);
    assert_eq!(adds.len(), 2);
    assert_ne!(adds.ids()[1], adds.ids()[0]);
    // leaving the mask withdraws
    platform.set_bundle_state(a, BundleState::Resolved).unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[0], adds.ids()[1]]);
    // and entering it again is a fresh token
    platform.set_bundle_state(a, BundleState::Active).unwrap();
    assert_eq!(adds.len(), 3);
    ex.close();
}

#[test]
fn once_admits_one_bundle_and_never_reacts_again() {
    let platform = init();
    let ctx = platform.context();
    let x = platform.install_bundle("x");
    platform.set_bundle_state(x, BundleState::Active).unwrap();
    let y = platform.install_bundle("y");
    platform.set_bundle_state(y, BundleState::Active).unwrap();
    let p = bundles(BundleState::Active.into())
        .once()
        .flat_map(|b| Program::just(b.id()));
    let ex = p.execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    // the chosen bundle is the first in enumeration order
    assert_eq!(adds.values(), vec![x]);
    // later activations are never admitted
    let z = platform.install_bundle("z");
    platform.set_bundle_state(z, BundleState::Active).unwrap();
    let w = platform.install_bundle("w");
    platform.set_bundle_state(w, BundleState::Active).unwrap();
    assert_eq!(adds.values(), vec![x]);
    // stopping the chosen bundle yields no removal
    platform.set_bundle_state(x, BundleState::Stopping).unwrap();
    assert_eq!(rems.len(), 0);
    ex.close();
    assert_eq!(adds.len(), 1);
    assert_eq!(rems.len(), 0);
}

#[test]
fn uninstalling_withdraws_tracked_bundles() {
    let platform = init();
    let ctx = platform.context();
    let a = platform.install_bundle("a");
    let ex = bundles(BundleState::Installed.into()).execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    assert_eq!(adds.len(), 1);
    platform.uninstall_bundle(a).unwrap();
    assert_eq!(rems.ids(), vec![adds.ids()[0]]);
    ex.close();
}
