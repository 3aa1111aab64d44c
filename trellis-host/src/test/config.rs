use super::{init, Recorder};
use fxhash::FxHashSet;
use trellis_core::{configuration, configurations, props, PropValue};

#[test]
fn first_delivery_withdraws_the_preinitialized_token_and_adds_nothing() {
    let platform = init();
    let ctx = platform.context();
    let ex = configuration("my.pid").execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    assert_eq!(adds.len(), 0);
    assert_eq!(rems.len(), 0);
    platform.update_config("my.pid", props! { "a" => 1 });
    assert_eq!(adds.len(), 0);
    assert_eq!(rems.len(), 1);
    assert!(rems.tokens()[0].value().is_none());
    // from the second delivery on, the replacement is announced
    platform.update_config("my.pid", props! { "a" => 2 });
    assert_eq!(adds.len(), 1);
    assert_eq!(rems.len(), 2);
    let current = adds.tokens()[0].clone();
    assert_eq!(
        current.value().as_ref().and_then(|d| d.get("a")).cloned(),
        Some(PropValue::Int(2))
    );
    ex.close();
}

#[test]
fn an_existing_configuration_is_delivered_at_start() {
    let platform = init();
    let ctx = platform.context();
    platform.update_config("stored.pid", props! { "a" => 1 });
    let ex = configuration("stored.pid").execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    // the stored dictionary counts as the first delivery
    assert_eq!(adds.len(), 0);
    assert_eq!(rems.len(), 1);
    ex.close();
}

#[test]
fn factory_instances_pair_updates_and_deletions_per_pid() {
    let platform = init();
    let ctx = platform.context();
    let ex = configurations("my.factory").execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    platform.update_factory_config("my.factory", "x", props! { "a" => 1 });
    assert_eq!(adds.len(), 1);
    platform.update_factory_config("my.factory", "x", props! { "a" => 2 });
    assert_eq!(rems.ids(), vec![adds.ids()[0]]);
    assert_eq!(adds.len(), 2);
    platform.remove_factory_config("my.factory", "x");
    assert_eq!(rems.ids(), vec![adds.ids()[0], adds.ids()[1]]);
    // the delivered dictionaries carry the instance pid
    let d = adds.tokens()[1].clone();
    assert_eq!(d.value().get("service.pid").map(|v| v.to_string()), Some("x".into()));
    ex.close();
    assert_eq!(rems.len(), 2);
}

#[test]
fn factory_close_withdraws_every_held_token() {
    let platform = init();
    let ctx = platform.context();
    let ex = configurations("my.factory").execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    platform.update_factory_config("my.factory", "x", props! { "a" => 1 });
    platform.update_factory_config("my.factory", "y", props! { "a" => 2 });
    assert_eq!(adds.len(), 2);
    assert_eq!(rems.len(), 0);
    ex.close();
    // both tokens are withdrawn, in unspecified order
    let withdrawn: FxHashSet<_> = rems.ids().into_iter().collect();
    let added: FxHashSet<_> = adds.ids().into_iter().collect();
    assert_eq!(withdrawn, added);
    // a later update is invisible
    platform.update_factory_config("my.factory", "z", props! { "a" => 3 });
    assert_eq!(adds.len(), 2);
}

#[test]
fn factory_watchers_are_scoped_to_their_factory() {
    let platform = init();
    let ctx = platform.context();
    let ex = configurations("mine").execute(&ctx).unwrap();
    let adds = Recorder::watch(ex.added());
    ex.start().unwrap();
    platform.update_factory_config("other", "x", props! { "a" => 1 });
    assert_eq!(adds.len(), 0);
    platform.update_factory_config("mine", "x", props! { "a" => 1 });
    assert_eq!(adds.len(), 1);
    ex.close();
}

#[test]
fn deleting_a_configuration_delivers_none() {
    let platform = init();
    let ctx = platform.context();
    let ex = configuration("p").execute(&ctx).unwrap();
    let rems = Recorder::watch(ex.removed());
    ex.start().unwrap();
    platform.update_config("p", props! { "a" => 1 });
    assert_eq!(rems.len(), 1);
    platform.remove_config("p");
    // the deletion withdraws the token holding the deleted dictionary
    assert_eq!(rems.len(), 2);
    assert!(rems.tokens()[1].value().is_some());
    ex.close();
}
