use std::time::Duration;
use tidings::{EventRouter, RouterConfig, signals};

mod common;
use common::stalling_async;

#[test]
fn test_registered_router_work_is_cancelled() {
    let router = EventRouter::with_config(
        RouterConfig::default()
            .with_signal_handling(true)
            .with_name("signals-test"),
    );
    let bystander = EventRouter::new();
    router.on("stall").call(stalling_async());
    bystander.on("stall").call(stalling_async());

    router.emit("stall", ());
    router.emit("stall", ());
    bystander.emit("stall", ());
    assert_eq!(router.outstanding(), 2);

    assert!(!signals::registry().is_empty());
    assert!(signals::registry().cancel_all() >= 2);
    assert!(router.join(Some(Duration::from_secs(5))));
    assert_eq!(router.outstanding(), 0);
    assert!(!bystander.join(Some(Duration::from_millis(20))));
    assert_eq!(bystander.outstanding(), 1);

    bystander.close();
    router.close();
    assert!(router.join(Some(Duration::from_millis(10))));
}
