
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flotilla::driver::LocalDriver;
use flotilla::fleet::restart::FleetEvent;
use flotilla::server::FleetServer;
use test_harness::{definition, test_restart_config, wait_until};

#[tokio::test]
async fn local_driver_brings_the_initial_population_up() {
    let (server, handle, link) =
        FleetServer::new(vec![definition("web", 2, true)], test_restart_config());
    let registry = server.registry();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    tokio::spawn(LocalDriver::new(registry.clone(), link).run());

    let up = wait_until(Duration::from_secs(3), || async {
        let reg = registry.read().await;
        reg.launched().len() == 2 && reg.pending().is_empty()
    })
    .await;
    assert!(up, "initial population did not come up");

    let stats = handle.type_stats().await.unwrap();
    assert_eq!(stats[0].running_instances, 2);

    shutdown.cancel();
}

#[tokio::test]
async fn local_driver_completes_a_full_restart_cycle() {
    let (server, handle, link) =
        FleetServer::new(vec![definition("web", 1, true)], test_restart_config());
    let registry = server.registry();
    let mut events = server.subscribe_events();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    tokio::spawn(LocalDriver::new(registry.clone(), link).run());

    let up = wait_until(Duration::from_secs(3), || async {
        registry.read().await.launched().len() == 1
    })
    .await;
    assert!(up);
    let original = {
        let reg = registry.read().await;
        reg.launched()[0].runtime.as_ref().unwrap().task_id.clone()
    };

    handle.restart_task(&original).await.unwrap();

    let restarted = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("restart did not complete")
        .unwrap();
    assert!(matches!(restarted, FleetEvent::TaskRestarted { .. }));

    // The driver answers the kill with a terminal update; the original
    // leaves the launched collection and only the replacement remains.
    let replaced = wait_until(Duration::from_secs(3), || async {
        let reg = registry.read().await;
        reg.launched().len() == 1
            && reg.find_launched_by_task_id(&original).is_none()
            && !reg.launched()[0].runtime.as_ref().unwrap().restarting
    })
    .await;
    assert!(replaced, "original was not replaced cleanly");

    let stats = handle.type_stats().await.unwrap();
    assert_eq!(stats[0].running_instances, 1);

    shutdown.cancel();
}
