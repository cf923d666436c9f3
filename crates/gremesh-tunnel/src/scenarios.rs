//! End-to-end mesh behaviour over the fake cloud.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gremesh_agent::*;
use gremesh_state::{TunnelKey, TunnelState, TunnelStore};

use crate::manager::{AttachReport, DetachReport};
use crate::testing::*;

fn state_of(store: &TunnelStore, from: u64, to: u64) -> Option<TunnelState> {
    store
        .get(&TunnelKey::new(from, to, NET))
        .unwrap()
        .map(|r| r.state)
}

#[test]
fn first_host_gets_bridge_then_second_host_meshes() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);

    let vm1 = cloud.add_vm(NET, 1, 1, 100);
    manager.on_attach(&vm1, &network(), 1);

    assert_eq!(
        cloud.take_sent(),
        vec![(
            1,
            AgentCommand::SetupBridge(SetupBridge {
                key: KEY,
                host: 1,
                network: NET,
            })
        )]
    );
    assert!(store.list_all().unwrap().is_empty());

    let vm2 = cloud.add_vm(NET, 2, 2, 100);
    manager.on_attach(&vm2, &network(), 2);

    // Host 2 dials host 1, host 1 dials host 2.
    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2), (2, 2, 1)]);
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Success));
    assert_eq!(state_of(&store, 1, 2), Some(TunnelState::Success));
    assert_eq!(
        store.get(&TunnelKey::new(2, 1, NET)).unwrap().unwrap().port_name,
        "t42-1"
    );

    let inbound = cloud
        .sent()
        .into_iter()
        .find_map(|(host, cmd)| match cmd {
            AgentCommand::CreateTunnel(c) if host == 1 => Some(c),
            _ => None,
        })
        .unwrap();
    assert_eq!(inbound.local_ip, host_ip(1));
    assert_eq!(inbound.remote_ip, host_ip(2));
}

#[test]
fn repeated_attach_sends_nothing_new() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    let vm2 = cloud.add_vm(NET, 2, 2, 100);

    manager.on_attach(&vm2, &network(), 2);
    assert_eq!(cloud.take_sent().len(), 2);

    let report = manager.try_attach(&vm2, &network(), 2).unwrap();
    assert_eq!(
        report,
        AttachReport::Tunnels {
            established: vec![],
            failed: vec![],
        }
    );
    assert!(cloud.sent().is_empty());
    assert_eq!(store.list_all().unwrap().len(), 2);
}

#[test]
fn one_direction_can_fail_while_the_other_holds() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    let vm2 = cloud.add_vm(NET, 2, 2, 100);
    cloud.refuse(2);

    manager.on_attach(&vm2, &network(), 2);
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Failed));
    assert_eq!(state_of(&store, 1, 2), Some(TunnelState::Success));
    let established = store.get(&TunnelKey::new(1, 2, NET)).unwrap().unwrap();

    cloud.heal(2);
    cloud.take_sent();
    manager.on_attach(&vm2, &network(), 2);

    assert_eq!(cloud.created_tunnels(), vec![(2, 2, 1)]);
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Success));
    assert_eq!(
        store.get(&TunnelKey::new(1, 2, NET)).unwrap().unwrap(),
        established
    );
}

#[test]
fn one_unreachable_peer_does_not_block_the_others() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    cloud.add_vm(NET, 2, 2, 100);
    cloud.add_router(NET, 3, 3);
    let vm = cloud.add_vm(NET, 4, 4, 100);
    cloud.set_unreachable(2);

    let report = manager.try_attach(&vm, &network(), 4).unwrap();
    let AttachReport::Tunnels { established, failed } = report else {
        panic!("expected tunnels, got {report:?}");
    };
    assert_eq!(established.len(), 5);
    assert_eq!(failed, vec![TunnelKey::new(2, 4, NET)]);

    for peer in [1, 3] {
        assert_eq!(state_of(&store, 4, peer), Some(TunnelState::Success));
        assert_eq!(state_of(&store, peer, 4), Some(TunnelState::Success));
    }
    // Host 4 can still dial the unreachable host's address.
    assert_eq!(state_of(&store, 4, 2), Some(TunnelState::Success));
    assert_eq!(state_of(&store, 2, 4), Some(TunnelState::Failed));
}

#[test]
fn colocated_instances_on_a_peer_share_one_tunnel() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    cloud.add_vm(NET, 2, 1, 101);
    cloud.add_router(NET, 3, 1);
    let vm = cloud.add_vm(NET, 4, 2, 100);

    manager.on_attach(&vm, &network(), 2);
    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2), (2, 2, 1)]);
}

#[test]
fn concurrent_attaches_create_each_tunnel_once() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = Arc::new(cloud.manager(&store));
    cloud.add_vm(NET, 1, 1, 100);
    let vms: Vec<_> = (10..16).map(|id| cloud.add_vm(NET, id, 2, 100)).collect();
    cloud.slow_agents(Duration::from_millis(5));

    let handles: Vec<_> = vms
        .into_iter()
        .map(|vm| {
            let manager = manager.clone();
            thread::spawn(move || manager.on_attach(&vm, &network(), 2))
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2), (2, 2, 1)]);
    assert_eq!(store.list_all().unwrap().len(), 2);
}

#[test]
fn contended_lock_abandons_event_quietly() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = crate::manager::TunnelManager::new(
        true,
        Duration::from_millis(20),
        store.clone(),
        cloud.inventories(),
        cloud.clone(),
    );
    cloud.add_vm(NET, 1, 1, 100);
    let vm = cloud.add_vm(NET, 2, 2, 100);

    let guard = store.acquire_lock(Duration::from_millis(10)).unwrap();
    manager.on_attach(&vm, &network(), 2);
    assert!(store.list_all().unwrap().is_empty());
    assert!(cloud.sent().is_empty());
    drop(guard);

    // The next event on the network picks the work up.
    manager.on_attach(&vm, &network(), 2);
    assert_eq!(store.list_all().unwrap().len(), 2);
}

#[test]
fn last_tenant_tears_down_bridge_and_inbound_tunnels() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    let vm = cloud.add_vm(NET, 1, 1, 100);
    manager.on_attach(&vm, &network(), 1);
    let router = cloud.add_router(NET, 9, 3);
    manager.on_attach(&router, &network(), 3);
    assert_eq!(store.list_all().unwrap().len(), 2);
    cloud.take_sent();

    cloud.remove(vm.id);
    let report = manager.try_detach(&vm, &network()).unwrap();
    assert_eq!(
        report,
        DetachReport::TornDown {
            bridge_destroyed: true,
            tunnels_destroyed: vec![TunnelKey::new(3, 1, NET)],
            tunnels_failed: vec![],
        }
    );

    assert_eq!(
        cloud.sent(),
        vec![
            (
                1,
                AgentCommand::DestroyBridge(DestroyBridge {
                    network: NET,
                    key: KEY,
                })
            ),
            (
                3,
                AgentCommand::DestroyTunnel(DestroyTunnel {
                    network: NET,
                    key: KEY,
                    port_name: "t42-1".to_string(),
                })
            ),
        ]
    );
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn remaining_vm_prevents_teardown() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    let first = cloud.add_vm(NET, 1, 1, 100);
    cloud.add_vm(NET, 2, 1, 100);
    cloud.add_router(NET, 9, 3);

    cloud.remove(first.id);
    manager.on_detach(&first, &network());
    assert!(cloud.sent().is_empty());
}

#[test]
fn colocated_router_prevents_teardown() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    let vm = cloud.add_vm(NET, 1, 1, 100);
    cloud.add_router(NET, 9, 1);

    cloud.remove(vm.id);
    manager.on_detach(&vm, &network());
    assert!(cloud.sent().is_empty());
}

#[test]
fn failed_tunnel_teardown_keeps_its_record() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    cloud.add_vm(NET, 2, 2, 100);
    let vm = cloud.add_vm(NET, 3, 3, 100);
    manager.on_attach(&vm, &network(), 3);
    cloud.set_unreachable(2);

    cloud.remove(vm.id);
    let report = manager.try_detach(&vm, &network()).unwrap();
    assert_eq!(
        report,
        DetachReport::TornDown {
            bridge_destroyed: true,
            tunnels_destroyed: vec![TunnelKey::new(1, 3, NET)],
            tunnels_failed: vec![TunnelKey::new(2, 3, NET)],
        }
    );

    // Outbound records went with the bridge; the stuck inbound one remains.
    let left: Vec<_> = store.list_all().unwrap().iter().map(|r| r.tunnel_key()).collect();
    assert_eq!(left, vec![TunnelKey::new(2, 3, NET)]);
}

#[test]
fn teardown_while_the_lock_is_held_still_clears_records() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = crate::manager::TunnelManager::new(
        true,
        Duration::from_millis(20),
        store.clone(),
        cloud.inventories(),
        cloud.clone(),
    );
    cloud.add_vm(NET, 1, 1, 100);
    let vm = cloud.add_vm(NET, 2, 2, 100);
    manager.on_attach(&vm, &network(), 2);
    assert_eq!(store.list_all().unwrap().len(), 2);

    cloud.remove(vm.id);
    let guard = store.acquire_lock(Duration::from_millis(10)).unwrap();
    let report = manager.try_detach(&vm, &network()).unwrap();
    assert_eq!(
        report,
        DetachReport::TornDown {
            bridge_destroyed: true,
            tunnels_destroyed: vec![TunnelKey::new(1, 2, NET)],
            tunnels_failed: vec![],
        }
    );
    assert!(store.list_all().unwrap().is_empty());
    drop(guard);

    // A new tenant on the same host is meshed again from scratch.
    cloud.take_sent();
    let next = cloud.add_vm(NET, 3, 2, 100);
    manager.on_attach(&next, &network(), 2);
    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2), (2, 2, 1)]);
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Success));
    assert_eq!(state_of(&store, 1, 2), Some(TunnelState::Success));
}

#[test]
fn answer_naming_the_reverse_direction_is_rejected() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    let vm2 = cloud.add_vm(NET, 2, 2, 100);
    let est = store.create_or_get(&TunnelKey::new(1, 2, NET), KEY).unwrap();
    let est = store.update_state(est.id, TunnelState::Success, "t42-2").unwrap();
    cloud.refuse(2);
    cloud.reverse_echo(2);

    let report = manager.try_attach(&vm2, &network(), 2).unwrap();
    assert_eq!(
        report,
        AttachReport::Tunnels {
            established: vec![],
            failed: vec![TunnelKey::new(2, 1, NET)],
        }
    );

    // The established direction is untouched; the dispatched one is retryable.
    assert_eq!(store.get(&TunnelKey::new(1, 2, NET)).unwrap(), Some(est));
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Failed));
}

#[test]
fn stale_pending_direction_is_retried_by_next_attach() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store).with_pending_stale(Duration::ZERO);
    cloud.add_vm(NET, 1, 1, 100);
    let vm2 = cloud.add_vm(NET, 2, 2, 100);
    // Claimed by an earlier event whose answer never arrived.
    let lost = store.create_or_get(&TunnelKey::new(2, 1, NET), KEY).unwrap();

    manager.on_attach(&vm2, &network(), 2);

    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2), (2, 2, 1)]);
    let retried = store.get(&TunnelKey::new(2, 1, NET)).unwrap().unwrap();
    assert_eq!(retried.id, lost.id);
    assert_eq!(retried.state, TunnelState::Success);
}

#[test]
fn fresh_pending_direction_is_left_to_its_event() {
    let cloud = FakeCloud::new();
    let store = TunnelStore::open_in_memory().unwrap();
    let manager = cloud.manager(&store);
    cloud.add_vm(NET, 1, 1, 100);
    let vm2 = cloud.add_vm(NET, 2, 2, 100);
    store.create_or_get(&TunnelKey::new(2, 1, NET), KEY).unwrap();

    manager.on_attach(&vm2, &network(), 2);

    assert_eq!(cloud.created_tunnels(), vec![(1, 1, 2)]);
    assert_eq!(state_of(&store, 2, 1), Some(TunnelState::Pending));
}
