// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sp_core::{EventSource, SandboxId};

fn created(name: &str) -> SandboxEvent {
    SandboxEvent::Created {
        id: SandboxId::from_parts("default", name),
        source: EventSource::LifecycleController,
        message: String::new(),
    }
}

#[tokio::test]
async fn every_subscriber_receives_every_event() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(created("sbx-1"));
    bus.publish(created("sbx-2"));

    assert_eq!(a.recv().await.unwrap().id().name(), "sbx-1");
    assert_eq!(a.recv().await.unwrap().id().name(), "sbx-2");
    assert_eq!(b.recv().await.unwrap().id().name(), "sbx-1");
    assert_eq!(b.recv().await.unwrap().id().name(), "sbx-2");
}

#[tokio::test]
async fn dropped_subscribers_are_pruned() {
    let bus = EventBus::new();
    let rx = bus.subscribe();
    let _keep = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    drop(rx);
    bus.publish(created("sbx-1"));
    assert_eq!(bus.subscriber_count(), 1);
}
