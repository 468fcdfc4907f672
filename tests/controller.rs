mod common;

use common::{endpoints, object, spawn_run, wait_phase, WAIT};
use futures::StreamExt;
use kube::api::DynamicObject;
use kube_robot::{
    ChannelSource, ClusterConfig, Controller, ControllerConfig, Error, EventKind, EventStream,
    Phase, QueueObject, ResourceType, WatchSource,
};
use kube_runtime::watcher::Event;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, task::Poll, time::Duration};

fn controller(sources: Vec<ChannelSource>) -> Arc<Controller> {
    let sources = sources
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn WatchSource>)
        .collect();
    Arc::new(Controller::with_sources(sources, ControllerConfig::default()).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pod_add_reaches_queue() {
    let cluster = ChannelSource::new("c0");
    let pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod], &["default".to_string()])
        .unwrap();
    assert_eq!(ctrl.phase(), Phase::Discovering);

    let runner = spawn_run(&ctrl);
    pods.send(Ok(Event::Restarted(vec![]))).unwrap();
    wait_phase(&ctrl, Phase::Running).await;

    pods.send(Ok(Event::Applied(object(ResourceType::Pod, "kube-system", "dns"))))
        .unwrap();
    pods.send(Ok(Event::Applied(object(ResourceType::Pod, "default", "web-1"))))
        .unwrap();
    let item = tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap();
    assert_eq!(
        item,
        Some(QueueObject::new(EventKind::Add, "pods", "default/web-1"))
    );
    assert!(ctrl.get(ResourceType::Pod, "default/web-1").is_some());
    assert!(ctrl.get(ResourceType::Pod, "kube-system/dns").is_none());

    ctrl.stop();
    runner.await.unwrap().unwrap();
    assert_eq!(ctrl.phase(), Phase::Stopped);
    assert!(ctrl.queue().is_closed());
    assert_eq!(ctrl.pop().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endpoint_updates_are_deduplicated_by_subsets() {
    let cluster = ChannelSource::new("c0");
    let eps = cluster.feed(ResourceType::Endpoint);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Endpoint], &[]).unwrap();
    let runner = spawn_run(&ctrl);

    eps.send(Ok(Event::Restarted(vec![endpoints("web", "1", "10.0.0.1")])))
        .unwrap();
    wait_phase(&ctrl, Phase::Running).await;
    // initial listing is announced
    assert_eq!(
        tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap(),
        Some(QueueObject::new(EventKind::Add, "endpoints", "default/web"))
    );

    // metadata-only change
    eps.send(Ok(Event::Applied(endpoints("web", "2", "10.0.0.1"))))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ctrl.queue().is_empty());
    let cached = ctrl.get(ResourceType::Endpoint, "default/web").unwrap();
    assert_eq!(cached.metadata.resource_version.as_deref(), Some("2"));

    // addresses moved
    eps.send(Ok(Event::Applied(endpoints("web", "3", "10.0.0.2"))))
        .unwrap();
    assert_eq!(
        tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap(),
        Some(QueueObject::new(EventKind::Update, "endpoints", "default/web"))
    );

    eps.send(Ok(Event::Deleted(endpoints("web", "4", "10.0.0.2"))))
        .unwrap();
    assert_eq!(
        tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap(),
        Some(QueueObject::new(EventKind::Delete, "endpoints", "default/web"))
    );

    ctrl.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_updates_are_forwarded() {
    let cluster = ChannelSource::new("c0");
    let services = cluster.feed(ResourceType::Service);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Service], &[]).unwrap();
    let runner = spawn_run(&ctrl);

    let svc = object(ResourceType::Service, "default", "api");
    services.send(Ok(Event::Restarted(vec![svc.clone()]))).unwrap();
    wait_phase(&ctrl, Phase::Running).await;
    services.send(Ok(Event::Applied(svc.clone()))).unwrap();
    services.send(Ok(Event::Applied(svc))).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let item = tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap().unwrap();
        assert_eq!(item.resource, "services");
        kinds.push(item.kind);
    }
    assert_eq!(kinds, vec![EventKind::Add, EventKind::Update, EventKind::Update]);

    ctrl.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nameless_objects_are_dropped() {
    let cluster = ChannelSource::new("c0");
    let cms = cluster.feed(ResourceType::ConfigMap);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::ConfigMap], &[]).unwrap();
    let runner = spawn_run(&ctrl);

    cms.send(Ok(Event::Restarted(vec![]))).unwrap();
    wait_phase(&ctrl, Phase::Running).await;
    let mut broken = object(ResourceType::ConfigMap, "default", "x");
    broken.metadata.name = None;
    cms.send(Ok(Event::Deleted(broken))).unwrap();
    cms.send(Ok(Event::Applied(object(ResourceType::ConfigMap, "default", "ok"))))
        .unwrap();
    assert_eq!(
        tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap(),
        Some(QueueObject::new(EventKind::Add, "configmaps", "default/ok"))
    );
    assert_eq!(ctrl.phase(), Phase::Running);

    ctrl.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_before_any_notification() {
    let cluster = ChannelSource::new("c0");
    let _pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    ctrl.stop();
    ctrl.stop();

    tokio::time::timeout(WAIT, ctrl.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctrl.phase(), Phase::Stopped);
    assert_eq!(
        tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap(),
        None
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_waiting_for_sync() {
    let cluster = ChannelSource::new("c0");
    let _pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    let runner = spawn_run(&ctrl);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctrl.phase(), Phase::Discovering);
    ctrl.stop();
    tokio::time::timeout(WAIT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ctrl.phase(), Phase::Stopped);
}

#[tokio::test]
async fn no_clusters_is_configuration_error() {
    let res = Controller::connect(&ClusterConfig::default(), ControllerConfig::default()).await;
    assert!(matches!(res, Err(Error::Configuration)));
    let res = Controller::with_sources(Vec::new(), ControllerConfig::default());
    assert!(matches!(res, Err(Error::Configuration)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_timeout_is_fatal() {
    let first = ChannelSource::new("c0");
    let first_pods = first.feed(ResourceType::Pod);
    let second = ChannelSource::new("c1");
    let _second_pods = second.feed(ResourceType::Pod);
    let sources: Vec<Arc<dyn WatchSource>> = vec![Arc::new(first), Arc::new(second)];
    let ctrl = Controller::with_sources(
        sources,
        ControllerConfig {
            sync_timeout_secs: 1,
        },
    )
    .unwrap();
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    first_pods.send(Ok(Event::Restarted(vec![]))).unwrap();

    let err = tokio::time::timeout(WAIT, ctrl.run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_fatal());
    match err {
        Error::SyncTimeout { cluster, resource } => {
            assert_eq!(cluster, "c1");
            assert_eq!(resource, ResourceType::Pod);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ctrl.phase(), Phase::Stopped);
    assert!(ctrl.queue().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_watch_is_fatal() {
    let cluster = ChannelSource::new("c0");
    let pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    let runner = spawn_run(&ctrl);
    pods.send(Ok(Event::Restarted(vec![object(ResourceType::Pod, "default", "a")])))
        .unwrap();
    wait_phase(&ctrl, Phase::Running).await;
    drop(pods);

    let err = tokio::time::timeout(WAIT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        Error::WatchClosed { resource: ResourceType::Pod, .. }
    ));
    // events queued before the failure are still there
    assert_eq!(
        ctrl.pop().await,
        Some(QueueObject::new(EventKind::Add, "pods", "default/a"))
    );
    assert_eq!(ctrl.pop().await, None);
}

struct Panicking;

impl WatchSource for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn watch(&self, _: ResourceType, _: &[String]) -> EventStream {
        let listing = futures::stream::iter(vec![Ok(Event::Restarted(Vec::new()))]);
        let broken = futures::stream::poll_fn(
            |_| -> Poll<Option<anyhow::Result<Event<DynamicObject>>>> { panic!("transport bug") },
        );
        listing.chain(broken).boxed()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_watch_is_fatal() {
    let sources: Vec<Arc<dyn WatchSource>> = vec![Arc::new(Panicking)];
    let ctrl = Controller::with_sources(sources, ControllerConfig::default()).unwrap();
    ctrl.discover(&[ResourceType::ConfigMap], &[]).unwrap();
    let err = tokio::time::timeout(WAIT, ctrl.run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_fatal());
    match err {
        Error::SubscriptionPanicked { cluster, resource } => {
            assert_eq!(cluster, "panicking");
            assert_eq!(resource, ResourceType::ConfigMap);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ctrl.phase(), Phase::Stopped);
    assert!(ctrl.queue().is_closed());
    assert_eq!(ctrl.pop().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_closed_before_sync_is_fatal() {
    let cluster = ChannelSource::new("c0");
    let pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    drop(pods);
    let err = tokio::time::timeout(WAIT, ctrl.run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::WatchClosed { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_misuse_is_rejected() {
    let cluster = ChannelSource::new("c0");
    let _pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    assert!(matches!(ctrl.run().await, Err(Error::InvalidState(_))));

    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    ctrl.stop();
    ctrl.run().await.unwrap();
    assert!(matches!(ctrl.run().await, Err(Error::InvalidState(_))));
    assert!(matches!(
        ctrl.discover(&[ResourceType::Pod], &[]),
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rediscovery_replaces_subscriptions() {
    let cluster = ChannelSource::new("c0");
    let _pods = cluster.feed(ResourceType::Pod);
    let ctrl = controller(vec![cluster]);
    ctrl.discover(&[ResourceType::Pod, ResourceType::Service], &[])
        .unwrap();
    assert_eq!(ctrl.store().shard_count(ResourceType::Service), 1);
    ctrl.discover(&[ResourceType::Pod], &[]).unwrap();
    assert_eq!(ctrl.store().shard_count(ResourceType::Service), 0);
    assert_eq!(ctrl.store().shard_count(ResourceType::Pod), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clusters_share_queue_and_store() {
    let first = ChannelSource::new("c0");
    let first_cms = first.feed(ResourceType::ConfigMap);
    let second = ChannelSource::new("c1");
    let second_cms = second.feed(ResourceType::ConfigMap);
    let ctrl = controller(vec![first, second]);
    ctrl.discover(&[ResourceType::ConfigMap], &[]).unwrap();
    let runner = spawn_run(&ctrl);

    let shared = |cluster: &str| {
        object(ResourceType::ConfigMap, "default", "shared").data(json!({"data": {"origin": cluster}}))
    };
    first_cms
        .send(Ok(Event::Restarted(vec![shared("c0")])))
        .unwrap();
    second_cms
        .send(Ok(Event::Restarted(vec![shared("c1")])))
        .unwrap();
    wait_phase(&ctrl, Phase::Running).await;

    const PER_CLUSTER: usize = 50;
    let feeds = [("c0", first_cms.clone()), ("c1", second_cms.clone())];
    let producers: Vec<_> = feeds
        .into_iter()
        .map(|(cluster, feed)| {
            std::thread::spawn(move || {
                for i in 0..PER_CLUSTER {
                    let name = format!("{}-{}", cluster, i);
                    feed.send(Ok(Event::Applied(object(ResourceType::ConfigMap, "default", &name))))
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let mut shared_adds = 0;
    let mut next_expected: HashMap<String, usize> = HashMap::new();
    for _ in 0..(2 + 2 * PER_CLUSTER) {
        let item = tokio::time::timeout(WAIT, ctrl.pop()).await.unwrap().unwrap();
        assert_eq!(item.kind, EventKind::Add);
        let name = item.key.strip_prefix("default/").unwrap();
        if name == "shared" {
            shared_adds += 1;
            continue;
        }
        let (cluster, seq) = name.split_once('-').unwrap();
        let expected = next_expected.entry(cluster.to_string()).or_default();
        assert_eq!(seq.parse::<usize>().unwrap(), *expected);
        *expected += 1;
    }
    // same key from two clusters is not disambiguated
    assert_eq!(shared_adds, 2);
    assert_eq!(next_expected.get("c0"), Some(&PER_CLUSTER));
    assert_eq!(next_expected.get("c1"), Some(&PER_CLUSTER));

    let store = ctrl.store();
    let first_hit = store.get(ResourceType::ConfigMap, "default/shared").unwrap();
    assert_eq!(first_hit.data["data"]["origin"], "c0");
    let second_hit = store
        .get_from("c1", ResourceType::ConfigMap, "default/shared")
        .unwrap();
    assert_eq!(second_hit.data["data"]["origin"], "c1");
    assert_eq!(ctrl.list(ResourceType::ConfigMap).len(), 2 + 2 * PER_CLUSTER);

    ctrl.stop();
    runner.await.unwrap().unwrap();
    assert!(ctrl.queue().is_empty());
}
