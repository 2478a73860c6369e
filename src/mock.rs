//! In-memory cluster used by the test suite.

use futures::future::BoxFuture;
use futures::io::Cursor;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::runtime::watcher::Event;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::cluster::{ClientError, ClusterApi, LogByteStream, WatchStream};
use crate::types::{ControllerKind, ControllerRef, LogOptions, PodRef};
use crate::utils::{matches_selector, parse_labels, selector_from_labels};

const EVENT_BUFFER: usize = 256;
const MOCK_TIMESTAMP: &str = "2024-01-15T10:30:00Z";

struct MockPod {
    pod: PodRef,
    lines: Vec<String>,
    fail_opens: u32,
}

#[derive(Default)]
struct State {
    pods: Vec<MockPod>,
    controllers: Vec<(ControllerKind, ControllerRef)>,
    open_attempts: HashMap<String, u32>,
    /// Pod list calls whose selector carries one of these labels fail
    failing_lists: BTreeMap<String, String>,
    fail_watches: bool,
}

pub struct MockCluster {
    state: Mutex<State>,
    pod_events: broadcast::Sender<Event<PodRef>>,
    controller_events: broadcast::Sender<(ControllerKind, Event<ControllerRef>)>,
}

impl MockCluster {
    pub fn new() -> Self {
        let (pod_events, _) = broadcast::channel(EVENT_BUFFER);
        let (controller_events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            pod_events,
            controller_events,
        }
    }

    pub fn add_pod(&self, namespace: &str, name: &str, labels: &str, lines: &[&str]) {
        self.add_failing_pod(namespace, name, labels, lines, 0);
    }

    /// Add a pod whose first `fail_opens` log requests are refused.
    pub fn add_failing_pod(
        &self,
        namespace: &str,
        name: &str,
        labels: &str,
        lines: &[&str],
        fail_opens: u32,
    ) {
        let pod = PodRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: parse_labels(labels),
        };
        let mut state = self.state.lock().unwrap();
        state.pods.push(MockPod {
            pod: pod.clone(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            fail_opens,
        });
        let _ = self.pod_events.send(Event::Apply(pod));
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = state
            .pods
            .iter()
            .position(|p| p.pod.namespace == namespace && p.pod.name == name)
        {
            let removed = state.pods.remove(idx);
            let _ = self.pod_events.send(Event::Delete(removed.pod));
        }
    }

    /// Add a controller selecting pods by `labels`; an empty string means no selector.
    pub fn add_controller(&self, namespace: &str, kind: ControllerKind, name: &str, labels: &str) {
        let selector = Some(parse_labels(labels))
            .filter(|l| !l.is_empty())
            .map(selector_from_labels);
        self.add_controller_with_selector(namespace, kind, name, selector);
    }

    pub fn add_controller_with_selector(
        &self,
        namespace: &str,
        kind: ControllerKind,
        name: &str,
        selector: Option<LabelSelector>,
    ) {
        let controller = ControllerRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector,
        };
        let mut state = self.state.lock().unwrap();
        state.controllers.push((kind, controller.clone()));
        let _ = self.controller_events.send((kind, Event::Apply(controller)));
    }

    pub fn delete_controller(&self, namespace: &str, kind: ControllerKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = state
            .controllers
            .iter()
            .position(|(k, c)| *k == kind && c.namespace == namespace && c.name == name)
        {
            let (_, removed) = state.controllers.remove(idx);
            let _ = self.controller_events.send((kind, Event::Delete(removed)));
        }
    }

    pub fn fail_pod_lists_selecting(&self, label: &str) {
        self.state.lock().unwrap().failing_lists.extend(parse_labels(label));
    }

    pub fn fail_watches(&self) {
        self.state.lock().unwrap().fail_watches = true;
    }

    pub fn open_attempts(&self, pod: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .open_attempts
            .get(pod)
            .copied()
            .unwrap_or_default()
    }
}

fn selects(selector: Option<&LabelSelector>, pod: &PodRef) -> bool {
    selector.is_none_or(|s| matches_selector(&pod.labels, s))
}

/// Initial listing followed by live events, the shape of a kube watcher.
fn watch_stream<K>(initial: Vec<K>, rx: broadcast::Receiver<Event<K>>) -> WatchStream<K>
where
    K: Clone + Send + 'static,
{
    let init = std::iter::once(Event::Init)
        .chain(initial.into_iter().map(Event::InitApply))
        .chain(std::iter::once(Event::InitDone));
    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    stream::iter(init).chain(live).map(Ok).boxed()
}

/// A watch whose initial list is refused, in the order kube's watcher reports it.
fn refused_watch<K: Send + 'static>() -> WatchStream<K> {
    stream::iter([
        Ok(Event::Init),
        Err(ClientError::Connection("watch refused".to_string())),
    ])
    .chain(stream::pending())
    .boxed()
}

fn event_object<K>(event: &Event<K>) -> Option<&K> {
    match event {
        Event::Apply(obj) | Event::Delete(obj) | Event::InitApply(obj) => Some(obj),
        Event::Init | Event::InitDone => None,
    }
}

impl ClusterApi for MockCluster {
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: Option<&'a LabelSelector>,
    ) -> BoxFuture<'a, Result<Vec<PodRef>, ClientError>> {
        let state = self.state.lock().unwrap();
        let failing = selector
            .and_then(|s| s.match_labels.as_ref())
            .is_some_and(|labels| {
                labels
                    .iter()
                    .any(|(k, v)| state.failing_lists.get(k) == Some(v))
            });
        let result = if failing {
            Err(ClientError::Connection("pod list refused".to_string()))
        } else {
            Ok(state
                .pods
                .iter()
                .filter(|p| p.pod.namespace == namespace && selects(selector, &p.pod))
                .map(|p| p.pod.clone())
                .collect())
        };
        futures::future::ready(result).boxed()
    }

    fn list_controllers<'a>(
        &'a self,
        namespace: &'a str,
        kind: ControllerKind,
    ) -> BoxFuture<'a, Result<Vec<ControllerRef>, ClientError>> {
        let state = self.state.lock().unwrap();
        let controllers = state
            .controllers
            .iter()
            .filter(|(k, c)| *k == kind && c.namespace == namespace)
            .map(|(_, c)| c.clone())
            .collect();
        futures::future::ready(Ok(controllers)).boxed()
    }

    fn watch_pods(&self, namespace: &str, selector: Option<&LabelSelector>) -> WatchStream<PodRef> {
        let state = self.state.lock().unwrap();
        if state.fail_watches {
            return refused_watch();
        }
        let namespace = namespace.to_string();
        let selector = selector.cloned();
        let initial = state
            .pods
            .iter()
            .map(|p| p.pod.clone())
            .filter(|p| p.namespace == namespace && selects(selector.as_ref(), p))
            .collect();
        // Subscribing under the lock keeps the snapshot and the live feed consistent
        let rx = self.pod_events.subscribe();
        drop(state);

        watch_stream(initial, rx)
            .filter(move |event| {
                let keep = match event {
                    Ok(event) => event_object(event)
                        .is_none_or(|p| p.namespace == namespace && selects(selector.as_ref(), p)),
                    Err(_) => true,
                };
                futures::future::ready(keep)
            })
            .boxed()
    }

    fn watch_controllers(
        &self,
        namespace: &str,
        kind: ControllerKind,
    ) -> WatchStream<ControllerRef> {
        let state = self.state.lock().unwrap();
        if state.fail_watches {
            return refused_watch();
        }
        let namespace = namespace.to_string();
        let initial = state
            .controllers
            .iter()
            .filter(|(k, c)| *k == kind && c.namespace == namespace)
            .map(|(_, c)| c.clone())
            .collect();
        let (tx, rx) = broadcast::channel(EVENT_BUFFER);
        let mut feed = self.controller_events.subscribe();
        drop(state);

        // Narrow the shared feed to this kind and namespace
        tokio::spawn(async move {
            loop {
                let event = match feed.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let (event_kind, event) = event;
                let in_scope = event_object(&event).is_none_or(|c| c.namespace == namespace);
                if event_kind == kind && in_scope && tx.send(event).is_err() {
                    break;
                }
            }
        });
        watch_stream(initial, rx)
    }

    fn pod_log_stream<'a>(
        &'a self,
        namespace: &'a str,
        pod: &'a str,
        options: &'a LogOptions,
    ) -> BoxFuture<'a, Result<LogByteStream, ClientError>> {
        let mut state = self.state.lock().unwrap();
        *state.open_attempts.entry(pod.to_string()).or_default() += 1;
        let result = match state
            .pods
            .iter_mut()
            .find(|p| p.pod.namespace == namespace && p.pod.name == pod)
        {
            None => Err(ClientError::Connection(format!("pod {} not found", pod))),
            Some(p) if p.fail_opens > 0 => {
                p.fail_opens -= 1;
                Err(ClientError::Connection(format!("container in pod {} is not ready", pod)))
            }
            Some(p) => {
                let mut data = String::new();
                for line in &p.lines {
                    if options.timestamps {
                        data.push_str(MOCK_TIMESTAMP);
                        data.push(' ');
                    }
                    data.push_str(line);
                    data.push('\n');
                }
                Ok(Box::pin(Cursor::new(data.into_bytes())) as LogByteStream)
            }
        };
        futures::future::ready(result).boxed()
    }
}
