//! Cluster API seam.
//!
//! Everything the resolver needs from Kubernetes goes through [`ClusterApi`],
//! so the log pipeline can run against the real API server ([`KubeCluster`])
//! or an in-memory cluster in tests.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{AsyncBufRead, AsyncBufReadExt, FutureExt, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ListParams, LogParams};
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event, watcher};
use kube::{Api, Client, ResourceExt};
use std::fmt::Debug;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::types::{ControllerKind, ControllerRef, LogOptions, PodRef};
use crate::utils::{selector_from_labels, selector_to_string};

/// Failure reported by the cluster API collaborator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Watcher(#[from] watcher::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid selector: {0}")]
    Selector(String),
}

const LOG_CHUNK_BUFFER: usize = 16;

/// Raw container output.
pub type LogByteStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Watch subscription. Dropping the stream ends the subscription.
pub type WatchStream<K> = BoxStream<'static, Result<Event<K>, ClientError>>;

pub trait ClusterApi: Send + Sync + 'static {
    /// List pods in a namespace, optionally restricted by a selector.
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: Option<&'a LabelSelector>,
    ) -> BoxFuture<'a, Result<Vec<PodRef>, ClientError>>;

    /// List controllers of one kind in a namespace.
    fn list_controllers<'a>(
        &'a self,
        namespace: &'a str,
        kind: ControllerKind,
    ) -> BoxFuture<'a, Result<Vec<ControllerRef>, ClientError>>;

    fn watch_pods(&self, namespace: &str, selector: Option<&LabelSelector>) -> WatchStream<PodRef>;

    fn watch_controllers(&self, namespace: &str, kind: ControllerKind)
    -> WatchStream<ControllerRef>;

    /// Open the log stream of a pod. Fails while the pod or container is unavailable.
    fn pod_log_stream<'a>(
        &'a self,
        namespace: &'a str,
        pod: &'a str,
        options: &'a LogOptions,
    ) -> BoxFuture<'a, Result<LogByteStream, ClientError>>;
}

/// [`ClusterApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

trait HasSelector {
    fn get_selector(&self) -> Option<LabelSelector>;
}

impl HasSelector for Deployment {
    fn get_selector(&self) -> Option<LabelSelector> {
        self.spec.as_ref().map(|s| s.selector.clone())
    }
}

impl HasSelector for StatefulSet {
    fn get_selector(&self) -> Option<LabelSelector> {
        self.spec.as_ref().map(|s| s.selector.clone())
    }
}

impl HasSelector for ReplicaSet {
    fn get_selector(&self) -> Option<LabelSelector> {
        self.spec.as_ref().map(|s| s.selector.clone())
    }
}

impl HasSelector for Service {
    fn get_selector(&self) -> Option<LabelSelector> {
        self.spec
            .as_ref()
            .and_then(|s| s.selector.clone())
            .filter(|labels| !labels.is_empty())
            .map(selector_from_labels)
    }
}

fn pod_ref(pod: Pod) -> PodRef {
    PodRef {
        namespace: pod.namespace().unwrap_or_default(),
        name: pod.name_any(),
        labels: pod.metadata.labels.unwrap_or_default(),
    }
}

fn controller_ref<T>(obj: T) -> ControllerRef
where
    T: HasSelector + ResourceExt,
{
    ControllerRef {
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        selector: obj.get_selector(),
    }
}

fn list_params(selector: Option<&LabelSelector>) -> Result<ListParams, ClientError> {
    let mut params = ListParams::default();
    if let Some(selector) = selector {
        let labels = selector_to_string(selector).map_err(ClientError::Selector)?;
        if !labels.is_empty() {
            params = params.labels(&labels);
        }
    }
    Ok(params)
}

fn watcher_config(selector: Option<&LabelSelector>) -> Result<watcher::Config, ClientError> {
    let mut cfg = watcher::Config::default();
    if let Some(selector) = selector {
        let labels = selector_to_string(selector).map_err(ClientError::Selector)?;
        if !labels.is_empty() {
            cfg = cfg.labels(&labels);
        }
    }
    Ok(cfg)
}

async fn list_controllers_generic<T>(
    client: &Client,
    namespace: &str,
) -> Result<Vec<ControllerRef>, ClientError>
where
    T: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + k8s_openapi::Metadata<Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta>
        + HasSelector
        + serde::de::DeserializeOwned
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.into_iter().map(controller_ref).collect())
}

fn watch_controllers_generic<T>(client: &Client, namespace: &str) -> WatchStream<ControllerRef>
where
    T: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + k8s_openapi::Metadata<Ty = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta>
        + HasSelector
        + serde::de::DeserializeOwned
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    watcher(api, watcher::Config::default())
        .default_backoff()
        .map_ok(|event| map_event(event, controller_ref))
        .map_err(ClientError::from)
        .boxed()
}

fn map_event<K, T>(event: Event<K>, f: impl Fn(K) -> T) -> Event<T> {
    match event {
        Event::Apply(obj) => Event::Apply(f(obj)),
        Event::Delete(obj) => Event::Delete(f(obj)),
        Event::Init => Event::Init,
        Event::InitApply(obj) => Event::InitApply(f(obj)),
        Event::InitDone => Event::InitDone,
    }
}

impl ClusterApi for KubeCluster {
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: Option<&'a LabelSelector>,
    ) -> BoxFuture<'a, Result<Vec<PodRef>, ClientError>> {
        async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let list = api.list(&list_params(selector)?).await?;
            Ok(list.items.into_iter().map(pod_ref).collect())
        }
        .boxed()
    }

    fn list_controllers<'a>(
        &'a self,
        namespace: &'a str,
        kind: ControllerKind,
    ) -> BoxFuture<'a, Result<Vec<ControllerRef>, ClientError>> {
        match kind {
            ControllerKind::Deployment => {
                list_controllers_generic::<Deployment>(&self.client, namespace).boxed()
            }
            ControllerKind::Service => {
                list_controllers_generic::<Service>(&self.client, namespace).boxed()
            }
            ControllerKind::StatefulSet => {
                list_controllers_generic::<StatefulSet>(&self.client, namespace).boxed()
            }
            ControllerKind::ReplicaSet => {
                list_controllers_generic::<ReplicaSet>(&self.client, namespace).boxed()
            }
        }
    }

    fn watch_pods(&self, namespace: &str, selector: Option<&LabelSelector>) -> WatchStream<PodRef> {
        let cfg = match watcher_config(selector) {
            Ok(cfg) => cfg,
            Err(e) => return futures::stream::once(async move { Err(e) }).boxed(),
        };
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        watcher(api, cfg)
            .default_backoff()
            .map_ok(|event| map_event(event, pod_ref))
            .map_err(ClientError::from)
            .boxed()
    }

    fn watch_controllers(
        &self,
        namespace: &str,
        kind: ControllerKind,
    ) -> WatchStream<ControllerRef> {
        let client = &self.client;
        match kind {
            ControllerKind::Deployment => {
                watch_controllers_generic::<Deployment>(client, namespace)
            }
            ControllerKind::Service => watch_controllers_generic::<Service>(client, namespace),
            ControllerKind::StatefulSet => {
                watch_controllers_generic::<StatefulSet>(client, namespace)
            }
            ControllerKind::ReplicaSet => {
                watch_controllers_generic::<ReplicaSet>(client, namespace)
            }
        }
    }

    fn pod_log_stream<'a>(
        &'a self,
        namespace: &'a str,
        pod: &'a str,
        options: &'a LogOptions,
    ) -> BoxFuture<'a, Result<LogByteStream, ClientError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pod.to_string();
        let params = LogParams {
            follow: options.follow,
            timestamps: options.timestamps,
            container: options.container.clone(),
            tail_lines: options.tail_lines,
            ..Default::default()
        };
        async move {
            let (opened_tx, opened_rx) = oneshot::channel();
            let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(LOG_CHUNK_BUFFER);
            // The stream returned by kube borrows the Api, so it's pumped from
            // a task owning both; the task ends once the reader side is dropped.
            tokio::spawn(async move {
                let stream = match api.log_stream(&pod, &params).await {
                    Ok(stream) => {
                        let _ = opened_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                let mut stream = Box::pin(stream);
                loop {
                    let chunk = tokio::select! {
                        _ = tx.closed() => break,
                        read = stream.fill_buf() => match read {
                            Ok([]) => break,
                            Ok(buf) => buf.to_vec(),
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        },
                    };
                    stream.consume_unpin(chunk.len());
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                debug!("log pump for pod {} finished", pod);
            });

            match opened_rx.await {
                Ok(Ok(())) => {
                    Ok(Box::pin(ReceiverStream::new(rx).into_async_read()) as LogByteStream)
                }
                Ok(Err(e)) => Err(ClientError::Kube(e)),
                Err(_) => Err(ClientError::Connection(
                    "log stream task ended before opening".to_string(),
                )),
            }
        }
        .boxed()
    }
}
