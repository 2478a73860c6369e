//! Turns a resource specifier into per-pod log readers feeding a merger.

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::runtime::watcher::Event;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::error::{Error, Result};
use crate::iterator::Merger;
use crate::reader::{PodTarget, ReaderConfig, log_lines, open_pod_log, pod_reader};
use crate::retry::{RetryError, RetryPolicy};
use crate::specifier::ResourceSpecifier;
use crate::types::{ControllerKind, ControllerRef, LogLine, PodRef, ResourceKind};
use crate::utils::{is_empty_selector, selector_to_string};

/// Pods currently matching one watch subscription.
///
/// Each member owns a token that retires its pending log acquisition when
/// the pod goes away.
#[derive(Debug, Default)]
pub struct PodMembership {
    members: HashMap<String, CancellationToken>,
}

#[derive(Debug)]
pub enum MembershipChange {
    /// First sighting; carries the token scoping the new reader's startup
    Added(CancellationToken),
    Updated,
}

impl PodMembership {
    pub fn apply(&mut self, pod: &str, parent: &CancellationToken) -> MembershipChange {
        if self.members.contains_key(pod) {
            return MembershipChange::Updated;
        }
        let token = parent.child_token();
        self.members.insert(pod.to_string(), token.clone());
        MembershipChange::Added(token)
    }

    /// Forget a pod, abandoning its log acquisition if it hasn't opened yet.
    /// An already streaming reader runs until its stream ends.
    pub fn delete(&mut self, pod: &str) -> bool {
        match self.members.remove(pod) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pod: &str) -> bool {
        self.members.contains_key(pod)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Which pods a pod watch accepts and how their lines are tagged.
#[derive(Clone)]
struct MemberScope {
    namespace: String,
    selector: Option<LabelSelector>,
    /// Name filter for bare pod specifiers
    name_filter: Option<glob::Pattern>,
    /// Owning controller; None when the pod itself was named
    owner: Option<(String, ControllerKind)>,
}

impl MemberScope {
    fn target(&self, pod: &PodRef) -> PodTarget {
        let (resource_name, resource_kind) = match &self.owner {
            Some((name, kind)) => (name.clone(), ResourceKind::Controller(*kind)),
            None => (pod.name.clone(), ResourceKind::Pod),
        };
        PodTarget {
            namespace: pod.namespace.clone(),
            pod_name: pod.name.clone(),
            resource_name,
            resource_kind,
        }
    }

    fn accepts(&self, pod: &PodRef) -> bool {
        self.name_filter.as_ref().is_none_or(|p| p.matches(&pod.name))
    }

    fn watched_kind(&self) -> ResourceKind {
        match &self.owner {
            Some((_, kind)) => ResourceKind::Controller(*kind),
            None => ResourceKind::Pod,
        }
    }
}

#[derive(Clone)]
pub struct Resolver {
    cluster: Arc<dyn ClusterApi>,
    reader: ReaderConfig,
    retry: RetryPolicy,
    follow: bool,
}

impl Resolver {
    pub fn new(cluster: Arc<dyn ClusterApi>, reader: ReaderConfig, retry: RetryPolicy) -> Self {
        let follow = reader.options.follow;
        Self {
            cluster,
            reader,
            retry,
            follow,
        }
    }

    /// Resolve `spec` and feed every member pod into `merger`.
    ///
    /// Without follow this returns once every reader has been started. With
    /// follow it keeps watching until the merger is cancelled.
    pub async fn resolve(&self, spec: &ResourceSpecifier, merger: &Merger<LogLine>) -> Result<()> {
        match (spec.kind, self.follow) {
            (ResourceKind::Pod, false) => self.list_pods(spec, merger).await,
            (ResourceKind::Controller(kind), false) => {
                self.list_controllers(spec, kind, merger).await
            }
            (ResourceKind::Pod, true) => {
                let scope = MemberScope {
                    namespace: spec.namespace.clone(),
                    selector: None,
                    name_filter: Some(spec.pattern.clone()),
                    owner: None,
                };
                let cancel = merger.cancellation_token().child_token();
                self.watch_members(scope, merger.clone(), cancel).await
            }
            (ResourceKind::Controller(kind), true) => {
                self.watch_controllers(spec, kind, merger).await
            }
        }
    }

    async fn list_pods(&self, spec: &ResourceSpecifier, merger: &Merger<LogLine>) -> Result<()> {
        let pods = self
            .cluster
            .list_pods(&spec.namespace, None)
            .await
            .map_err(|source| Error::Resolution {
                namespace: spec.namespace.clone(),
                kind: ResourceKind::Pod,
                name: spec.pattern.to_string(),
                source,
            })?;

        let scope = MemberScope {
            namespace: spec.namespace.clone(),
            selector: None,
            name_filter: Some(spec.pattern.clone()),
            owner: None,
        };
        for pod in pods.iter().filter(|p| scope.accepts(p)) {
            debug!("[{}] pod {} matches", spec.namespace, pod.name);
            merger.add(pod_reader(self.cluster.clone(), scope.target(pod), self.reader.clone()));
        }
        Ok(())
    }

    async fn list_controllers(
        &self,
        spec: &ResourceSpecifier,
        kind: ControllerKind,
        merger: &Merger<LogLine>,
    ) -> Result<()> {
        let controllers = self
            .cluster
            .list_controllers(&spec.namespace, kind)
            .await
            .map_err(|source| Error::Resolution {
                namespace: spec.namespace.clone(),
                kind: ResourceKind::Controller(kind),
                name: spec.pattern.to_string(),
                source,
            })?;

        for controller in controllers.iter().filter(|c| spec.matches(&c.name)) {
            debug!("[{}] {} {} matches", spec.namespace, kind, controller.name);
            let selector = match member_selector(controller, kind) {
                Ok(Some(selector)) => selector,
                Ok(None) => continue,
                Err(e) => {
                    if !merger.send(Err(e)).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            let pods = match self.cluster.list_pods(&spec.namespace, Some(&selector)).await {
                Ok(pods) => pods,
                Err(source) => {
                    // Siblings still get their logs
                    let err = Error::Resolution {
                        namespace: spec.namespace.clone(),
                        kind: ResourceKind::Controller(kind),
                        name: controller.name.clone(),
                        source,
                    };
                    if !merger.send(Err(err)).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let scope = MemberScope {
                namespace: spec.namespace.clone(),
                selector: Some(selector),
                name_filter: None,
                owner: Some((controller.name.clone(), kind)),
            };
            for pod in &pods {
                let target = scope.target(pod);
                let reader = pod_reader(self.cluster.clone(), target, self.reader.clone());
                merger.add(reader);
            }
        }
        Ok(())
    }

    async fn watch_controllers(
        &self,
        spec: &ResourceSpecifier,
        kind: ControllerKind,
        merger: &Merger<LogLine>,
    ) -> Result<()> {
        let cancel = merger.cancellation_token().child_token();
        let mut events = self.cluster.watch_controllers(&spec.namespace, kind);
        let mut active: HashMap<String, CancellationToken> = HashMap::new();
        let mut established = false;
        debug!("[{}] watching {}s", spec.namespace, kind);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };
            let event = match event {
                None => break,
                Some(Ok(event)) => {
                    // Init is emitted before the initial list is attempted
                    established |= !matches!(event, Event::Init);
                    event
                }
                Some(Err(source)) if !established => {
                    return Err(Error::Watch {
                        namespace: spec.namespace.clone(),
                        kind: ResourceKind::Controller(kind),
                        source,
                    });
                }
                Some(Err(e)) => {
                    warn!("[{}] {} watch error: {}", spec.namespace, kind, e);
                    continue;
                }
            };

            match event {
                Event::Apply(controller) | Event::InitApply(controller) => {
                    if !spec.matches(&controller.name) || active.contains_key(&controller.name) {
                        continue;
                    }
                    let selector = match member_selector(&controller, kind) {
                        Ok(Some(selector)) => selector,
                        Ok(None) => continue,
                        Err(e) => {
                            if !merger.send(Err(e)).await {
                                break;
                            }
                            continue;
                        }
                    };
                    info!(
                        "[{}] NEW {}: {}",
                        spec.namespace,
                        kind.to_string().to_uppercase(),
                        controller.name
                    );
                    let token = cancel.child_token();
                    active.insert(controller.name.clone(), token.clone());

                    let scope = MemberScope {
                        namespace: spec.namespace.clone(),
                        selector: Some(selector),
                        name_filter: None,
                        owner: Some((controller.name.clone(), kind)),
                    };
                    let this = self.clone();
                    let members = merger.clone();
                    merger.spawn(async move {
                        if let Err(e) = this.watch_members(scope, members.clone(), token).await {
                            members.send(Err(e)).await;
                        }
                    });
                }
                Event::Delete(controller) => {
                    if let Some(token) = active.remove(&controller.name) {
                        info!(
                            "[{}] {} DELETED: {}",
                            spec.namespace,
                            kind.to_string().to_uppercase(),
                            controller.name
                        );
                        token.cancel();
                    }
                }
                Event::Init | Event::InitDone => {}
            }
        }
        Ok(())
    }

    /// Watch the pods of one scope and start a reader for every new member.
    async fn watch_members(
        &self,
        scope: MemberScope,
        merger: Merger<LogLine>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut events = self.cluster.watch_pods(&scope.namespace, scope.selector.as_ref());
        let mut membership = PodMembership::default();
        let mut established = false;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };
            let event = match event {
                None => break,
                Some(Ok(event)) => {
                    // Init is emitted before the initial list is attempted
                    established |= !matches!(event, Event::Init);
                    event
                }
                Some(Err(source)) if !established => {
                    return Err(Error::Watch {
                        namespace: scope.namespace.clone(),
                        kind: scope.watched_kind(),
                        source,
                    });
                }
                Some(Err(e)) => {
                    warn!("[{}] pod watch error: {}", scope.namespace, e);
                    continue;
                }
            };

            match event {
                Event::Apply(pod) | Event::InitApply(pod) => {
                    if !scope.accepts(&pod) {
                        continue;
                    }
                    match membership.apply(&pod.name, &cancel) {
                        MembershipChange::Added(startup) => {
                            info!("[{}] NEW POD: {}", scope.namespace, pod.name);
                            self.spawn_follow_reader(scope.target(&pod), startup, &merger);
                        }
                        MembershipChange::Updated => {
                            debug!("[{}] pod {} updated", scope.namespace, pod.name);
                        }
                    }
                }
                Event::Delete(pod) => {
                    if membership.delete(&pod.name) {
                        info!("[{}] POD DELETED: {}", scope.namespace, pod.name);
                    }
                }
                Event::Init => debug!("[{}] initializing pod watcher", scope.namespace),
                Event::InitDone => debug!(
                    "[{}] pod watcher initialization complete, {} pods",
                    scope.namespace,
                    membership.len()
                ),
            }
        }
        Ok(())
    }

    /// Acquire a new pod's logs under the retry policy, then stream them.
    /// Failed attempts are logged and never reach the consumer.
    fn spawn_follow_reader(
        &self,
        target: PodTarget,
        startup: CancellationToken,
        merger: &Merger<LogLine>,
    ) {
        let cluster = self.cluster.clone();
        let config = self.reader.clone();
        let policy = self.retry;
        let sink = merger.clone();

        merger.spawn(async move {
            let opened = policy
                .retry(&startup, || open_pod_log(cluster.as_ref(), &target, &config))
                .await;
            match opened {
                Ok(bytes) => {
                    info!(
                        "[{}] start streaming logs from pod {}",
                        target.namespace, target.pod_name
                    );
                    let namespace = target.namespace.clone();
                    let pod_name = target.pod_name.clone();
                    sink.pump(log_lines(bytes, target, &config)).await;
                    info!("[{}] end streaming logs from pod {}", namespace, pod_name);
                }
                Err(RetryError::Cancelled) => {
                    debug!("[{}] gave up waiting for pod {}", target.namespace, target.pod_name);
                }
                Err(RetryError::Exhausted { attempts, last }) => {
                    warn!(
                        "[{}] giving up on pod {} after {} attempts: {}",
                        target.namespace, target.pod_name, attempts, last
                    );
                }
            }
        });
    }
}

/// Selector used to find a controller's pods.
///
/// Controllers without a usable selector are skipped (Ok(None)); selectors
/// that can't be rendered for the API server are resolution errors.
fn member_selector(
    controller: &ControllerRef,
    kind: ControllerKind,
) -> Result<Option<LabelSelector>> {
    let Some(selector) = controller.selector.as_ref().filter(|s| !is_empty_selector(s)) else {
        warn!(
            "[{}] {} {} has no pod selector, skipping",
            controller.namespace, kind, controller.name
        );
        return Ok(None);
    };
    selector_to_string(selector).map_err(|reason| Error::Selector {
        kind: ResourceKind::Controller(kind),
        name: controller.name.clone(),
        reason,
    })?;
    Ok(Some(selector.clone()))
}
