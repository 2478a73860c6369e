use chrono::{DateTime, Utc};
use futures::io::AsyncBufReadExt;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::cluster::{ClusterApi, LogByteStream};
use crate::error::Error;
use crate::projection::FieldProjection;
use crate::types::{LogLine, LogOptions, ResourceKind};

/// One pod to read, together with the resource context its lines are tagged with.
#[derive(Debug, Clone)]
pub struct PodTarget {
    pub namespace: String,
    pub pod_name: String,
    pub resource_name: String,
    pub resource_kind: ResourceKind,
}

/// How pod log streams are opened and turned into lines.
#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    pub options: LogOptions,
    pub projection: Arc<FieldProjection>,
}

/// Open the log stream of a pod.
pub async fn open_pod_log(
    cluster: &dyn ClusterApi,
    target: &PodTarget,
    config: &ReaderConfig,
) -> Result<LogByteStream, Error> {
    let stream = cluster
        .pod_log_stream(&target.namespace, &target.pod_name, &config.options)
        .await
        .map_err(|e| Error::log_stream(&target.namespace, &target.pod_name, e))?;
    debug!("[{}] begin logs of pod {}", target.namespace, target.pod_name);
    Ok(stream)
}

/// Split an opened byte stream into log lines.
///
/// A read failure is yielded once as an error; normal end of stream simply
/// ends the sequence. Bytes that aren't valid UTF-8 are replaced rather than
/// failing the line.
pub fn log_lines(
    bytes: LogByteStream,
    target: PodTarget,
    config: &ReaderConfig,
) -> impl Stream<Item = Result<LogLine, Error>> + Send + 'static + use<> {
    let projection = config.projection.clone();
    let timestamps = config.options.timestamps;
    raw_lines(bytes).map(move |line| match line {
        Ok(raw) => Ok(LogLine {
            namespace: target.namespace.clone(),
            resource_name: target.resource_name.clone(),
            resource_kind: target.resource_kind,
            pod_name: target.pod_name.clone(),
            timestamp: if timestamps { parse_timestamp(&raw) } else { None },
            text: projection.apply(&raw),
        }),
        Err(e) => Err(Error::log_stream(&target.namespace, &target.pod_name, e)),
    })
}

/// Newline separated records without their terminator; a read error ends
/// the sequence after being yielded.
fn raw_lines(bytes: LogByteStream) -> impl Stream<Item = std::io::Result<String>> + Send + 'static {
    stream::unfold(Some(bytes), |reader| async move {
        let mut reader = reader?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Lazily open a pod's logs on first pull and yield its lines.
///
/// Failing to open yields a single error element.
pub fn pod_reader(
    cluster: Arc<dyn ClusterApi>,
    target: PodTarget,
    config: ReaderConfig,
) -> impl Stream<Item = Result<LogLine, Error>> + Send + 'static {
    stream::once(async move {
        let bytes = open_pod_log(cluster.as_ref(), &target, &config).await?;
        Ok::<_, Error>(log_lines(bytes, target, &config))
    })
    .try_flatten()
}

/// Timestamp prepended by the API server when `timestamps` is requested.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (prefix, _) = raw.split_once(' ')?;
    DateTime::parse_from_rfc3339(prefix)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
