use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crucible_domain::OutputStream;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::driver::{Driver, Handle, LogStream, WaitOutcome, WaitReason};
use crate::error::DriverError;
use crate::limits::SandboxLimits;

const IMAGE_BY_LANGUAGE: &[(&str, &str)] = &[
    ("python", "python:3.12-slim"),
    ("python3", "python:3.12-slim"),
    ("javascript", "node:20-slim"),
    ("node", "node:20-slim"),
    ("nodejs", "node:20-slim"),
];

const COMMAND_BY_LANGUAGE: &[(&str, &[&str])] = &[
    ("python", &["python3", "-c"]),
    ("python3", &["python3", "-c"]),
    ("javascript", &["node", "-e"]),
    ("node", &["node", "-e"]),
    ("nodejs", &["node", "-e"]),
];

fn image_for(language: &str) -> Result<&'static str, DriverError> {
    IMAGE_BY_LANGUAGE
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, image)| *image)
        .ok_or_else(|| DriverError::UnsupportedLanguage(language.to_string()))
}

fn command_for(language: &str) -> Result<&'static [&'static str], DriverError> {
    COMMAND_BY_LANGUAGE
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, argv)| *argv)
        .ok_or_else(|| DriverError::UnsupportedLanguage(language.to_string()))
}

fn job_name(handle: &Handle) -> Result<String, DriverError> {
    handle
        .get("job")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| DriverError::Internal("malformed kubernetes driver handle".to_string()))
}

fn namespace(handle: &Handle) -> String {
    handle.get("namespace").and_then(|v| v.as_str()).unwrap_or("default").to_string()
}

/// Runs a submission as a single-pod `batch/v1` Job — the strongest
/// isolation backend, for clusters that run untrusted code at real scale.
///
/// Each evaluation gets its own Job named `crucible-sbx-<uuid>`, a
/// non-root, read-only-root-filesystem, no-new-privileges pod spec, and CPU
/// and memory resource limits derived directly from [`SandboxLimits`].
pub struct K8sJobDriver {
    client: Client,
    namespace: String,
}

impl K8sJobDriver {
    pub async fn new(namespace: impl Into<String>) -> Result<Self, DriverError> {
        let client = Client::try_default()
            .await
            .map_err(|e| DriverError::Internal(format!("kubernetes client init: {e}")))?;
        Ok(Self { client, namespace: namespace.into() })
    }

    fn jobs_api(&self, ns: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn pods_api(&self, ns: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), ns)
    }

    async fn find_pod_name(&self, ns: &str, job: &str) -> Result<Option<String>, DriverError> {
        let pods = self.pods_api(ns);
        let lp = ListParams::default().labels(&format!("job-name={job}"));
        let list = pods.list(&lp).await.map_err(|e| DriverError::Internal(format!("list pods: {e}")))?;
        Ok(list.items.into_iter().next().and_then(|p| p.metadata.name))
    }
}

#[async_trait]
impl Driver for K8sJobDriver {
    fn name(&self) -> &'static str {
        "k8s-job"
    }

    async fn create(&self, code: &str, language: &str, limits: &SandboxLimits) -> Result<Handle, DriverError> {
        let image = image_for(language)?;
        let argv = command_for(language)?;

        let job_name = format!("crucible-sbx-{}", Uuid::new_v4());
        let mut args: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        args.push(code.to_string());

        let mut limits_map = BTreeMap::new();
        limits_map.insert("memory".to_string(), Quantity(format!("{}", limits.memory_bytes)));
        limits_map.insert("cpu".to_string(), Quantity(format!("{}m", limits.cpu_millis)));

        let job = Job {
            metadata: ObjectMeta {
                name: Some(job_name.clone()),
                labels: Some(BTreeMap::from([("app".to_string(), "crucible-sandbox".to_string())])),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                ttl_seconds_after_finished: Some(300),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta::default()),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        automount_service_account_token: Some(false),
                        containers: vec![Container {
                            name: "submission".to_string(),
                            image: Some(image.to_string()),
                            command: Some(args[..1].to_vec()),
                            args: Some(args[1..].to_vec()),
                            resources: Some(ResourceRequirements {
                                limits: Some(limits_map.clone()),
                                requests: Some(limits_map),
                                ..Default::default()
                            }),
                            security_context: Some(SecurityContext {
                                run_as_non_root: Some(true),
                                read_only_root_filesystem: Some(limits.read_only_root),
                                allow_privilege_escalation: Some(false),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        let spec_value =
            serde_json::to_value(&job).map_err(|e| DriverError::Internal(format!("serialize job spec: {e}")))?;

        Ok(json!({ "driver": "k8s-job", "job": job_name, "namespace": self.namespace, "spec": spec_value }))
    }

    async fn start(&self, handle: &Handle) -> Result<(), DriverError> {
        let ns = namespace(handle);
        let spec_value = handle
            .get("spec")
            .cloned()
            .ok_or_else(|| DriverError::Internal("handle missing job spec".to_string()))?;
        let job: Job = serde_json::from_value(spec_value)
            .map_err(|e| DriverError::Internal(format!("deserialize job spec: {e}")))?;

        self.jobs_api(&ns)
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| DriverError::StartFailed(format!("create job: {e}")))?;
        info!(job = job.metadata.name.as_deref().unwrap_or("?"), namespace = %ns, "kubernetes job created");
        Ok(())
    }

    async fn wait(&self, handle: &Handle, timeout: Duration) -> Result<WaitOutcome, DriverError> {
        let ns = namespace(handle);
        let name = job_name(handle)?;
        let jobs = self.jobs_api(&ns);

        let poll = async {
            loop {
                let job = jobs.get(&name).await.map_err(|e| DriverError::Internal(format!("get job: {e}")))?;
                if let Some(status) = job.status {
                    if status.succeeded.unwrap_or(0) > 0 {
                        return Ok(WaitOutcome { exit_code: 0, reason: WaitReason::Normal });
                    }
                    if status.failed.unwrap_or(0) > 0 {
                        return Ok(WaitOutcome { exit_code: 1, reason: WaitReason::Normal });
                    }
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(job = %name, "kubernetes job exceeded its wait timeout, killing");
                self.kill(handle).await?;
                Ok(WaitOutcome { exit_code: 124, reason: WaitReason::Timeout })
            }
        }
    }

    /// The container runtime merges a pod's stdout and stderr into one log
    /// stream before kubelet ever sees it — there is no way to recover which
    /// stream a line came from. Every chunk is tagged `Stdout`; a failed
    /// evaluation's captured stderr will be empty on this backend, unlike
    /// the subprocess-based ones, which tag at the source.
    async fn stream_logs(&self, handle: &Handle) -> Result<LogStream, DriverError> {
        let ns = namespace(handle);
        let name = job_name(handle)?;

        let pod_name = self
            .find_pod_name(&ns, &name)
            .await?
            .ok_or_else(|| DriverError::Internal(format!("no pod yet for job {name}")))?;

        let pods = self.pods_api(&ns);
        let lp = LogParams { follow: true, ..Default::default() };
        let stream = pods
            .log_stream(&pod_name, &lp)
            .await
            .map_err(|e| DriverError::Internal(format!("log stream: {e}")))?
            .map(|chunk| (OutputStream::Stdout, chunk.unwrap_or_else(|_| Bytes::new())));
        Ok(Box::pin(stream))
    }

    async fn kill(&self, handle: &Handle) -> Result<(), DriverError> {
        let ns = namespace(handle);
        let name = job_name(handle)?;
        let patch = json!({ "spec": { "suspend": true } });
        let _ = self.jobs_api(&ns).patch(&name, &PatchParams::default(), &Patch::Merge(patch)).await;
        let dp = DeleteParams::foreground();
        let _ = self.jobs_api(&ns).delete(&name, &dp).await;
        Ok(())
    }

    async fn destroy(&self, handle: &Handle) -> Result<(), DriverError> {
        let ns = namespace(handle);
        let name = job_name(handle)?;
        let dp = DeleteParams::background();
        match self.jobs_api(&ns).delete(&name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(DriverError::Internal(format!("delete job: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_and_command_are_mapped_for_every_supported_language() {
        for lang in ["python", "python3", "javascript", "node", "nodejs"] {
            assert!(image_for(lang).is_ok());
            assert!(command_for(lang).is_ok());
        }
    }

    #[test]
    fn unmapped_language_is_rejected() {
        assert!(image_for("cobol").is_err());
        assert!(command_for("cobol").is_err());
    }
}
