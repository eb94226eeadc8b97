//! Backend construction from the `[backend]` config section.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use evalgrid_core::config::{parse_duration, BackendSection, CloudSection, ClusterSection};
use evalgrid_core::ConfigError;

use crate::adapter::BackendAdapter;
use crate::cloud::{CloudBackend, CloudEnvironment};
use crate::cluster::{ClusterBackend, ClusterConfig};
use crate::command::TaskCommand;
use crate::http::HttpCloudApi;
use crate::local::LocalBackend;

/// Bearer token for the managed job service, if the service needs one.
pub const CLOUD_TOKEN_ENV: &str = "EVALGRID_CLOUD_TOKEN";

/// Build the adapter described by `section`.
pub fn build_backend(section: &BackendSection) -> Result<Arc<dyn BackendAdapter>, ConfigError> {
    let backend: Arc<dyn BackendAdapter> = match section {
        BackendSection::Local(local) => {
            let command = TaskCommand::from_argv(&local.command)?.with_env(local.env.clone());
            let interval = nonzero_poll_interval(
                local.poll_interval.as_deref(),
                LocalBackend::DEFAULT_POLL_INTERVAL,
            )?;
            Arc::new(
                LocalBackend::with_command(&local.work_dir, command).with_poll_interval(interval),
            )
        }
        BackendSection::Cluster(cluster) => Arc::new(ClusterBackend::new(cluster_config(cluster)?)?),
        BackendSection::Cloud(cloud) => Arc::new(cloud_backend(cloud)?),
    };
    info!(backend = backend.name(), poll_interval = ?backend.poll_interval(), "backend configured");
    Ok(backend)
}

fn poll_interval(raw: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(s) => parse_duration(s).ok_or_else(|| {
            ConfigError::invalid("backend.poll_interval", format!("invalid duration `{s}`"))
        }),
    }
}

fn nonzero_poll_interval(raw: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    let interval = poll_interval(raw, default)?;
    if interval.is_zero() {
        return Err(ConfigError::invalid(
            "backend.poll_interval",
            "must be greater than zero",
        ));
    }
    Ok(interval)
}

fn cluster_config(section: &ClusterSection) -> Result<ClusterConfig, ConfigError> {
    Ok(ClusterConfig {
        work_dir: section.work_dir.clone(),
        command: TaskCommand::from_argv(&section.command)?,
        partition: section.partition.clone(),
        priority_class: section.priority_class.clone(),
        quota_tag: section.quota_tag.clone(),
        workers_per_unit: section.workers_per_unit,
        extra_args: section.extra_args.clone(),
        job_name_prefix: section.job_name_prefix.clone(),
        poll_interval: poll_interval(
            section.poll_interval.as_deref(),
            ClusterBackend::DEFAULT_POLL_INTERVAL,
        )?,
    })
}

fn cloud_backend(section: &CloudSection) -> Result<CloudBackend, ConfigError> {
    if section.endpoint.trim().is_empty() {
        return Err(ConfigError::Missing("backend.endpoint"));
    }
    let env = CloudEnvironment::new(
        section.workspace_id.clone(),
        section.image.clone(),
        section.bootstrap_script.clone(),
    )?;
    let interval = nonzero_poll_interval(
        section.poll_interval.as_deref(),
        CloudBackend::DEFAULT_POLL_INTERVAL,
    )?;

    info!(
        workspace = env.workspace_id(),
        image = env.image(),
        endpoint = %section.endpoint,
        "cloud environment validated"
    );

    let mut api = HttpCloudApi::new(section.endpoint.clone());
    if let Ok(token) = std::env::var(CLOUD_TOKEN_ENV) {
        api = api.with_token(token);
    }

    Ok(CloudBackend::new(
        env,
        Arc::new(api),
        &section.work_dir,
        TaskCommand::from_argv(&section.command)?,
    )
    .with_worker_count(section.workers_per_unit)
    .with_job_name_prefix(section.job_name_prefix.clone())
    .with_poll_interval(interval))
}
