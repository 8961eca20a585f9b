use std::{future::Future, sync::Arc, time::Duration};

use log::{info, warn};
use model::{Application, ApplicationSpec, RunOptions, UpdateRequest};
use port::{ApplicationRepository, WatchSource};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;

use crate::error::Error;

pub mod merge;
pub mod model;
pub mod poll;
pub mod port;
pub mod retry;
pub mod wait;

use merge::apply_update;
use retry::{retry_on_conflict, ConflictRetry};
use wait::{wait_for_object, WaitConfig};

/// Tunables threaded into every client operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub wait: WaitConfig,
    pub poll_interval: Duration,
    pub conflict_retry: ConflictRetry,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            poll_interval: Duration::from_secs(5),
            conflict_retry: ConflictRetry::default(),
        }
    }
}

pub struct ApplicationService {
    pub repository: Arc<dyn ApplicationRepository + Send + Sync>,
    pub watcher: Arc<dyn WatchSource<Application> + Send + Sync>,
    pub config: ClientConfig,
}

/// Builds a fresh application document with run defaults applied.
pub fn new_application(image: &str, options: RunOptions) -> Application {
    let name = options
        .name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(generate_name);
    let mut application = Application::new(
        &name,
        ApplicationSpec {
            image: image.to_string(),
            stop: None,
            deploy_params: options.deploy_params,
            endpoints: options.endpoints,
            volumes: options.volumes,
            secrets: options.secrets,
            services: options.services,
        },
    );
    application.metadata.annotations = Some(options.annotations);
    application.metadata.labels = Some(options.labels);
    application
}

fn generate_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("app-{suffix}")
}

impl ApplicationService {
    pub async fn run(&self, image: &str, options: RunOptions) -> Result<Application, Error> {
        let application = new_application(image, options);
        info!("Creating application {} from {}", application.metadata.name.as_deref().unwrap_or_default(), image);
        self.repository.create(&application).await
    }

    pub async fn get(&self, name: &str) -> Result<Application, Error> {
        self.repository.get(name).await
    }

    pub async fn list(&self) -> Result<Vec<Application>, Error> {
        self.repository.list().await
    }

    /// Applies `request` on the latest revision, rereading on every conflict.
    pub async fn update(&self, name: &str, request: &UpdateRequest) -> Result<Application, Error> {
        retry_on_conflict(self.config.conflict_retry, || async move {
            let existing = self.repository.get(name).await?;
            self.repository.update(&apply_update(&existing, request)).await
        })
        .await
    }

    pub async fn start(&self, name: &str) -> Result<Application, Error> {
        info!("Starting application {}", name);
        self.set_stop(name, false).await
    }

    pub async fn stop(&self, name: &str) -> Result<Application, Error> {
        info!("Stopping application {}", name);
        self.set_stop(name, true).await
    }

    async fn set_stop(&self, name: &str, stop: bool) -> Result<Application, Error> {
        retry_on_conflict(self.config.conflict_retry, || async move {
            let mut application = self.repository.get(name).await?;
            application.spec.stop = Some(stop);
            self.repository.update(&application).await
        })
        .await
    }

    /// Returns the deleted application, or `None` when it was already gone.
    pub async fn delete(&self, name: &str) -> Result<Option<Application>, Error> {
        let application = match self.repository.get(name).await {
            Ok(application) => application,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };
        self.repository.delete(name).await?;
        info!("Application {} deleted", name);
        Ok(Some(application))
    }

    /// Deletes the application and polls until the control plane no longer returns it.
    pub async fn delete_and_wait(&self, name: &str) -> Result<Option<Application>, Error> {
        let deleted = self.delete(name).await?;
        if deleted.is_some() {
            poll::wait_until_absent(
                || self.repository.get(name),
                self.config.poll_interval,
                self.config.wait.timeout,
            )
            .await?;
        }
        Ok(deleted)
    }

    /// Blocks until `predicate` holds for the named application.
    pub async fn wait_for<P>(&self, name: &str, predicate: P) -> Result<Application, Error>
    where
        P: FnMut(&Application) -> Result<bool, Error> + Send,
    {
        let application = self.repository.get(name).await?;
        wait_for_object(self.watcher.as_ref(), application, &self.config.wait, predicate)
            .await
            .map_err(|error| {
                if let Some(last) = error.last_observed() {
                    warn!("Gave up waiting on {}, last status {:?}", name, last.status);
                }
                Error::from(error)
            })
    }

    /// Waits until the control plane reports the current generation as stopped.
    pub async fn wait_stopped(&self, name: &str) -> Result<Application, Error> {
        self.wait_for(name, |application| Ok(is_stopped(application)))
            .await
    }
}

pub fn is_stopped(application: &Application) -> bool {
    application.spec.stop == Some(true)
        && application.status.as_ref().is_some_and(|status| {
            status.stopped && status.observed_generation >= application.metadata.generation
        })
}

/// Outcome of one target of a batch operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TargetResult {
    Done { name: String },
    Missing { name: String },
    Failed { name: String, error: String },
}

/// Runs `operation` on every target in order. A failing target is recorded
/// and the remaining targets still run.
pub async fn for_each_target<F, Fut, T>(names: &[String], mut operation: F) -> Vec<TargetResult>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let result = match operation(name.clone()).await {
            Ok(Some(_)) => TargetResult::Done { name: name.clone() },
            Ok(None) => TargetResult::Missing { name: name.clone() },
            Err(error) if error.is_not_found() => TargetResult::Missing { name: name.clone() },
            Err(error) => {
                warn!("{} failed: {}", name, error);
                TargetResult::Failed {
                    name: name.clone(),
                    error: error.to_string(),
                }
            }
        };
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use map_macro::btree_map;
    use serde_json::json;

    use super::*;
    use crate::{
        domain::model::{ApplicationStatus, EndpointBinding, VolumeBinding},
        infra::memory::InMemoryControlPlane,
    };

    fn service(control_plane: &Arc<InMemoryControlPlane>) -> ApplicationService {
        ApplicationService {
            repository: control_plane.clone(),
            watcher: control_plane.clone(),
            config: ClientConfig {
                wait: WaitConfig {
                    timeout: Duration::from_secs(60),
                    retry_backoff: Duration::from_millis(10),
                },
                poll_interval: Duration::from_secs(1),
                conflict_retry: ConflictRetry {
                    attempts: 5,
                    backoff: Duration::ZERO,
                },
            },
        }
    }

    #[test]
    fn run_defaults() {
        let application = new_application("image", RunOptions::default());
        let name = application.metadata.name.clone().unwrap();
        assert!(name.starts_with("app-"));
        assert_eq!(name.len(), "app-".len() + 7);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_eq!(application.metadata.annotations, Some(Default::default()));
        assert_eq!(application.metadata.labels, Some(Default::default()));
        assert_eq!(application.spec.stop, None);
    }

    #[tokio::test]
    async fn run_creates_in_the_namespace() {
        let control_plane = Arc::new(InMemoryControlPlane::new("team-a"));
        let service = service(&control_plane);

        let application = service
            .run(
                "image",
                RunOptions {
                    endpoints: vec![EndpointBinding {
                        target: "target".to_string(),
                        hostname: "hostname".to_string(),
                    }],
                    volumes: vec![VolumeBinding::new("volumeRequest", "volume")],
                    deploy_params: btree_map! { "key".to_string() => json!("value") },
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(application.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(application.spec.endpoints[0].target, "target");
        assert_eq!(application.spec.volumes[0].volume, "volume");
        assert_eq!(application.spec.deploy_params["key"], json!("value"));

        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.uid, application.metadata.uid);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_only_stop() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        service.stop(&name).await.unwrap();
        let stopped = service.get(&name).await.unwrap();
        assert_eq!(stopped.spec.stop, Some(true));
        assert_eq!(stopped.spec.image, application.spec.image);

        service.start(&name).await.unwrap();
        assert_eq!(service.get(&name).await.unwrap().spec.stop, Some(false));
    }

    #[tokio::test]
    async fn update_is_persisted() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        let updated = service
            .update(
                &name,
                &UpdateRequest {
                    image: Some("image2".to_string()),
                    labels: btree_map! { "tier".to_string() => "web".to_string() },
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(service.get(&name).await.unwrap(), updated);
        assert_eq!(updated.spec.image, "image2");
    }

    #[tokio::test]
    async fn update_survives_conflicts() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        control_plane.inject_conflicts(3);
        let updated = service
            .update(
                &name,
                &UpdateRequest {
                    image: Some("image2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.spec.image, "image2");
    }

    #[tokio::test]
    async fn update_surfaces_conflict_after_last_attempt() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        control_plane.inject_conflicts(10);
        let result = service.stop(&name).await;

        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn delete_twice() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        let deleted = service.delete(&name).await.unwrap().unwrap();
        assert_eq!(deleted.spec.image, "image");
        assert_eq!(deleted.metadata.uid, application.metadata.uid);

        assert_eq!(service.delete(&name).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_wait_polls_until_gone() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = service(&control_plane);
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        assert!(service.delete_and_wait(&name).await.unwrap().is_some());
        assert!(service.get(&name).await.unwrap_err().is_not_found());
        assert_eq!(service.delete_and_wait(&name).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_stopped_follows_the_control_plane() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = Arc::new(service(&control_plane));
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();
        let stopped = service.stop(&name).await.unwrap();

        let waiter = {
            let service = service.clone();
            let name = name.clone();
            tokio::spawn(async move { service.wait_stopped(&name).await })
        };
        tokio::task::yield_now().await;

        control_plane
            .set_status(
                &name,
                ApplicationStatus {
                    observed_generation: stopped.metadata.generation,
                    stopped: true,
                    ready: false,
                },
            )
            .unwrap();

        let converged = waiter.await.unwrap().unwrap();
        assert!(is_stopped(&converged));
    }

    #[tokio::test]
    async fn wait_survives_closed_streams() {
        let control_plane = Arc::new(InMemoryControlPlane::new("default"));
        let service = Arc::new(service(&control_plane));
        let application = service.run("image", RunOptions::default()).await.unwrap();
        let name = application.metadata.name.clone().unwrap();

        let waiter = {
            let service = service.clone();
            let name = name.clone();
            tokio::spawn(async move {
                service
                    .wait_for(&name, |application| {
                        Ok(application.status.as_ref().is_some_and(|status| status.ready))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        control_plane.close_watches();
        tokio::time::sleep(Duration::from_millis(50)).await;

        control_plane
            .set_status(
                &name,
                ApplicationStatus {
                    ready: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let converged = waiter.await.unwrap().unwrap();
        assert!(converged.status.unwrap().ready);
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let results = for_each_target(&names, |name| async move {
            match name.as_str() {
                "a" => Ok(Some(())),
                "b" => Err(Error::Fatal(anyhow!("boom"))),
                _ => Ok(None),
            }
        })
        .await;

        assert_eq!(
            results,
            vec![
                TargetResult::Done { name: "a".to_string() },
                TargetResult::Failed {
                    name: "b".to_string(),
                    error: "boom".to_string(),
                },
                TargetResult::Missing { name: "c".to_string() },
            ]
        );
    }
}
