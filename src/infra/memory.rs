use std::{collections::BTreeMap, sync::Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use kube::ResourceExt;
use log::debug;
use rand::Rng;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    domain::{
        model::{Application, ApplicationStatus},
        port::{ApplicationRepository, EventStream, WatchEvent, WatchScope, WatchSource},
    },
    error::Error,
};

const EVENT_BUFFER: usize = 256;

/// Control plane kept in process memory.
///
/// Enforces resource versions like the API server does, so stale writes
/// conflict. Used as the `memory` backend and by the service tests.
pub struct InMemoryControlPlane {
    namespace: String,
    state: Mutex<State>,
}

struct State {
    applications: BTreeMap<String, Application>,
    revision: u64,
    injected_conflicts: usize,
    events: broadcast::Sender<WatchEvent<Application>>,
}

impl InMemoryControlPlane {
    pub fn new(namespace: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            namespace: namespace.to_string(),
            state: Mutex::new(State {
                applications: BTreeMap::new(),
                revision: 0,
                injected_conflicts: 0,
                events,
            }),
        }
    }

    /// Makes the next `count` updates fail with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.state.lock().expect("poisoned lock").injected_conflicts = count;
    }

    /// Ends every open watch stream, as an API server does at a relist boundary.
    pub fn close_watches(&self) {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        self.state.lock().expect("poisoned lock").events = events;
    }

    /// Records observed state for `name`, the way a controller would.
    pub fn set_status(&self, name: &str, status: ApplicationStatus) -> Result<Application, Error> {
        let mut state = self.state.lock().expect("poisoned lock");
        let revision = state.next_revision();
        let application = state
            .applications
            .get_mut(name)
            .ok_or_else(|| not_found(name))?;
        application.status = Some(status);
        application.metadata.resource_version = Some(revision);
        let application = application.clone();
        state.publish(WatchEvent::Modified(application.clone()));
        Ok(application)
    }
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn publish(&self, event: WatchEvent<Application>) {
        // No receiver simply means nobody is watching.
        let _ = self.events.send(event);
    }
}

fn not_found(name: &str) -> Error {
    Error::NotFound(format!("applications.rokku.io \"{name}\""))
}

fn in_scope(scope: &WatchScope, application: &Application) -> bool {
    match scope {
        WatchScope::All => true,
        WatchScope::Named { name, namespace } => {
            application.name_any() == *name
                && namespace
                    .as_ref()
                    .map_or(true, |namespace| application.namespace().as_ref() == Some(namespace))
        }
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryControlPlane {
    async fn get(&self, name: &str) -> Result<Application, Error> {
        self.state
            .lock()
            .expect("poisoned lock")
            .applications
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list(&self) -> Result<Vec<Application>, Error> {
        Ok(self
            .state
            .lock()
            .expect("poisoned lock")
            .applications
            .values()
            .cloned()
            .collect())
    }

    async fn create(&self, application: &Application) -> Result<Application, Error> {
        let name = application
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow!("application name is required"))?;
        let mut state = self.state.lock().expect("poisoned lock");
        if state.applications.contains_key(&name) {
            return Err(anyhow!("applications.rokku.io \"{}\" already exists", name).into());
        }
        let mut created = application.clone();
        created.metadata.namespace = Some(self.namespace.clone());
        created.metadata.uid = Some(format!("{:032x}", rand::thread_rng().gen::<u128>()));
        created.metadata.generation = Some(1);
        created.metadata.resource_version = Some(state.next_revision());
        state.applications.insert(name, created.clone());
        state.publish(WatchEvent::Added(created.clone()));
        Ok(created)
    }

    async fn update(&self, application: &Application) -> Result<Application, Error> {
        let name = application.name_any();
        let mut state = self.state.lock().expect("poisoned lock");
        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(Error::Conflict(name));
        }
        let current = state
            .applications
            .get(&name)
            .cloned()
            .ok_or_else(|| not_found(&name))?;
        if current.metadata.resource_version != application.metadata.resource_version {
            return Err(Error::Conflict(name));
        }

        let mut updated = application.clone();
        updated.status = current.status.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.namespace = current.metadata.namespace.clone();
        updated.metadata.generation = if current.spec == updated.spec {
            current.metadata.generation
        } else {
            current.metadata.generation.map(|generation| generation + 1)
        };
        updated.metadata.resource_version = Some(state.next_revision());
        state.applications.insert(name, updated.clone());
        state.publish(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().expect("poisoned lock");
        if let Some(deleted) = state.applications.remove(name) {
            state.publish(WatchEvent::Deleted(deleted));
        }
        Ok(())
    }
}

#[async_trait]
impl WatchSource<Application> for InMemoryControlPlane {
    async fn watch(&self, scope: &WatchScope) -> Result<EventStream<Application>, Error> {
        let (current, receiver) = {
            let state = self.state.lock().expect("poisoned lock");
            let current: Vec<Application> = state
                .applications
                .values()
                .filter(|application| in_scope(scope, application))
                .cloned()
                .collect();
            (current, state.events.subscribe())
        };

        let initial = stream::iter(current.into_iter().map(|application| Ok::<_, Error>(WatchEvent::Added(application))));
        let live = stream::unfold((receiver, scope.clone()), |(mut receiver, scope)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if in_scope(&scope, event.object()) => {
                        return Some((Ok::<_, Error>(event), (receiver, scope)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Watch fell {} events behind, closing it", missed);
                        return None;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(initial.chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{model::RunOptions, new_application};

    fn app(name: &str) -> Application {
        new_application(
            "image",
            RunOptions {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn stale_revisions_conflict() {
        let control_plane = InMemoryControlPlane::new("default");
        let created = control_plane.create(&app("web")).await.unwrap();

        let mut first = created.clone();
        first.spec.image = "image2".to_string();
        control_plane.update(&first).await.unwrap();

        let mut second = created;
        second.spec.image = "image3".to_string();
        assert!(control_plane.update(&second).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn generation_follows_spec_changes() {
        let control_plane = InMemoryControlPlane::new("default");
        let created = control_plane.create(&app("web")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));

        let mut labelled = created.clone();
        labelled.labels_mut().insert("tier".to_string(), "web".to_string());
        let labelled = control_plane.update(&labelled).await.unwrap();
        assert_eq!(labelled.metadata.generation, Some(1));

        let mut stopped = labelled;
        stopped.spec.stop = Some(true);
        assert_eq!(control_plane.update(&stopped).await.unwrap().metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let control_plane = InMemoryControlPlane::new("default");
        control_plane.create(&app("web")).await.unwrap();

        control_plane.delete("web").await.unwrap();
        control_plane.delete("web").await.unwrap();
        assert!(control_plane.get("web").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn named_watch_only_sees_its_object() {
        let control_plane = InMemoryControlPlane::new("default");
        control_plane.create(&app("web")).await.unwrap();
        control_plane.create(&app("db")).await.unwrap();

        let events = control_plane
            .watch(&WatchScope::Named {
                name: "web".to_string(),
                namespace: Some("default".to_string()),
            })
            .await
            .unwrap();

        control_plane.set_status("db", ApplicationStatus::default()).unwrap();
        control_plane
            .set_status(
                "web",
                ApplicationStatus {
                    ready: true,
                    ..Default::default()
                },
            )
            .unwrap();
        control_plane.delete("web").await.unwrap();
        control_plane.close_watches();

        let events: Vec<_> = events.map(Result::unwrap).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], WatchEvent::Added(app) if app.name_any() == "web"));
        assert!(matches!(&events[1], WatchEvent::Modified(app) if app.status.as_ref().unwrap().ready));
        assert!(matches!(&events[2], WatchEvent::Deleted(_)));
    }
}
