use std::{fmt::Debug, future::ready};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{DeleteParams, ListParams, PostParams, WatchEvent as ApiEvent, WatchParams},
    core::NamespaceResourceScope,
    Api, Client, Resource,
};
use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::{
    domain::{
        model::Application,
        port::{ApplicationRepository, EventStream, WatchEvent, WatchScope, WatchSource},
    },
    error::Error,
};

/// Applications stored as custom resources in one namespace.
pub struct KubernetesApplications {
    pub client: Client,
    pub namespace: String,
}

impl KubernetesApplications {
    fn api(&self) -> Api<Application> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ApplicationRepository for KubernetesApplications {
    async fn get(&self, name: &str) -> Result<Application, Error> {
        Ok(self.api().get(name).await?)
    }

    async fn list(&self) -> Result<Vec<Application>, Error> {
        Ok(self.api().list(&ListParams::default()).await?.items)
    }

    async fn create(&self, application: &Application) -> Result<Application, Error> {
        Ok(self.api().create(&PostParams::default(), application).await?)
    }

    async fn update(&self, application: &Application) -> Result<Application, Error> {
        let name = application
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("cannot update an application without a name"))?;
        Ok(self
            .api()
            .replace(name, &PostParams::default(), application)
            .await?)
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        match self.api().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Already gone.
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Watch streams for any namespaced kind.
pub struct KubernetesWatch {
    pub client: Client,
    pub namespace: String,
}

enum Step<K> {
    Event(Result<WatchEvent<K>, Error>),
    Skip,
    Expired,
}

fn translate<K>(event: kube::Result<ApiEvent<K>>) -> Step<K> {
    match event {
        Ok(ApiEvent::Added(object)) => Step::Event(Ok(WatchEvent::Added(object))),
        Ok(ApiEvent::Modified(object)) => Step::Event(Ok(WatchEvent::Modified(object))),
        Ok(ApiEvent::Deleted(object)) => Step::Event(Ok(WatchEvent::Deleted(object))),
        Ok(ApiEvent::Bookmark(_)) => Step::Skip,
        // 410 Gone: the resource version expired, the caller has to relist.
        Ok(ApiEvent::Error(e)) if e.code == 410 => Step::Expired,
        Ok(ApiEvent::Error(e)) => Step::Event(Err(kube::Error::Api(e).into())),
        // Read failures mid-stream are fatal too; only a clean end or 410 reopens.
        Err(e) => Step::Event(Err(e.into())),
    }
}

#[async_trait]
impl<K> WatchSource<K> for KubernetesWatch
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn watch(&self, scope: &WatchScope) -> Result<EventStream<K>, Error> {
        let (api, params) = match scope {
            WatchScope::All => (
                Api::<K>::namespaced(self.client.clone(), &self.namespace),
                WatchParams::default(),
            ),
            WatchScope::Named { name, namespace } => (
                Api::<K>::namespaced(
                    self.client.clone(),
                    namespace.as_deref().unwrap_or(&self.namespace),
                ),
                WatchParams::default().fields(&format!("metadata.name={name}")),
            ),
        };
        debug!("Opening watch on {:?}", scope);
        let events = api.watch(&params, "0").await?;
        Ok(events
            .map(translate)
            .take_while(|step| {
                let open = !matches!(step, Step::Expired);
                if !open {
                    info!("Watch expired, closing stream");
                }
                ready(open)
            })
            .filter_map(|step| {
                ready(match step {
                    Step::Event(event) => Some(event),
                    Step::Skip | Step::Expired => None,
                })
            })
            .boxed())
    }
}
