use async_trait::async_trait;
use futures::stream::BoxStream;

use super::model::Application;
use crate::error::Error;

/// Object access on the control plane.
#[async_trait]
pub trait ApplicationRepository {
    async fn get(&self, name: &str) -> Result<Application, Error>;

    async fn list(&self) -> Result<Vec<Application>, Error>;

    async fn create(&self, application: &Application) -> Result<Application, Error>;

    /// Fails with [`Error::Conflict`] when `application` carries a stale revision.
    async fn update(&self, application: &Application) -> Result<Application, Error>;

    /// Succeeds when the application is already gone.
    async fn delete(&self, name: &str) -> Result<(), Error>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(object) | WatchEvent::Modified(object) | WatchEvent::Deleted(object) => object,
        }
    }

    pub fn into_object(self) -> T {
        match self {
            WatchEvent::Added(object) | WatchEvent::Modified(object) | WatchEvent::Deleted(object) => object,
        }
    }
}

/// What a watch stream covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchScope {
    /// Every object of the list.
    All,
    /// A single object, filtered by the server on `metadata.name`.
    Named {
        name: String,
        namespace: Option<String>,
    },
}

/// Live change feed. Ends when the server closes the watch.
pub type EventStream<T> = BoxStream<'static, Result<WatchEvent<T>, Error>>;

#[async_trait]
pub trait WatchSource<T> {
    async fn watch(&self, scope: &WatchScope) -> Result<EventStream<T>, Error>;
}
