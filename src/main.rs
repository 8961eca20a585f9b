use std::{error::Error, sync::Arc};

use anyhow::Context;
use kube::Client;
use log::info;
use rokkuctl::{
    config::{load_config, Backend},
    domain::ApplicationService,
    infra::{
        kubernetes::{KubernetesApplications, KubernetesWatch},
        memory::InMemoryControlPlane,
        web::router,
    },
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    info!("Start rokkuctl - application orchestration for the Rokku platform");

    let config = load_config()?;
    info!("Loaded config {:?}", config);

    let service = match config.backend {
        Backend::Kubernetes => {
            let client = Client::try_default()
                .await
                .context("Can't connect to the Kubernetes API server")?;
            ApplicationService {
                repository: Arc::new(KubernetesApplications {
                    client: client.clone(),
                    namespace: config.namespace.clone(),
                }),
                watcher: Arc::new(KubernetesWatch {
                    client,
                    namespace: config.namespace.clone(),
                }),
                config: config.client_config(),
            }
        }
        Backend::Memory => {
            let control_plane = Arc::new(InMemoryControlPlane::new(&config.namespace));
            ApplicationService {
                repository: control_plane.clone(),
                watcher: control_plane,
                config: config.client_config(),
            }
        }
    };

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Can't bind {}", config.listen_address))?;
    axum::serve(listener, router(service)).await?;
    Ok(())
}
