use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::Deserialize;

use crate::{
    domain::{
        for_each_target,
        model::{RunOptions, UpdateRequest},
        ApplicationService,
    },
    error::Error,
};

pub fn router(service: ApplicationService) -> Router {
    Router::new()
        .route("/apps", get(list_applications).post(run_application))
        .route(
            "/apps/:app_name",
            get(get_application)
                .patch(update_application)
                .delete(delete_application),
        )
        .route("/apps/:app_name/start", post(start_application))
        .route("/apps/:app_name/stop", post(stop_application))
        .route("/batch/:action", post(batch))
        .with_state(Arc::new(service))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    image: String,
    #[serde(flatten)]
    options: RunOptions,
}

#[derive(Deserialize)]
struct WaitQuery {
    #[serde(default)]
    wait: bool,
}

#[derive(Deserialize)]
struct Targets {
    names: Vec<String>,
}

fn failure(operation: &str, e: Error) -> Response {
    error!("Error during {} {:?}", operation, e);
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("Something went wrong: {e}")).into_response()
}

async fn list_applications(State(service): State<Arc<ApplicationService>>) -> Response {
    match service.list().await {
        Ok(applications) => Json(applications).into_response(),
        Err(e) => failure("list_applications", e),
    }
}

async fn run_application(
    State(service): State<Arc<ApplicationService>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    match service.run(&payload.image, payload.options).await {
        Ok(application) => (StatusCode::CREATED, Json(application)).into_response(),
        Err(e) => failure("run_application", e),
    }
}

async fn get_application(
    State(service): State<Arc<ApplicationService>>,
    Path(app_name): Path<String>,
) -> Response {
    match service.get(&app_name).await {
        Ok(application) => Json(application).into_response(),
        Err(e) => failure("get_application", e),
    }
}

async fn update_application(
    State(service): State<Arc<ApplicationService>>,
    Path(app_name): Path<String>,
    Json(payload): Json<UpdateRequest>,
) -> Response {
    match service.update(&app_name, &payload).await {
        Ok(application) => Json(application).into_response(),
        Err(e) => failure("update_application", e),
    }
}

async fn delete_application(
    State(service): State<Arc<ApplicationService>>,
    Path(app_name): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Response {
    let deleted = if query.wait {
        service.delete_and_wait(&app_name).await
    } else {
        service.delete(&app_name).await
    };
    match deleted {
        Ok(Some(application)) => Json(application).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("No such app: {app_name}")).into_response(),
        Err(e) => failure("delete_application", e),
    }
}

async fn start_application(
    State(service): State<Arc<ApplicationService>>,
    Path(app_name): Path<String>,
) -> Response {
    match service.start(&app_name).await {
        Ok(application) => Json(application).into_response(),
        Err(e) => failure("start_application", e),
    }
}

async fn stop_application(
    State(service): State<Arc<ApplicationService>>,
    Path(app_name): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Response {
    let stopped = match service.stop(&app_name).await {
        Ok(_) if query.wait => service.wait_stopped(&app_name).await,
        other => other,
    };
    match stopped {
        Ok(application) => Json(application).into_response(),
        Err(e) => failure("stop_application", e),
    }
}

/// Applies one action to many applications, reporting each one separately.
async fn batch(
    State(service): State<Arc<ApplicationService>>,
    Path(action): Path<String>,
    Json(targets): Json<Targets>,
) -> Response {
    let service = service.as_ref();
    let results = match action.as_str() {
        "start" => {
            for_each_target(&targets.names, |name| async move {
                service.start(&name).await.map(Some)
            })
            .await
        }
        "stop" => {
            for_each_target(&targets.names, |name| async move {
                service.stop(&name).await.map(Some)
            })
            .await
        }
        "delete" => {
            for_each_target(&targets.names, |name| async move { service.delete(&name).await })
                .await
        }
        other => return (StatusCode::BAD_REQUEST, format!("Unknown action {other}")).into_response(),
    };
    Json(results).into_response()
}
