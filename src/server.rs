use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use hyper::Server;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::{IngestReport, IngestUseCase, OutboundClientPool};
use crate::constants::SECOM_SERVICE_VERSION;
use crate::domain::secom::{
    CapabilityObject, CapabilityResponseObject, ImplementedInterfaces, PingResponseObject, ResponseCode,
    SubscriptionNotificationObject, SubscriptionNotificationResponseObject, UploadObject,
    UploadResponseObject,
};
use crate::domain::{ContainerType, DataProductType, Envelope, Subscription};
use crate::error::{GatewayError, IngestError, SubscriptionError};
use crate::mmtp::TransportSession;

pub struct AppState {
    pub ingest: Arc<IngestUseCase>,
    pub pool: Arc<OutboundClientPool>,
    pub data_product_type: DataProductType,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "secom-mms-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Maps the outcome of an upload onto the SECOM response object.
pub fn upload_response(result: &Result<IngestReport, IngestError>) -> UploadResponseObject {
    match result {
        Ok(_) => UploadResponseObject::success(),
        Err(IngestError::InvalidCertificate(e)) => {
            UploadResponseObject::failure(ResponseCode::InvalidCertificate, e.to_string())
        }
        Err(IngestError::MissingSubscription(_)) => UploadResponseObject::failure(
            ResponseCode::MissingRequiredDataForService,
            "No subscription found",
        ),
        Err(IngestError::Registry(e)) => UploadResponseObject::failure(ResponseCode::Failed, e.to_string()),
    }
}

async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<UploadObject>, JsonRejection>,
) -> Response {
    let upload = match payload {
        Ok(Json(upload)) => upload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed upload");
            let response = UploadResponseObject::failure(ResponseCode::Failed, rejection.body_text());
            return (rejection.status(), Json(response)).into_response();
        }
    };
    let envelope = Envelope::from(&upload.envelope);
    let result = state.ingest.upload(&envelope).await;
    Json(upload_response(&result)).into_response()
}

async fn ping() -> Json<PingResponseObject> {
    Json(PingResponseObject {
        last_private_interaction_time: Some(Utc::now()),
    })
}

async fn capability(Extension(state): Extension<Arc<AppState>>) -> Json<CapabilityResponseObject> {
    Json(CapabilityResponseObject {
        capability: vec![CapabilityObject {
            container_type: ContainerType::S100DataSet,
            data_product_type: state.data_product_type,
            implemented_interfaces: ImplementedInterfaces {
                upload: true,
                ..Default::default()
            },
            service_version: SECOM_SERVICE_VERSION.to_string(),
        }],
    })
}

async fn subscription_notification(
    Extension(state): Extension<Arc<AppState>>,
    Json(notification): Json<SubscriptionNotificationObject>,
) -> Response {
    let envelope = notification.envelope;
    match state
        .pool
        .handle_notification(envelope.subscription_identifier, envelope.event_enum)
    {
        Ok(_) => Json(SubscriptionNotificationResponseObject {
            response_text: Some("Notification processed".to_string()),
        })
        .into_response(),
        Err(e) => subscription_error(e),
    }
}

fn subscription_error(e: SubscriptionError) -> Response {
    let status = match &e {
        SubscriptionError::AlreadyExists(_) => StatusCode::CONFLICT,
        SubscriptionError::ClientCreationFailed(_) => StatusCode::BAD_REQUEST,
        SubscriptionError::NotFound(_) => StatusCode::NOT_FOUND,
        SubscriptionError::UnsubscribeFailed(_) | SubscriptionError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(error = %e, "Subscription management failed");
    } else {
        warn!(error = %e, "Subscription request refused");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

fn found(subscription: Result<Option<Subscription>, SubscriptionError>, key: String) -> Response {
    match subscription {
        Ok(Some(subscription)) => Json(subscription).into_response(),
        Ok(None) => subscription_error(SubscriptionError::NotFound(key)),
        Err(e) => subscription_error(e),
    }
}

async fn create_subscription(
    Extension(state): Extension<Arc<AppState>>,
    Json(subscription): Json<Subscription>,
) -> Response {
    match state.pool.subscribe(subscription).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => subscription_error(e),
    }
}

async fn subscription_by_mrn(
    Extension(state): Extension<Arc<AppState>>,
    Path(mrn): Path<String>,
) -> Response {
    found(state.pool.store().get(&mrn).map_err(Into::into), mrn)
}

async fn subscription_by_id(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    found(
        state.pool.store().get_by_subscription_id(id).map_err(Into::into),
        id.to_string(),
    )
}

async fn list_subscriptions(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.pool.store().list() {
        Ok(subscriptions) => Json(subscriptions).into_response(),
        Err(e) => subscription_error(e.into()),
    }
}

async fn delete_by_mrn(
    Extension(state): Extension<Arc<AppState>>,
    Path(mrn): Path<String>,
) -> Response {
    match state.pool.unsubscribe(&mrn).await {
        Ok(removed) => Json(removed).into_response(),
        Err(e) => subscription_error(e),
    }
}

async fn delete_by_id(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.pool.unsubscribe_by_id(id).await {
        Ok(removed) => Json(removed).into_response(),
        Err(e) => subscription_error(e),
    }
}

/// Builds the router with the SECOM interface, subscription management and health routes.
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // SECOM interface
        .route("/v1/upload", post(upload))
        .route("/v1/ping", get(ping))
        .route("/v1/capability", get(capability))
        .route("/v1/subscription/notification", post(subscription_notification))
        // Subscription management
        .route("/management/subscription", post(create_subscription))
        .route(
            "/management/subscription/mrn/:mrn",
            get(subscription_by_mrn).delete(delete_by_mrn),
        )
        .route(
            "/management/subscription/id/:id",
            get(subscription_by_id).delete(delete_by_id),
        )
        .route("/management/subscriptions", get(list_subscriptions))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn start_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    let app = create_server(state);
    let server = Server::try_bind(&addr).map_err(|e| GatewayError::Server(e.to_string()))?;

    info!(%addr, "HTTP server listening");
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::Server(e.to_string()))
}

/// Serves until `shutdown` resolves or `session` abandons reconnection, whichever comes first.
pub async fn run_gateway(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
    session: Arc<TransportSession>,
) -> Result<(), GatewayError> {
    tokio::select! {
        result = start_server(state, addr, shutdown) => result,
        reason = session.wait_fatal() => Err(GatewayError::EdgeRouterLost(reason)),
    }
}
