//! HTTP server for the broker API.
//!
//! This module exposes the order lifecycle over HTTP: order creation and
//! deletion, status queries, per-user listings and allocation sums. All
//! handlers delegate to the engine's controller; the server holds no state
//! of its own.

use axum::{
	extract::{DefaultBodyLimit, Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::get,
	Router,
};
use broker_config::ApiConfig;
use broker_core::{BrokerEngine, OrderError};
use broker_types::{Credential, ResourceSpec, ResourceType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the broker engine for processing requests.
	pub engine: Arc<BrokerEngine>,
}

/// Request body for creating an order.
///
/// Authentication is handled elsewhere; the caller supplies an
/// already-validated identity.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	pub spec: ResourceSpec,
	pub user_id: String,
	#[serde(default = "default_identity_provider")]
	pub identity_provider_id: String,
	#[serde(default)]
	pub provider: Option<String>,
}

fn default_identity_provider() -> String {
	"local".to_string()
}

/// Optional filters for order listings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersParams {
	pub resource_type: Option<String>,
}

/// Error body returned by every failing handler.
#[derive(Debug, Serialize)]
struct ErrorBody {
	error: String,
}

/// HTTP-mapped wrapper over controller errors.
#[derive(Debug)]
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.0, Json(ErrorBody { error: self.1 })).into_response()
	}
}

impl From<OrderError> for ApiError {
	fn from(e: OrderError) -> Self {
		match e {
			OrderError::NotFound(_) => ApiError(StatusCode::NOT_FOUND, e.to_string()),
			_ => ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
		}
	}
}

/// Starts the HTTP server for the broker API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<BrokerEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app_state = AppState { engine };

	let app = Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", axum::routing::post(handle_create_order))
				.route(
					"/orders/{id}",
					get(handle_get_order).delete(handle_delete_order),
				)
				.route("/users/{user_id}/orders", get(handle_list_orders))
				.route(
					"/users/{user_id}/allocation/{resource_type}",
					get(handle_get_allocation),
				),
		)
		.layer(
			ServiceBuilder::new()
				.layer(CorsLayer::permissive())
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(app_state);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Broker API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Handles POST /api/orders requests.
async fn handle_create_order(
	State(state): State<AppState>,
	Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
	let credential = Credential::new(request.user_id, request.identity_provider_id);
	let order = state
		.engine
		.controller()
		.create_order(request.spec, credential, request.provider)
		.await?;
	Ok((StatusCode::CREATED, Json(order)))
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	let details = state.engine.controller().get_order(&id).await?;
	Ok(Json(details))
}

/// Handles DELETE /api/orders/{id} requests.
///
/// Deletion is asynchronous; 204 means the order is on its way out, not
/// that the instance is already gone.
async fn handle_delete_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	state.engine.controller().delete_order(&id).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// Handles GET /api/users/{user_id}/orders requests.
async fn handle_list_orders(
	Path(user_id): Path<String>,
	Query(params): Query<ListOrdersParams>,
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	let resource_type = match params.resource_type.as_deref() {
		Some(raw) => Some(parse_resource_type(raw)?),
		None => None,
	};
	let orders = state
		.engine
		.controller()
		.list_orders(&user_id, resource_type)
		.await;
	Ok(Json(orders))
}

/// Handles GET /api/users/{user_id}/allocation/{resource_type} requests.
async fn handle_get_allocation(
	Path((user_id, resource_type)): Path<(String, String)>,
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
	let resource_type = parse_resource_type(&resource_type)?;
	let allocation = state
		.engine
		.controller()
		.get_user_allocation(&user_id, resource_type)
		.await;
	Ok(Json(allocation))
}

fn parse_resource_type(raw: &str) -> Result<ResourceType, ApiError> {
	match raw {
		"compute" => Ok(ResourceType::Compute),
		"network" => Ok(ResourceType::Network),
		"volume" => Ok(ResourceType::Volume),
		"attachment" => Ok(ResourceType::Attachment),
		other => Err(ApiError(
			StatusCode::BAD_REQUEST,
			format!("Unknown resource type '{}'", other),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_resource_type() {
		assert_eq!(parse_resource_type("compute").unwrap(), ResourceType::Compute);
		assert_eq!(parse_resource_type("volume").unwrap(), ResourceType::Volume);
		assert!(parse_resource_type("").is_err());
		assert!(parse_resource_type("Compute").is_err());
	}

	#[test]
	fn test_create_order_request_defaults() {
		let request: CreateOrderRequest = serde_json::from_str(
			r#"{
				"spec": { "type": "volume", "sizeGb": 10 },
				"userId": "alice"
			}"#,
		)
		.unwrap();
		assert_eq!(request.identity_provider_id, "local");
		assert!(request.provider.is_none());
		assert!(matches!(request.spec, ResourceSpec::Volume { size_gb: 10 }));
	}
}
