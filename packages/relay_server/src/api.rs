//! Plain HTTP endpoints served next to the WebSocket upgrade.

use actix_web::web::Json;
use actix_web::{route, Result};
use log::info;
use serde_json::{json, Value};

#[route("/health", method = "GET")]
pub async fn health_endpoint() -> Result<Json<Value>> {
    info!("Healthy");
    Ok(Json(json!({"healthy": true})))
}
