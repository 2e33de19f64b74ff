use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;

use crate::actors::{
    GetDlqStats, GetParkedConfirmations, GetSystemHealth, HealthStatus, ServiceHandles,
};
use crate::domain::purchase::{PurchaseError, PurchaseIntentHandler, PurchaseRequest};
use crate::metrics::Metrics;

const DEFAULT_PARKED_LIMIT: i64 = 50;
const MAX_PARKED_LIMIT: i64 = 500;

/// Start the HTTP server (purchases, health, metrics, parked confirmations)
pub async fn start_http_server(
    purchases: Arc<PurchaseIntentHandler>,
    metrics: Arc<Metrics>,
    handles: ServiceHandles,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting HTTP server on http://0.0.0.0:{}", port);

    let purchases = web::Data::from(purchases);
    let metrics = web::Data::from(metrics);
    let handles = web::Data::new(handles);

    HttpServer::new(move || {
        App::new()
            .app_data(purchases.clone())
            .app_data(metrics.clone())
            .app_data(handles.clone())
            .configure(routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/purchases", web::post().to(purchase_handler))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/reconciliation/parked", web::get().to(parked_handler));
}

async fn purchase_handler(
    purchases: web::Data<PurchaseIntentHandler>,
    request: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, PurchaseError> {
    let receipt = purchases.handle(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(receipt))
}

async fn metrics_handler(metrics: web::Data<Metrics>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(handles: web::Data<ServiceHandles>) -> impl Responder {
    match handles.health_monitor.send(GetSystemHealth).await {
        Ok(health) => {
            let mut response = match health.overall_status {
                HealthStatus::Unhealthy(_) => HttpResponse::ServiceUnavailable(),
                _ => HttpResponse::Ok(),
            };
            response.json(serde_json::json!({
                "service": "ticket-settlement",
                "health": health,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "Health monitor unavailable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "service": "ticket-settlement",
                "error": "health monitor unavailable",
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ParkedQuery {
    limit: Option<i64>,
}

async fn parked_handler(
    handles: web::Data<ServiceHandles>,
    query: web::Query<ParkedQuery>,
) -> impl Responder {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PARKED_LIMIT)
        .clamp(1, MAX_PARKED_LIMIT);

    let parked = handles.dlq.send(GetParkedConfirmations { limit }).await;
    let stats = handles.dlq.send(GetDlqStats).await;

    match (parked, stats) {
        (Ok(Ok(parked)), Ok(Ok(stats))) => HttpResponse::Ok().json(serde_json::json!({
            "stats": stats,
            "parked": parked,
        })),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "DLQ actor unavailable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": e.to_string() }))
        }
        (Ok(Err(e)), _) | (_, Ok(Err(e))) => {
            tracing::error!(error = %e, "Failed to read parked confirmations");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e }))
        }
    }
}
