use std::{net::SocketAddr, time::Duration};

use axum::{
    http::{Request, Response},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Span;

use crate::routes::health::health_routes;
use crate::state::AppState;
use crate::telemetry;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| telemetry::request_span(req.method(), req.uri()))
                .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                    telemetry::record_response(res.status(), latency, span)
                }),
        )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
