use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::statistics::Statistics;

struct ApiState {
    config: Arc<Config>,
    statistics: Statistics,
    uptime: Instant,
}

/// start http server
///
/// Create an http server and start it, and you can access the session
/// statistics table through the http interface.
///
/// Warn: This http server does not contain any means of authentication, do
/// not expose it directly to an unsafe network.
pub async fn start_server(config: Arc<Config>, statistics: Statistics) -> anyhow::Result<()> {
    let listen = config.api.as_ref().expect("api server started without an api config section").listen;

    let state = Arc::new(ApiState {
        config: config.clone(),
        uptime: Instant::now(),
        statistics,
    });

    #[allow(unused_mut)]
    let mut app = Router::new()
        .route(
            "/info",
            get(|State(state): State<Arc<ApiState>>| async move {
                Json(json!({
                    "uptime": state.uptime.elapsed().as_secs(),
                    "listen": state.config.server.listen,
                }))
            }),
        )
        .route(
            "/sessions",
            get(|State(state): State<Arc<ApiState>>| async move {
                let sessions: Vec<_> = state
                    .statistics
                    .snapshot_all()
                    .into_iter()
                    .map(|(addr, counters)| json!({ "addr": addr, "counters": counters }))
                    .collect();

                Json(json!({ "sessions": sessions }))
            }),
        )
        .route(
            "/sessions/{addr}",
            get(|Path(addr): Path<SocketAddr>, State(state): State<Arc<ApiState>>| async move {
                match state.statistics.get(&addr) {
                    Some(counters) => Json(json!({ "addr": addr, "counters": counters })).into_response(),
                    None => StatusCode::NOT_FOUND.into_response(),
                }
            }),
        );

    #[cfg(feature = "prometheus")]
    {
        use crate::statistics::prometheus::generate_metrics;
        use axum::http::header::CONTENT_TYPE;

        app = app.route(
            "/metrics",
            get(|| async move {
                let mut buf = Vec::with_capacity(4096);

                if generate_metrics(&mut buf).is_err() {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    ([(CONTENT_TYPE, "text/plain")], buf).into_response()
                }
            }),
        );
    }

    let listener = TcpListener::bind(listen).await?;
    log::info!("api server listening={listen:?}");
    axum::serve(listener, app.with_state(state)).await?;
    Ok(())
}
