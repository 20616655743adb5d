//! Status dashboard for the job queue.
//!
//! Read-only HTTP collaborator: `/api/status` mirrors the CLI `status`
//! JSON, and `/` serves a small page that polls it.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use jobctl_core::{Queue, QueueStatus, Store};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    queue: Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobctl_dashboard=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = std::env::var("JOBCTL_DB").unwrap_or_else(|_| "queue.db".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .context("PORT must be a valid number")?;

    let store = Store::open(&db)
        .await
        .with_context(|| format!("failed to open queue database at {db}"))?;
    let state = AppState {
        queue: Queue::new(store),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(%addr, db = %db, "dashboard listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<QueueStatus>, (StatusCode, String)> {
    state
        .queue
        .status()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn index_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>jobctl</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 2rem; background: #1a1a2e; color: #eee; }
        h1 { color: #7c3aed; }
        table { border-collapse: collapse; margin-top: 1rem; }
        td, th { border: 1px solid #444; padding: 0.5rem 1rem; text-align: left; }
        th { background: #16213e; }
        .stats { font-size: 0.875rem; color: #888; margin-top: 1rem; }
    </style>
</head>
<body>
    <h1>Job Queue</h1>
    <table>
        <tr><th>State</th><th>Count</th></tr>
        <tr><td>pending</td><td id="pending">-</td></tr>
        <tr><td>processing</td><td id="processing">-</td></tr>
        <tr><td>completed</td><td id="completed">-</td></tr>
        <tr><td>failed</td><td id="failed">-</td></tr>
        <tr><td>dead</td><td id="dead">-</td></tr>
    </table>
    <div class="stats">
        <div>active workers: <span id="active_workers">-</span></div>
        <div>oldest pending: <span id="oldest_pending">-</span></div>
    </div>

    <script>
        async function refresh() {
            const res = await fetch('/api/status');
            const status = await res.json();
            for (const key of ['pending', 'processing', 'completed', 'failed', 'dead', 'active_workers']) {
                document.getElementById(key).textContent = status[key];
            }
            document.getElementById('oldest_pending').textContent = status.oldest_pending ?? 'none';
        }

        refresh();
        setInterval(refresh, 2000);
    </script>
</body>
</html>"#,
    )
}
