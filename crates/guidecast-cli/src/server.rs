//! HTTP surface: transformed guide downloads, manual refresh and health.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::FixedOffset;
use guidecast_api::guide::GuideApi;
use guidecast_store::GuideStore;
use guidecast_xmltv::transform::CHUNK_SIZE;
use guidecast_xmltv::{GuideClock, TransformPipeline};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::cycle::UpdateCycle;
use crate::supervisor::{UpdateOutcome, UpdateSupervisor};
use crate::transform::{TransformOptions, build_pipeline, fetch_roster};

/// Transformed chunks buffered per response before the producer blocks.
const STREAM_DEPTH: usize = 8;

/// Shared server state.
pub struct AppState<A> {
    api: Arc<A>,
    store: Arc<GuideStore>,
    cycle: Arc<UpdateCycle<A>>,
    supervisor: UpdateSupervisor,
    config: Arc<AppConfig>,
    offset: Option<FixedOffset>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
            cycle: Arc::clone(&self.cycle),
            supervisor: self.supervisor.clone(),
            config: Arc::clone(&self.config),
            offset: self.offset,
        }
    }
}

impl<A> fmt::Debug for AppState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.dir())
            .field("updating", &self.supervisor.is_running())
            .finish_non_exhaustive()
    }
}

impl<A> AppState<A>
where
    A: GuideApi + Send + Sync + 'static,
{
    /// Wires the update cycle and request handling to one API client and
    /// one store.
    ///
    /// # Errors
    ///
    /// Returns an error if `output.offset` is invalid.
    pub fn new(api: Arc<A>, store: Arc<GuideStore>, config: Arc<AppConfig>) -> Result<Self> {
        let offset = config.offset()?;
        let cycle = Arc::new(UpdateCycle::new(
            Arc::clone(&api),
            Arc::clone(&store),
            config.fetch_plan(),
            offset,
        ));
        Ok(Self {
            api,
            store,
            cycle,
            supervisor: UpdateSupervisor::new(),
            config,
            offset,
        })
    }

    /// Starts an update in the background unless one is running.
    pub fn trigger_update(&self) -> bool {
        let cycle = Arc::clone(&self.cycle);
        let started = self
            .supervisor
            .spawn(async move { cycle.run_logged().await });
        if !started {
            tracing::info!("Guide update already running, trigger ignored");
        }
        started
    }

    /// Runs a scheduled update inline, skipping it when one is already
    /// running.
    pub async fn scheduled_update(&self) {
        match self.supervisor.run(self.cycle.run_logged()).await {
            UpdateOutcome::Completed(()) => {}
            UpdateOutcome::AlreadyRunning => {
                tracing::info!("Guide update already running, scheduled run skipped");
            }
        }
    }

    fn clock(&self) -> GuideClock {
        self.offset
            .map_or_else(GuideClock::now_local, GuideClock::now_in)
    }
}

/// Query parameters of `GET /xmltv.xml`.
#[derive(Debug, Default, Deserialize)]
pub struct GuideQuery {
    /// Keep programmes starting within this many days.
    pub days: Option<u32>,
    /// Placeholder block duration token.
    pub dummy: Option<String>,
}

/// Builds the router.
pub fn router<A>(state: AppState<A>) -> Router
where
    A: GuideApi + Send + Sync + 'static,
{
    Router::new()
        .route("/xmltv.xml", get(get_guide::<A>))
        .route("/refresh", post(post_refresh::<A>))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds `addr` and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve<A>(state: AppState<A>, addr: &str) -> Result<()>
where
    A: GuideApi + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Guide server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("guide server failed")
}

async fn get_guide<A>(State(state): State<AppState<A>>, Query(query): Query<GuideQuery>) -> Response
where
    A: GuideApi + Send + Sync + 'static,
{
    let Some(path) = state.store.current() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "guide not available yet\n").into_response();
    };
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Failed to open published guide");
            return (StatusCode::SERVICE_UNAVAILABLE, "guide not available yet\n").into_response();
        }
    };

    let options = TransformOptions {
        days: query.days,
        placeholder: query
            .dummy
            .as_deref()
            .and_then(|token| state.config.placeholder_spec(token)),
    };
    let roster = if options.needs_roster() {
        fetch_roster(state.api.as_ref()).await
    } else {
        None
    };
    tracing::debug!(days = ?options.days, dummy = options.needs_roster(), "Serving guide");

    let pipeline = build_pipeline(&options, state.clock(), roster);
    (
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        stream_pipeline(pipeline, file),
    )
        .into_response()
}

async fn post_refresh<A>(State(state): State<AppState<A>>) -> StatusCode
where
    A: GuideApi + Send + Sync + 'static,
{
    if state.trigger_update() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Runs `pipeline` over `input` on a blocking thread and streams its
/// output. A transform error ends the body with an error so the client
/// sees a truncated response rather than a well-formed partial document.
fn stream_pipeline(mut pipeline: TransformPipeline, mut input: File) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>(STREAM_DEPTH);

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0_u8; CHUNK_SIZE];
        loop {
            let read = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            let Some(chunk) = buf.get(..read) else {
                break;
            };
            match pipeline.push(chunk) {
                Ok(out) if out.is_empty() => {}
                Ok(out) => {
                    if tx.blocking_send(Ok(out)).is_err() {
                        tracing::debug!("Client went away, transform stopped");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transform aborted");
                    let _ = tx.blocking_send(Err(io::Error::other(e)));
                    return;
                }
            }
        }
        match pipeline.finish() {
            Ok(out) => {
                if !out.is_empty() {
                    let _ = tx.blocking_send(Ok(out));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transform aborted at end of document");
                let _ = tx.blocking_send(Err(io::Error::other(e)));
            }
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}
