use crate::format::{Fragment, format_response};
use crate::reveal::{RevealConfig, RevealState, final_html};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info};

type SharedState = Arc<AppState>;
const MAX_DELAY_MS: u64 = 2_000;
const MAX_TEXT_CHARS: usize = 64 * 1024;
const SAMPLE_RESPONSE: &str = "# Introduction\nDrip irrigation suits **sandy** soils.\n\n# Key Recommendations\n1. **Mulch** the beds after planting\n- **Timing:** water early in the morning\n* Check emitters weekly\n\n# Related Topics for Further Learning\nVisit: www.icar.org.in for regional guides.";

#[derive(Clone)]
pub struct AppState {
    pub theme: WebTheme,
    pub reveal: RevealConfig,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    Tailwind,
    #[default]
    Bootstrap,
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Tailwind => write!(f, "tailwind"),
            WebTheme::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    use_tailwind: bool,
    use_bootstrap: bool,
    body_class: &'static str,
    main_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    input_class: &'static str,
    button_class: &'static str,
    result_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Tailwind => Self {
                use_tailwind: true,
                use_bootstrap: false,
                body_class: "bg-lime-50 text-slate-900",
                main_class: "max-w-4xl mx-auto py-10 px-4 space-y-6",
                headline_class: "text-3xl font-extrabold tracking-tight",
                lede_class: "text-lg text-slate-600",
                input_class: "w-full rounded-md border border-slate-300 p-3 font-mono text-sm",
                button_class: "inline-flex items-center rounded-md bg-green-800 px-4 py-2 text-white font-semibold shadow hover:bg-green-700 transition-colors",
                result_class: "rounded-md bg-white p-6 shadow",
            },
            WebTheme::Bootstrap => Self {
                use_tailwind: false,
                use_bootstrap: true,
                body_class: "bg-light text-dark",
                main_class: "container py-5",
                headline_class: "display-6 fw-bold",
                lede_class: "lead mb-4",
                input_class: "form-control font-monospace mb-3",
                button_class: "btn btn-success px-4",
                result_class: "card card-body mt-4",
            },
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
    pub reveal: RevealConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
            reveal: RevealConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let state = Arc::new(AppState {
        theme: config.theme,
        reveal: config.reveal,
    });
    let router = build_router(state);
    info!(
        %config.addr,
        theme = %config.theme,
        char_delay_ms = config.reveal.char_delay.as_millis() as u64,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/format", post(api_format))
        .route("/api/reveal", get(api_reveal))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "agri-advisor-preview" }))
}

async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let template = HomeTemplate {
        chrome: Chrome::new(state.theme),
        sample: SAMPLE_RESPONSE,
        char_delay_ms: state.reveal.char_delay.as_millis() as u64,
        pause_ms: state.reveal.fragment_pause.as_millis() as u64,
        version: env!("CARGO_PKG_VERSION"),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
}

fn render_error_page(message: String) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head><meta charset="utf-8" /><title>Preview error</title></head>
  <body><p>{}</p></body>
</html>"#,
        crate::format::escape_html(&message)
    )
}

#[derive(Debug, Deserialize)]
struct FormatRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct FormatPayload {
    fragments: Vec<Fragment>,
    html: String,
}

fn check_text(text: &str) -> Result<(), ApiError> {
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApiError::bad_request(format!(
            "text is longer than {MAX_TEXT_CHARS} characters"
        )));
    }
    Ok(())
}

async fn api_format(Json(request): Json<FormatRequest>) -> Result<Json<FormatPayload>, ApiError> {
    check_text(&request.text)?;
    let fragments = format_response(&request.text);
    debug!(fragments = fragments.len(), "formatted preview text");
    Ok(Json(FormatPayload {
        html: final_html(&fragments),
        fragments,
    }))
}

#[derive(Debug, Deserialize)]
struct RevealParams {
    text: String,
    char_delay_ms: Option<u64>,
    pause_ms: Option<u64>,
}

fn reveal_config(params: &RevealParams, defaults: RevealConfig) -> Result<RevealConfig, ApiError> {
    let millis = |value: Option<u64>, fallback: Duration, name: &str| match value {
        Some(ms) if ms > MAX_DELAY_MS => Err(ApiError::bad_request(format!(
            "{name} must be at most {MAX_DELAY_MS}"
        ))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(fallback),
    };
    Ok(RevealConfig {
        char_delay: millis(params.char_delay_ms, defaults.char_delay, "char_delay_ms")?,
        fragment_pause: millis(params.pause_ms, defaults.fragment_pause, "pause_ms")?,
    })
}

/// Streams reveal frames as server-sent events; each step's delay elapses
/// before the following event is sent.
fn reveal_events(frames: RevealState) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(
        (frames, Duration::ZERO),
        |(mut frames, pending)| async move {
            if !pending.is_zero() {
                tokio::time::sleep(pending).await;
            }
            let step = frames.next()?;
            let event = Event::default()
                .event(step.frame.name())
                .json_data(&step.frame);
            Some((event, (frames, step.delay)))
        },
    )
}

async fn api_reveal(
    State(state): State<SharedState>,
    Query(params): Query<RevealParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    check_text(&params.text)?;
    let config = reveal_config(&params, state.reveal)?;
    let fragments = format_response(&params.text);
    debug!(fragments = fragments.len(), "streaming reveal");
    let frames = RevealState::new(fragments, config);
    Ok(Sse::new(reveal_events(frames)).keep_alive(KeepAlive::default()))
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Agri Advisor • Response Preview</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
    <style>
      .typing::after { content: '|'; animation: blink 1s infinite; }
      @keyframes blink { 0%, 100% { opacity: 1; } 50% { opacity: 0; } }
    </style>
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div>
        <h1 class="{{ chrome.headline_class }}">Response preview</h1>
        <p class="{{ chrome.lede_class }}">Paste an advice response to see how it is formatted and revealed. v{{ version }}</p>
      </div>
      <form id="reveal-form">
        <textarea name="text" rows="12" class="{{ chrome.input_class }}">{{ sample }}</textarea>
        <input type="hidden" name="char_delay_ms" value="{{ char_delay_ms }}" />
        <input type="hidden" name="pause_ms" value="{{ pause_ms }}" />
        <button type="submit" class="{{ chrome.button_class }}">Reveal</button>
      </form>
      <div class="{{ chrome.result_class }}">
        <div id="advice-result"></div>
      </div>
    </main>
    <script>
      const form = document.getElementById('reveal-form');
      const region = document.getElementById('advice-result');
      let source = null;
      form.addEventListener('submit', (event) => {
        event.preventDefault();
        if (source) source.close();
        const nodes = [];
        const params = new URLSearchParams(new FormData(form));
        source = new EventSource('/api/reveal?' + params.toString());
        source.addEventListener('cleared', () => {
          region.innerHTML = '';
        });
        source.addEventListener('placeholder', (e) => {
          const frame = JSON.parse(e.data);
          const tag = frame.kind === 'heading' ? 'h3' : (frame.kind === 'break' ? 'br' : 'p');
          const node = document.createElement(tag);
          if (frame.class) node.className = frame.class;
          nodes.forEach((n) => n.classList.remove('typing'));
          node.classList.add('typing');
          region.appendChild(node);
          nodes[frame.index] = node;
        });
        source.addEventListener('text', (e) => {
          const frame = JSON.parse(e.data);
          nodes[frame.index].textContent = frame.text;
        });
        source.addEventListener('markup', (e) => {
          const frame = JSON.parse(e.data);
          const holder = document.createElement('div');
          holder.innerHTML = frame.markup;
          const fresh = holder.firstElementChild;
          if (nodes[frame.index].classList.contains('typing')) fresh.classList.add('typing');
          nodes[frame.index].replaceWith(fresh);
          nodes[frame.index] = fresh;
        });
        source.addEventListener('done', () => {
          nodes.forEach((n) => n.classList.remove('typing'));
          source.close();
        });
        source.onerror = () => source.close();
      });
    </script>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate {
    chrome: Chrome,
    sample: &'static str,
    char_delay_ms: u64,
    pause_ms: u64,
    version: &'static str,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request, http::header};
    use tower::ServiceExt;

    fn test_router() -> Router {
        themed_router(WebTheme::Bootstrap)
    }

    fn themed_router(theme: WebTheme) -> Router {
        let state = Arc::new(AppState {
            theme,
            reveal: RevealConfig::instant(),
        });
        build_router(state)
    }

    async fn body_text(response: Response) -> String {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = test_router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(body_text(response).await.contains("\"ok\""));
    }

    #[tokio::test]
    async fn api_format_returns_fragments_and_html() {
        let response = test_router()
            .oneshot(
                Request::post("/api/format")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r##"{"text":"# Tip\nVisit: www.kvk.org"}"##))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        let payload: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        let fragments = payload["fragments"].as_array().unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0]["kind"], "heading");
        assert_eq!(fragments[0]["text"], "Tip");
        let html = payload["html"].as_str().unwrap();
        assert!(html.starts_with(r#"<h3 class="mt-4 mb-3">Tip</h3>"#));
        assert!(html.contains(r#"href="https://www.kvk.org""#));
    }

    #[tokio::test]
    async fn home_page_has_form_and_region() {
        let response = test_router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let html = body_text(response).await;
        assert!(html.contains("id=\"reveal-form\""));
        assert!(html.contains("id=\"advice-result\""));
        assert!(html.contains("bootstrap.min.css"));
        assert!(html.contains("**sandy**"));
    }

    #[tokio::test]
    async fn tailwind_home_page_loads_tailwind_only() {
        let response = themed_router(WebTheme::Tailwind)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let html = body_text(response).await;
        assert!(html.contains("@tailwindcss/browser"));
        assert!(html.contains("bg-lime-50"));
        assert!(!html.contains("bootstrap.min.css"));
        assert!(html.contains("id=\"advice-result\""));
    }

    #[tokio::test]
    async fn api_reveal_streams_frames_in_order() {
        let response = test_router()
            .oneshot(
                Request::get("/api/reveal?text=%23%20Tip%0AGo&char_delay_ms=0&pause_ms=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let text = body_text(response).await;
        let events: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(events.first(), Some(&"cleared"));
        assert_eq!(events.last(), Some(&"done"));
        assert_eq!(events.iter().filter(|e| **e == "placeholder").count(), 2);
        assert!(text.contains(r#""frame":"text","index":0,"text":"Ti""#));
    }

    #[tokio::test]
    async fn api_reveal_rejects_long_delays() {
        let response = test_router()
            .oneshot(
                Request::get("/api/reveal?text=hi&char_delay_ms=99999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("char_delay_ms"));
    }
}
