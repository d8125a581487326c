//! Index page and health endpoint.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::cache::{RefreshError, Watcher};

use super::render::RenderData;

#[derive(Clone)]
struct AppState {
  render_data: Arc<Watcher<RenderData>>,
}

/// Build the frontend router around an already-constructed watcher.
pub fn router(render_data: Arc<Watcher<RenderData>>) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/healthz", get(health))
    .layer(SetResponseHeaderLayer::overriding(
      header::CACHE_CONTROL,
      HeaderValue::from_static("no-cache"),
    ))
    .layer(TraceLayer::new_for_http())
    .with_state(AppState { render_data })
}

/// Response formats the index page can be served in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
  Html,
  Json,
}

/// Pick HTML or JSON from an Accept header. HTML wins ties.
fn negotiate(accept: Option<&str>) -> Format {
  let Some(accept) = accept else {
    return Format::Html;
  };

  let mut html_q = 0.0f32;
  let mut json_q = 0.0f32;

  for range in accept.split(',') {
    let mut params = range.split(';');
    let media = params.next().unwrap_or("").trim().to_ascii_lowercase();
    let q = params
      .filter_map(|p| p.trim().strip_prefix("q="))
      .find_map(|q| q.trim().parse::<f32>().ok())
      .unwrap_or(1.0);

    match media.as_str() {
      "text/html" | "text/*" => html_q = html_q.max(q),
      "application/json" | "application/*" => json_q = json_q.max(q),
      "*/*" => {
        html_q = html_q.max(q);
        json_q = json_q.max(q);
      }
      _ => {}
    }
  }

  if json_q > html_q {
    Format::Json
  } else {
    Format::Html
  }
}

#[derive(Debug, Default, Deserialize)]
struct IndexParams {
  /// Seconds between page reloads; ignored unless it is a number
  refresh: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

async fn index(
  State(state): State<AppState>,
  params: Option<Query<IndexParams>>,
  headers: HeaderMap,
) -> Response {
  let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
  let format = negotiate(accept);
  let result = state.render_data.get().await;

  match (format, result) {
    (Format::Json, Ok(entry)) => Json(&entry.value).into_response(),
    (Format::Json, Err(e)) => (
      StatusCode::SERVICE_UNAVAILABLE,
      Json(ErrorBody {
        error: e.to_string(),
      }),
    )
      .into_response(),
    (Format::Html, Ok(entry)) => {
      // A query string that does not deserialize is ignored like a bad value
      let refresh = params
        .and_then(|Query(p)| p.refresh)
        .and_then(|r| r.trim().parse::<u32>().ok());
      Html(render_index(&entry.value, refresh)).into_response()
    }
    (Format::Html, Err(e)) => {
      (StatusCode::SERVICE_UNAVAILABLE, Html(render_error(&e))).into_response()
    }
  }
}

#[derive(Serialize)]
struct HealthResponse {
  state: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  last_updated: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  last_error: Option<String>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
  let watcher = &state.render_data;
  let entry = watcher.peek();

  let status = if entry.is_some() {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };

  (
    status,
    Json(HealthResponse {
      state: watcher.state().as_str(),
      last_updated: entry.map(|e| e.produced_at),
      last_error: watcher.last_error().map(|e| e.to_string()),
    }),
  )
}

fn render_index(data: &RenderData, refresh: Option<u32>) -> String {
  let mut html = String::with_capacity(4096);

  html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
  html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
  if let Some(secs) = refresh {
    let _ = writeln!(html, "<meta http-equiv=\"refresh\" content=\"{}\">", secs);
  }
  let _ = writeln!(
    html,
    "<title>{} days since the last mass shooting</title>\n</head>\n<body>\n<main>",
    data.days
  );

  let _ = writeln!(
    html,
    "<h1><span class=\"days\">{}</span> {} since the last mass shooting in the United States</h1>",
    data.days,
    if data.days == 1 { "day" } else { "days" }
  );

  if !data.records.is_empty() {
    let _ = writeln!(
      html,
      "<section class=\"today\">\n<h2>Today: {} {}, {} killed, {} injured</h2>\n<ul>",
      data.records.len(),
      if data.records.len() == 1 {
        "incident"
      } else {
        "incidents"
      },
      data.total_killed(),
      data.total_injured()
    );

    for record in &data.records {
      let _ = writeln!(
        html,
        "<li>{}, {}: {} ({} killed, {} injured) \
         <a href=\"{}\">incident</a> <a href=\"{}\" rel=\"noreferrer\">source</a></li>",
        escape(&record.city_county),
        escape(&record.state),
        escape(&record.address),
        record.killed,
        record.injured,
        escape(&record.incident_url),
        escape(&record.source_url),
      );
    }

    html.push_str("</ul>\n</section>\n");
  }

  let _ = writeln!(
    html,
    "</main>\n<footer>Last updated <time datetime=\"{0}\">{0}</time>. \
     Data from the <a href=\"https://www.gunviolencearchive.org\">Gun Violence Archive</a>.</footer>",
    data.last_updated.to_rfc3339()
  );
  html.push_str("</body>\n</html>\n");

  html
}

fn render_error(err: &RefreshError) -> String {
  format!(
    "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
     <title>Service unavailable</title>\n</head>\n<body>\n<main>\n\
     <h1>Service unavailable</h1>\n<p>{}</p>\n</main>\n</body>\n</html>\n",
    escape(&err.to_string())
  )
}

/// Escape text for use in HTML content and quoted attributes.
fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(ch),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::StalePolicy;
  use crate::gva::MassShootingRecord;
  use axum::body::Body;
  use axum::http::Request;
  use chrono::{NaiveDate, TimeZone};
  use color_eyre::eyre::eyre;
  use std::time::Duration;
  use tower::ServiceExt;

  const INTERVAL: Duration = Duration::from_secs(3600);

  fn sample() -> RenderData {
    RenderData {
      days: 0,
      records: vec![MassShootingRecord {
        incident_id: 2812345,
        incident_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        state: "Texas".to_string(),
        city_county: "Houston".to_string(),
        address: "Main St & <Elm>".to_string(),
        killed: 1,
        injured: 4,
        incident_url: "https://www.gunviolencearchive.org/incident/2812345".to_string(),
        source_url: "https://example.org/story".to_string(),
      }],
      last_updated: Utc.with_ymd_and_hms(2024, 1, 3, 18, 0, 0).unwrap(),
    }
  }

  fn ok_router() -> Router {
    router(Arc::new(Watcher::watch(
      INTERVAL,
      StalePolicy::AllowStale,
      || async { Ok(sample()) },
    )))
  }

  fn failing_router() -> Router {
    router(Arc::new(Watcher::watch(
      INTERVAL,
      StalePolicy::AllowStale,
      || async { Err(eyre!("upstream returned 503")) },
    )))
  }

  async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  fn request(uri: &str, accept: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(accept) = accept {
      builder = builder.header(header::ACCEPT, accept);
    }
    builder.body(Body::empty()).unwrap()
  }

  #[test]
  fn test_negotiate() {
    assert_eq!(negotiate(None), Format::Html);
    assert_eq!(negotiate(Some("*/*")), Format::Html);
    assert_eq!(negotiate(Some("application/json")), Format::Json);
    assert_eq!(
      negotiate(Some("text/html,application/xhtml+xml,*/*;q=0.8")),
      Format::Html
    );
    assert_eq!(
      negotiate(Some("application/json, text/html;q=0.5")),
      Format::Json
    );
    assert_eq!(negotiate(Some("image/png")), Format::Html);
  }

  #[test]
  fn test_escape() {
    assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
  }

  #[tokio::test]
  async fn test_index_json() {
    let response = ok_router()
      .oneshot(request("/", Some("application/json")))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["days"], 0);
    assert_eq!(body["records"][0]["incident_id"], 2812345);
    assert_eq!(body["records"][0]["incident_date"], "2024-01-03");
    assert_eq!(body["last_updated"], "2024-01-03T18:00:00Z");
  }

  #[tokio::test]
  async fn test_index_html() {
    let response = ok_router()
      .oneshot(request("/?refresh=30", Some("text/html")))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let body = body_string(response).await;
    assert!(body.contains("<span class=\"days\">0</span> days"));
    assert!(body.contains("Today: 1 incident, 1 killed, 4 injured"));
    assert!(body.contains("Main St &amp; &lt;Elm&gt;"));
    assert!(body.contains("<meta http-equiv=\"refresh\" content=\"30\">"));
  }

  #[tokio::test]
  async fn test_index_html_ignores_bad_refresh() {
    let response = ok_router()
      .oneshot(request("/?refresh=soon", None))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!body_string(response).await.contains("http-equiv"));
  }

  #[tokio::test]
  async fn test_index_html_ignores_malformed_query() {
    for uri in ["/?refresh=%ZZ", "/?refresh=1&refresh=2"] {
      let response = ok_router().oneshot(request(uri, None)).await.unwrap();

      assert_eq!(response.status(), StatusCode::OK, "{}", uri);
      let body = body_string(response).await;
      assert!(body.contains("<span class=\"days\">0</span> days"), "{}", uri);
      assert!(!body.contains("http-equiv"), "{}", uri);
    }
  }

  #[tokio::test]
  async fn test_index_unavailable_json() {
    let response = failing_router()
      .oneshot(request("/", Some("application/json")))
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["error"]
      .as_str()
      .unwrap()
      .contains("upstream returned 503"));
  }

  #[tokio::test]
  async fn test_index_unavailable_html() {
    let response = failing_router().oneshot(request("/", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_string(response).await.contains("Service unavailable"));
  }

  #[tokio::test]
  async fn test_health_before_and_after_fill() {
    let watcher = Arc::new(Watcher::watch(INTERVAL, StalePolicy::AllowStale, || async {
      Ok(sample())
    }));

    let response = router(Arc::clone(&watcher))
      .oneshot(request("/healthz", None))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["state"], "empty");

    watcher.preload().await.unwrap();

    let response = router(watcher)
      .oneshot(request("/healthz", None))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["state"], "fresh");
    assert!(body.get("last_error").is_none());
  }
}
