//! Static web UI assets, embedded at compile time.
//!
//! The three files live under `crates/kinesis-gateway/assets/` and are baked
//! into the binary with `include_str!`, so the gateway has no runtime
//! dependency on its install directory.

use axum::http::header;
use axum::response::{Html, IntoResponse};

pub const INDEX_HTML: &str = include_str!("../../assets/index.html");
pub const INDEX_JS: &str = include_str!("../../assets/index.js");
pub const MAIN_CSS: &str = include_str!("../../assets/main.css");

pub async fn index_html() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn index_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        INDEX_JS,
    )
}

pub async fn main_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], MAIN_CSS)
}
