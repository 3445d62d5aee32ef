//! HTTP surface of the relay
//!
//! - `GET /`, `GET /stream`: embeddable viewer page
//! - `GET /ws`: viewer transport
//! - `GET /health`
//! - `GET /api/status`, `GET /api/stats`, `GET /api/sessions`
//! - `POST /api/frame`, `GET /ws/ingest`: frame ingest

mod handlers;
mod ingest;
mod page;
mod routes;
mod ws;

pub use ingest::{parse_timestamp, TIMESTAMP_HEADER};
pub use page::VIEWER_HTML;
pub use routes::create_router;
pub use ws::viewer_ws_handler;
