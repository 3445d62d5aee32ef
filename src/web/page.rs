//! Embeddable viewer page
//!
//! Self-contained: opens `/ws` on the serving host, renders each binary
//! message as the next image, reconnects with exponential backoff and shows
//! a waiting indicator until the first frame arrives.

use axum::{
    http::header,
    response::{Html, IntoResponse},
};

/// `GET /` and `GET /stream`
pub async fn viewer_page() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(VIEWER_HTML),
    )
}

pub const VIEWER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Virtual Camera</title>
<style>
  html, body { margin: 0; height: 100%; background: #000; overflow: hidden; }
  #frame { width: 100%; height: 100%; object-fit: contain; display: none; }
  #waiting {
    position: absolute; inset: 0; display: flex; align-items: center;
    justify-content: center; color: #888; font: 16px sans-serif;
  }
  #viewers {
    position: absolute; right: 8px; bottom: 8px; color: #666;
    font: 12px monospace; display: none;
  }
</style>
</head>
<body>
<img id="frame" alt="">
<div id="waiting">Waiting for frames&hellip;</div>
<div id="viewers"></div>
<script>
(function () {
  var img = document.getElementById("frame");
  var waiting = document.getElementById("waiting");
  var viewers = document.getElementById("viewers");
  var scheme = location.protocol === "https:" ? "wss://" : "ws://";
  var url = scheme + location.host + "/ws";
  var minDelay = 500, maxDelay = 10000, delay = minDelay;
  var currentUrl = null;
  var pendingUrl = null;

  function showWaiting(text) {
    waiting.textContent = text;
    waiting.style.display = "flex";
  }

  function render(data) {
    var next = URL.createObjectURL(new Blob([data], { type: "image/jpeg" }));
    // A frame still decoding is superseded, not leaked
    if (pendingUrl) { URL.revokeObjectURL(pendingUrl); }
    pendingUrl = next;
    img.onload = function () {
      if (currentUrl && currentUrl !== next) { URL.revokeObjectURL(currentUrl); }
      currentUrl = next;
      if (pendingUrl === next) { pendingUrl = null; }
    };
    img.onerror = function () {
      if (pendingUrl === next) { pendingUrl = null; }
      if (next !== currentUrl) { URL.revokeObjectURL(next); }
    };
    img.src = next;
    img.style.display = "block";
    waiting.style.display = "none";
  }

  function connect() {
    var ws;
    try {
      ws = new WebSocket(url);
    } catch (e) {
      schedule();
      return;
    }
    ws.binaryType = "arraybuffer";

    ws.onopen = function () {
      delay = minDelay;
      if (!currentUrl) { showWaiting("Waiting for frames…"); }
    };
    ws.onmessage = function (event) {
      if (typeof event.data === "string") {
        try {
          var msg = JSON.parse(event.data);
          if (msg.type === "stats") {
            viewers.textContent = msg.clients + " viewer" + (msg.clients === 1 ? "" : "s");
            viewers.style.display = "block";
          }
        } catch (e) { /* ignore */ }
        return;
      }
      render(event.data);
    };
    ws.onerror = function () { /* onclose follows */ };
    ws.onclose = function () {
      if (!currentUrl) { showWaiting("Reconnecting…"); }
      schedule();
    };
  }

  function schedule() {
    setTimeout(connect, delay);
    delay = Math.min(delay * 2, maxDelay);
  }

  connect();
})();
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_targets_viewer_transport() {
        assert!(VIEWER_HTML.contains("\"/ws\""));
        assert!(VIEWER_HTML.contains("Waiting for frames"));
        assert!(VIEWER_HTML.contains("maxDelay = 10000"));
    }

    #[test]
    fn test_page_revokes_superseded_frames() {
        // Every created object URL has a revoke path: superseded while
        // decoding, replaced after load, or failed to decode
        assert!(VIEWER_HTML.contains("if (pendingUrl) { URL.revokeObjectURL(pendingUrl); }"));
        assert!(VIEWER_HTML.contains("URL.revokeObjectURL(currentUrl)"));
        assert!(VIEWER_HTML.contains("img.onerror"));
    }
}
