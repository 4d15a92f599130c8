use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::events::Event;
use crate::hands::Browser;

/// Commands arriving from the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Execute(String),
    Abort,
}

/// `EXECUTE:<free-text instruction>` starts a task, `ABORT` cancels the
/// running one. Anything else is rejected.
pub fn parse_command(raw: &str) -> Option<UiCommand> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("EXECUTE:") {
        let instruction = rest.trim();
        if instruction.is_empty() {
            return None;
        }
        return Some(UiCommand::Execute(instruction.to_string()));
    }
    if raw.eq_ignore_ascii_case("ABORT") {
        return Some(UiCommand::Abort);
    }
    None
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<UiCommand>,
    event_tx: broadcast::Sender<Event>,
    browser: Arc<dyn Browser>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Start the web server on localhost:3000 (falling back to 3001-3009).
/// Returns the command receiver and the event sender the executor reports
/// into.
pub async fn start_server(
    browser: Arc<dyn Browser>,
) -> anyhow::Result<(mpsc::Receiver<UiCommand>, broadcast::Sender<Event>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<UiCommand>(8);
    let (event_tx, _) = broadcast::channel::<Event>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
        browser,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/screenshot", get(screenshot_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut listener = None;
    for port in 3000..3010 {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await {
            Ok(l) => {
                listener = Some((l, port));
                break;
            }
            Err(_) => continue,
        }
    }
    let (listener, port) = listener
        .ok_or_else(|| anyhow::anyhow!("could not bind any port in 3000-3009; kill the old agent first"))?;

    info!("viewer running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("viewer server stopped: {e}");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Accepts either a raw `EXECUTE:...` body or `{"command": "..."}` JSON.
async fn command_handler(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let raw = match serde_json::from_str::<CommandPayload>(&body) {
        Ok(payload) => payload.command,
        Err(_) => body,
    };
    debug!("viewer command: {raw}");
    match parse_command(&raw) {
        Some(cmd) => {
            let _ = state.cmd_tx.send(cmd).await;
            (StatusCode::OK, "ok")
        }
        None => (StatusCode::BAD_REQUEST, "unrecognized command"),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result: Result<Event, _>| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Some(Ok::<_, Infallible>(SseEvent::default().data(json)))
        }
        Err(_) => None,
    });
    Sse::new(stream)
}

async fn screenshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.browser.screenshot().await {
        Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 14px 24px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; white-space: nowrap; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
    animation: pulse 2s infinite;
  }
  header .dot.busy { background: #f59e0b; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  #url {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 6px;
    padding: 6px 12px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
    color: #9ca3af;
    overflow: hidden;
    text-overflow: ellipsis;
    white-space: nowrap;
  }
  .main { flex: 1; display: flex; overflow: hidden; }
  .left {
    width: 420px;
    display: flex;
    flex-direction: column;
    border-right: 1px solid #1a1a2e;
    padding: 16px;
    gap: 12px;
  }
  #log {
    flex: 1;
    overflow-y: auto;
    display: flex;
    flex-direction: column;
    gap: 8px;
    padding-right: 8px;
  }
  #log::-webkit-scrollbar { width: 6px; }
  #log::-webkit-scrollbar-thumb { background: #333; border-radius: 3px; }
  .entry {
    padding: 8px 12px;
    border-radius: 8px;
    font-size: 13px;
    line-height: 1.5;
    word-break: break-all;
    animation: fadeIn 0.2s ease;
  }
  @keyframes fadeIn { from { opacity: 0; transform: translateY(4px); } to { opacity: 1; } }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.step {
    background: #111118;
    border-left: 3px solid #3b82f6;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 12px;
  }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .input-area { display: flex; gap: 8px; }
  #cmd {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 10px 14px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #cmd:focus { border-color: #6366f1; }
  #cmd:disabled { opacity: 0.5; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 10px 18px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
  button:disabled { background: #333; cursor: not-allowed; }
  button.abort { background: #7f1d1d; }
  button.abort:hover { background: #991b1b; }
  #dom {
    flex: 1;
    overflow: auto;
    padding: 16px;
    background: #fff;
    color: #111;
  }
  #dom .agent-highlight { outline: 2px solid #6366f1; outline-offset: 1px; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Browser Agent</h1>
    <div id="url">about:blank</div>
  </header>
  <div class="main">
    <div class="left">
      <div id="log"></div>
      <div class="input-area">
        <input type="text" id="cmd" placeholder="Tell the agent what to do..." autofocus />
        <button id="send" onclick="send()">Send</button>
        <button class="abort" onclick="abortTask()">Stop</button>
      </div>
    </div>
    <div id="dom"></div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  const urlEl = document.getElementById('url');
  const dom = document.getElementById('dom');
  let busy = false;

  function addEntry(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    cmd.disabled = b;
    sendBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  async function post(body) {
    await fetch('/command', { method: 'POST', body: body });
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text || busy) return;
    cmd.value = '';
    addEntry('user', 'You: ' + text);
    setBusy(true);
    await post('EXECUTE:' + text);
  }

  async function abortTask() {
    await post('ABORT');
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  function renderPage(data) {
    urlEl.textContent = data.url;
    dom.innerHTML = data.html;
    for (const el of data.interactive_elements || []) {
      const target = dom.querySelector(el.selector);
      if (target) target.classList.add('agent-highlight');
    }
  }

  const es = new EventSource('/events');
  es.onmessage = e => {
    const ev = JSON.parse(e.data);
    if (ev.data) renderPage(ev.data);
    if (ev.type === 'action') {
      addEntry('step', ev.action.type + ' ' + JSON.stringify(ev.action));
    } else if (ev.type === 'status') {
      addEntry('done', (ev.status || 'status') + (ev.message ? ': ' + ev.message : ''));
      if (ev.status) setBusy(false);
    } else if (ev.type === 'error') {
      addEntry('error', ev.message || 'error');
      if (ev.status) setBusy(false);
    }
  };

  addEntry('done', 'Agent ready. Type a command to begin.');
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_prefix_carries_the_instruction() {
        assert_eq!(
            parse_command("EXECUTE:Search for cricket on Google"),
            Some(UiCommand::Execute("Search for cricket on Google".into()))
        );
        assert_eq!(
            parse_command("  EXECUTE:  spaced out  "),
            Some(UiCommand::Execute("spaced out".into()))
        );
    }

    #[test]
    fn abort_is_case_insensitive() {
        assert_eq!(parse_command("ABORT"), Some(UiCommand::Abort));
        assert_eq!(parse_command("abort"), Some(UiCommand::Abort));
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse_command("EXECUTE:"), None);
        assert_eq!(parse_command("EXECUTE:   "), None);
        assert_eq!(parse_command("do the thing"), None);
        assert_eq!(parse_command(""), None);
    }
}
