use crate::config::BlissConfig;
use crate::dispatch::InboundRequest;
use crate::err::HostErr;
use crate::host::Bliss;
use crate::sandbox::proxy::HttpReply;
use crate::shutdown::{add_shutdown_hook, requested, shutdown_signal};
use crate::stream::StreamSession;
use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// every path is tenant defined, so the whole surface is a single fallback handler
pub fn router(bliss: Bliss) -> Router {
    Router::new().fallback(serve).with_state(bliss)
}

/// Serves until [`crate::shutdown::shutdown`] is called and returns the requested exit code.
pub async fn run(config: BlissConfig) -> Result<i32, HostErr> {
    let bliss = Bliss::new(&config).await?;
    {
        let catalog = bliss.catalog().clone();
        add_shutdown_hook(Box::pin(async move {
            catalog.close().await;
        }));
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        "bliss {} listening on port {} with {} routes",
        crate::VERSION,
        config.port,
        bliss.routes().snapshot().len()
    );

    axum::serve(listener, router(bliss))
        .with_graceful_shutdown(async {
            shutdown_signal().await;
        })
        .await?;

    info!("bliss stopped accepting requests");
    Ok(requested().unwrap_or(0))
}

async fn serve(
    State(bliss): State<Bliss>,
    upgrade: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(upgrade) = upgrade {
        if bliss.routes().find_stream(uri.path()).is_some() {
            let path = uri.path().to_string();
            return upgrade.on_upgrade(move |socket| stream(bliss, path, socket));
        }
    }

    let request = InboundRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect(),
        body: String::from_utf8_lossy(&body).to_string(),
    };

    into_response(bliss.dispatch(request).await.into_reply())
}

/// the session is opened only once the upgrade has completed, so a client that goes away
/// during the handshake is never counted as live
async fn stream(bliss: Bliss, path: String, mut socket: WebSocket) {
    let session = match bliss.streams().open(path.as_str()) {
        Some(session) => session,
        None => {
            debug!("stream route for '{}' went away during the upgrade", path);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    serve_session(&bliss, &session, &mut socket).await;
    bliss.streams().close(&session);
}

async fn serve_session(bliss: &Bliss, session: &StreamSession, socket: &mut WebSocket) {
    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(session = %session.id, "stream receive failed: {}", err);
                break;
            }
        };

        let outbox = match bliss.streams().on_message(session, message).await {
            Ok(outbox) => outbox,
            Err(err) => vec![err.diagnostic()],
        };

        for text in outbox {
            if let Err(err) = socket.send(Message::Text(text)).await {
                warn!(session = %session.id, "stream send failed: {}", err);
                return;
            }
        }
    }
}

fn into_response(reply: HttpReply) -> Response {
    let mut builder = Response::builder().status(reply.status);
    for (name, value) in reply.headers.iter() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Body::from(reply.body)) {
        Ok(response) => response,
        Err(err) => {
            warn!("handler produced an invalid response: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
