//! HTTP/3 origin
//!
//! A single QUIC endpoint serves the static client bundle, the live DASH
//! directory, recorded movement traces, the ABR hint endpoint, and the
//! WebTransport pose channel. DASH media fetches and pose datagrams share
//! the UDP 4-tuple when the client multiplexes them; QUIC stream
//! independence keeps control traffic out of the media delivery path.

use crate::abr::AbrEstimator;
use crate::control::{ControlLog, ControlStore, POSE_DATAGRAM_LEN};
use anyhow::{Context as _, Result};
use bytes::Bytes;
use h3::error::ErrorLevel;
use h3::ext::Protocol;
use h3::server::RequestStream;
use h3_webtransport::server::WebTransportSession;
use http::{Method, Request, Response, StatusCode};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub static_dir: PathBuf,
    pub segments_dir: PathBuf,
    pub movement_dir: PathBuf,
    pub control_log: PathBuf,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub abr: AbrEstimator,
    pub store: ControlStore,
    pub log: ControlLog,
}

type ServerRequestStream = RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>;

/// Bind the endpoint and serve until the task is dropped. Startup failures
/// (TLS material, directories, the control log) are fatal; per-connection
/// and per-session failures are logged and absorbed.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.segments_dir)
        .await
        .with_context(|| {
            format!(
                "unable to create segments dir {}",
                config.segments_dir.display()
            )
        })?;
    let log = ControlLog::create(&config.control_log)
        .await
        .with_context(|| {
            format!("unable to open control log {}", config.control_log.display())
        })?;

    let tls = load_tls(&config.cert_path, &config.key_path)?;
    let quic = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .context("TLS configuration rejected for QUIC")?;
    let endpoint = quinn::Endpoint::server(
        quinn::ServerConfig::with_crypto(Arc::new(quic)),
        config.addr,
    )?;

    info!(addr = %config.addr, "serving TIGAS over HTTP/3");
    info!(
        static_root = %config.static_dir.display(),
        dash_root = %config.segments_dir.display(),
        "content roots"
    );

    let state = Arc::new(ServerState {
        abr: AbrEstimator::new(),
        store: ControlStore::new(),
        log,
        config,
    });

    while let Some(incoming) = endpoint.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(incoming, state).await {
                warn!(error = %err, "connection ended");
            }
        });
    }
    Ok(())
}

async fn handle_connection(incoming: quinn::Incoming, state: Arc<ServerState>) -> Result<()> {
    let conn = incoming.await?;
    debug!(remote = %conn.remote_address(), "QUIC connection established");

    let mut h3_conn: h3::server::Connection<h3_quinn::Connection, Bytes> = h3::server::builder()
        .enable_webtransport(true)
        .enable_connect(true)
        .enable_datagram(true)
        .max_webtransport_sessions(1)
        .send_grease(true)
        .build(h3_quinn::Connection::new(conn))
        .await?;

    loop {
        match h3_conn.accept().await {
            Ok(Some((req, stream))) => {
                let is_webtransport = req.method() == Method::CONNECT
                    && req.extensions().get::<Protocol>() == Some(&Protocol::WEB_TRANSPORT);
                if is_webtransport && req.uri().path() == "/wt" {
                    // The session owns the connection from here on; media
                    // fetches ride the client's other connections.
                    let session = WebTransportSession::accept(req, stream, h3_conn)
                        .await
                        .context("webtransport upgrade failed")?;
                    info!("webtransport session opened");
                    return run_pose_session(session, state).await;
                }

                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_request(req, stream, state).await {
                        warn!(error = %err, "request handler failed");
                    }
                });
            }
            Ok(None) => break,
            Err(err) => match err.get_error_level() {
                ErrorLevel::ConnectionError => {
                    debug!(error = %err, "h3 connection closed");
                    break;
                }
                ErrorLevel::StreamError => continue,
            },
        }
    }
    Ok(())
}

/// Per-session datagram loop. Receive errors and EOF terminate only this
/// session; dropping the session closes the CONNECT stream.
async fn run_pose_session(
    session: WebTransportSession<h3_quinn::Connection, Bytes>,
    state: Arc<ServerState>,
) -> Result<()> {
    loop {
        match session.accept_datagram().await {
            Ok(Some((_session_id, payload))) => {
                if payload.len() != POSE_DATAGRAM_LEN {
                    debug!(len = payload.len(), "discarding malformed pose datagram");
                    continue;
                }
                state.store.append(&payload);
                state.log.append(&payload).await?;
                debug!(total = state.store.len(), "pose datagram stored");
            }
            Ok(None) => {
                info!("webtransport session closed");
                return Ok(());
            }
            Err(err) => {
                info!(error = %err, "datagram receive ended");
                return Ok(());
            }
        }
    }
}

async fn handle_request(
    req: Request<()>,
    mut stream: ServerRequestStream,
    state: Arc<ServerState>,
) -> Result<()> {
    if req.method() != Method::GET {
        return respond(
            &mut stream,
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            Bytes::new(),
        )
        .await;
    }

    let path = req.uri().path().to_string();
    debug!(%path, "GET");

    if path == "/abr-profile" {
        let body = serde_json::to_vec(&state.abr.snapshot())?;
        return respond(&mut stream, StatusCode::OK, "application/json", body.into()).await;
    }
    if let Some(rel) = path.strip_prefix("/dash/") {
        return serve_dash(rel, &mut stream, &state).await;
    }
    if let Some(rel) = path.strip_prefix("/movement_traces/") {
        return serve_from(&state.config.movement_dir, rel, &mut stream).await;
    }

    let rel = if path == "/" {
        "index.html"
    } else {
        path.trim_start_matches('/')
    };
    serve_from(&state.config.static_dir, rel, &mut stream).await
}

/// Serve a segment or manifest; completed `.m4s` deliveries feed the ABR
/// estimator with the file's size (stat'ed after serving) and the observed
/// wall-clock duration.
async fn serve_dash(rel: &str, stream: &mut ServerRequestStream, state: &ServerState) -> Result<()> {
    let start = Instant::now();
    serve_from(&state.config.segments_dir, rel, stream).await?;

    if !rel.ends_with(".m4s") {
        return Ok(());
    }
    let Some(full) = resolve(&state.config.segments_dir, rel) else {
        return Ok(());
    };
    let Ok(meta) = tokio::fs::metadata(&full).await else {
        return Ok(());
    };
    if meta.len() == 0 {
        return Ok(());
    }

    let duration = start.elapsed().as_secs_f64();
    state.abr.record_segment(meta.len(), duration);
    debug!(segment = rel, bytes = meta.len(), duration, "ABR sample");
    Ok(())
}

async fn serve_from(root: &Path, rel: &str, stream: &mut ServerRequestStream) -> Result<()> {
    let Some(path) = resolve(root, rel) else {
        return respond(stream, StatusCode::NOT_FOUND, "text/plain", Bytes::new()).await;
    };
    match tokio::fs::read(&path).await {
        Ok(body) => {
            respond(
                stream,
                StatusCode::OK,
                content_type_for(&path),
                body.into(),
            )
            .await
        }
        Err(_) => respond(stream, StatusCode::NOT_FOUND, "text/plain", Bytes::new()).await,
    }
}

async fn respond(
    stream: &mut ServerRequestStream,
    status: StatusCode,
    content_type: &str,
    body: Bytes,
) -> Result<()> {
    let response = Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(())?;
    stream.send_response(response).await?;
    if !body.is_empty() {
        stream.send_data(body).await?;
    }
    stream.finish().await?;
    Ok(())
}

/// Join a request path onto a content root, refusing traversal.
fn resolve(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part => out.push(part),
        }
    }
    Some(out)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mpd") => "application/dash+xml",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn load_tls(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig> {
    // Pin the process crypto provider before any rustls builder runs.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("unable to open certificate {}", cert_path.display()))?,
    ))
    .collect::<std::io::Result<Vec<_>>>()
    .context("malformed certificate PEM")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path)
            .with_context(|| format!("unable to open key {}", key_path.display()))?,
    ))
    .context("malformed key PEM")?
    .context("no private key found")?;

    let mut tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate/key rejected")?;
    tls.max_early_data_size = u32::MAX;
    tls.alpn_protocols = vec![b"h3".to_vec()];
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_joins_inside_the_root() {
        let root = Path::new("/srv/dash");
        assert_eq!(
            resolve(root, "chunk_0_1.m4s").unwrap(),
            PathBuf::from("/srv/dash/chunk_0_1.m4s")
        );
        assert_eq!(
            resolve(root, "sub/./stream.mpd").unwrap(),
            PathBuf::from("/srv/dash/sub/stream.mpd")
        );
    }

    #[test]
    fn resolve_refuses_traversal() {
        let root = Path::new("/srv/dash");
        assert!(resolve(root, "../secrets").is_none());
        assert!(resolve(root, "a/../../b").is_none());
    }

    #[test]
    fn content_types_cover_the_streaming_surface() {
        assert_eq!(
            content_type_for(Path::new("stream.mpd")),
            "application/dash+xml"
        );
        assert_eq!(
            content_type_for(Path::new("chunk_0_1.m4s")),
            "video/iso.segment"
        );
        assert_eq!(content_type_for(Path::new("init_0.mp4")), "video/mp4");
        assert_eq!(
            content_type_for(Path::new("unknown.bin")),
            "application/octet-stream"
        );
    }
}
