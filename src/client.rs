//! A minimal demo client driving [`ConnectionState`] over a real TLS socket.
//! Exists to exercise the engine end-to-end; not part of the spec's core.

use crate::config::Http2ConnectionConfig;
use crate::connection::{ConnectionEvent, ConnectionState};
use crate::hpack;
use crate::request::Request;
use crate::response::Response;
use crate::socket::Socket;
use anyhow::anyhow;
use bytes::BytesMut;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

pub struct Client {
    rustls_config: Arc<rustls::ClientConfig>,
}

impl Default for Client {
    fn default() -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
        }));
        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec()];
        Self { rustls_config: Arc::new(config) }
    }
}

impl Client {
    pub async fn get(&self, url: Url) -> anyhow::Result<Response> {
        let request = Request::get(url.clone(), None);
        self.send(request).await
    }

    pub async fn send(&self, request: Request) -> anyhow::Result<Response> {
        let host = request.url.host_str().ok_or_else(|| anyhow!("no host in URL"))?;
        let port = request.url.port_or_known_default().ok_or_else(|| anyhow!("no port for URL"))?;

        let tcp = tokio::net::TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(self.rustls_config.clone());
        let server_name = rustls::ServerName::try_from(host)?;
        let tls = connector.connect(server_name, tcp).await?;
        let mut socket = Socket::new(tls);
        socket.write_preface().await?;

        let mut conn = ConnectionState::new(Http2ConnectionConfig::default(), false);
        for frame in conn.opening_frames() {
            socket.write_frame(&frame).await?;
        }

        let mut encoder = hpack::Encoder::new();
        let header_block = encoder.encode(request.headers.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes())));
        let mut fragment = BytesMut::new();
        fragment.extend_from_slice(&header_block);
        let headers_frame = crate::frame::Frame::Headers {
            stream_id: 1,
            end_stream: request.body.is_empty(),
            end_headers: true,
            priority: None,
            fragment: fragment.freeze(),
        };
        socket.write_frame(&headers_frame).await?;
        if !request.body.is_empty() {
            socket.write_frame(&crate::frame::Frame::Data { stream_id: 1, end_stream: true, data: request.body.clone() }).await?;
        }

        let start = Instant::now();
        let mut response_headers: Option<HashMap<String, String>> = None;
        let mut body = BytesMut::new();
        loop {
            let frame = socket.read_frame().await?;
            let (outbound, events) = conn.handle_frame(frame, false, start.elapsed());
            for frame in outbound {
                socket.write_frame(&frame).await?;
            }
            for event in events {
                trace!("{:?}", event);
                match event {
                    ConnectionEvent::HeadersReceived { stream_id: 1, headers, end_stream, .. } => {
                        response_headers = Some(headers.into_iter().collect());
                        if end_stream {
                            return Ok(Response::new(response_headers.unwrap(), body.freeze()));
                        }
                    }
                    ConnectionEvent::DataReceived { stream_id: 1, data, end_stream } => {
                        body.extend_from_slice(&data);
                        if end_stream {
                            let headers = response_headers.take().unwrap_or_default();
                            return Ok(Response::new(headers, body.freeze()));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
