//! Mutual-TLS WebSocket links to an MMTP edge router.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::{ClientConfig, RootCertStore};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::infra::keystore::Keystore;
use crate::mmtp::session::{CloseReason, Dialer, Link, LinkEvent};

const LINK_BUFFER: usize = 64;
const NO_STATUS_CODE: u16 = 1005;

/// Client TLS configuration presenting the keystore identity under `alias`.
///
/// The router is trusted through the web PKI roots plus an optional PEM trust anchor.
pub fn client_tls_config(
    keystore: &Keystore,
    alias: &str,
    trust_anchor: Option<&Path>,
) -> Result<ClientConfig, SessionError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = trust_anchor {
        let pem = fs::read(path)
            .map_err(|e| SessionError::Tls(format!("cannot read trust anchor {}: {e}", path.display())))?;
        for certificate in rustls_pemfile::certs(&mut pem.as_slice()) {
            let certificate = certificate.map_err(|e| SessionError::Tls(e.to_string()))?;
            roots
                .add(certificate)
                .map_err(|e| SessionError::Tls(e.to_string()))?;
        }
    }

    let chain = keystore
        .certificate_chain(alias)
        .map_err(|e| SessionError::Tls(e.to_string()))?;
    let key = keystore
        .private_key_der(alias)
        .map_err(|e| SessionError::Tls(e.to_string()))?;

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| SessionError::Tls(e.to_string()))
}

pub struct WebSocketDialer {
    url: String,
    tls: Arc<ClientConfig>,
}

impl WebSocketDialer {
    pub fn new(url: impl Into<String>, tls: ClientConfig) -> Self {
        Self {
            url: url.into(),
            tls: Arc::new(tls),
        }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self) -> Result<Link, SessionError> {
        let connector = Connector::Rustls(self.tls.clone());
        let (stream, response) =
            connect_async_tls_with_config(self.url.as_str(), None, false, Some(connector))
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))?;
        info!(url = %self.url, status = %response.status(), "WebSocket connection established");

        let (mut sink, mut source) = stream.split();
        let (outbound, mut frames) = mpsc::channel::<Vec<u8>>(LINK_BUFFER);
        let (events, inbound) = mpsc::channel::<LinkEvent>(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if let Err(e) = sink.send(WsMessage::Binary(frame)).await {
                    warn!(error = %e, "Failed to write frame to edge router");
                    return;
                }
            }
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(close))).await {
                debug!(error = %e, "Close frame not delivered");
            }
        });

        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(WsMessage::Binary(frame))) => {
                        if events.send(LinkEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break match frame {
                            Some(frame) => CloseReason {
                                code: u16::from(frame.code),
                                reason: frame.reason.into_owned(),
                            },
                            None => CloseReason {
                                code: NO_STATUS_CODE,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(other)) => debug!(kind = ?other, "Ignoring non-binary WebSocket message"),
                    Some(Err(e)) => break CloseReason::abnormal(e.to_string()),
                    None => break CloseReason::abnormal("stream ended"),
                }
            };
            let _ = events.send(LinkEvent::Closed(reason)).await;
        });

        Ok(Link { outbound, inbound })
    }
}
