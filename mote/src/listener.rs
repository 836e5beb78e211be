// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bind one TCP socket per configured listener and hand accepted
//! connections off to `connection::handle_connection`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use http::HeaderValue;
use tokio::net::TcpListener;
use tokio_rustls::{rustls, TlsAcceptor};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::broker::Broker;
use crate::config::{ListenerConfig, Protocol};
use crate::connection;
use crate::error::{Error, ErrorKind};
use crate::session::SessionConfig;
use crate::stream::Stream;

fn load_certs(path: &Path) -> Result<Vec<rustls::Certificate>, Error> {
    let items = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("failed to load cert file at {path:?}, got: {err:?}"),
        )
    })?;
    Ok(items.into_iter().map(rustls::Certificate).collect())
}

fn load_keys(path: &Path) -> Result<Vec<rustls::PrivateKey>, Error> {
    if let Ok(keys) = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(path)?)) {
        if !keys.is_empty() {
            return Ok(keys.into_iter().map(rustls::PrivateKey).collect());
        }
    }
    if let Ok(keys) = rustls_pemfile::rsa_private_keys(&mut BufReader::new(File::open(path)?)) {
        if !keys.is_empty() {
            return Ok(keys.into_iter().map(rustls::PrivateKey).collect());
        }
    }
    Err(Error::from_string(
        ErrorKind::CertError,
        format!("failed to load key file at {path:?}"),
    ))
}

fn build_tls_acceptor(config: &ListenerConfig) -> Result<TlsAcceptor, Error> {
    let cert_path = config
        .ssl_cert
        .as_ref()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "ssl_cert is required"))?;
    let key_path = config
        .ssl_key
        .as_ref()
        .ok_or_else(|| Error::new(ErrorKind::CertError, "ssl_key is required"))?;

    let certs = load_certs(cert_path)?;
    let mut keys = load_keys(key_path)?;
    let tls_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, keys.remove(0))
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("failed to build tls config: {err}"))
        })?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Stamp the `mqtt` subprotocol onto the upgrade response (spec.md §6):
/// tungstenite's default `accept_async` never sets
/// `Sec-WebSocket-Protocol`, so the WS listener uses this as its
/// handshake callback instead.
fn negotiate_mqtt_subprotocol(_request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    response
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));
    Ok(response)
}

enum Binding {
    Mqtt(TcpListener),
    Mqtts(TcpListener, TlsAcceptor),
    Ws(TcpListener),
    Wss(TcpListener, TlsAcceptor),
}

/// One bound socket accepting connections for the lifetime of the
/// broker process.
pub struct ListenerTask {
    binding: Binding,
    address: String,
}

impl ListenerTask {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, Error> {
        let address = config.address();
        let tcp_listener = TcpListener::bind(&address).await?;
        let binding = match (config.protocol, config.is_tls()) {
            (Protocol::Tcp, false) => Binding::Mqtt(tcp_listener),
            (Protocol::Tcp, true) => Binding::Mqtts(tcp_listener, build_tls_acceptor(config)?),
            (Protocol::Ws, false) => Binding::Ws(tcp_listener),
            (Protocol::Ws, true) => Binding::Wss(tcp_listener, build_tls_acceptor(config)?),
        };
        let scheme = match &binding {
            Binding::Mqtt(_) => "mqtt",
            Binding::Mqtts(..) => "mqtts",
            Binding::Ws(_) => "ws",
            Binding::Wss(..) => "wss",
        };
        log::info!("listener: bound {scheme}://{address}");
        Ok(ListenerTask { binding, address })
    }

    async fn accept(&mut self) -> Result<Stream, Error> {
        match &mut self.binding {
            Binding::Mqtt(listener) => {
                let (tcp_stream, _addr) = listener.accept().await?;
                Ok(Stream::Mqtt(tcp_stream))
            }
            Binding::Mqtts(listener, acceptor) => {
                let (tcp_stream, _addr) = listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                Ok(Stream::Mqtts(Box::new(tls_stream)))
            }
            Binding::Ws(listener) => {
                let (tcp_stream, _addr) = listener.accept().await?;
                let ws_stream =
                    tokio_tungstenite::accept_hdr_async(tcp_stream, negotiate_mqtt_subprotocol).await?;
                Ok(Stream::Ws(Box::new(ws_stream)))
            }
            Binding::Wss(listener, acceptor) => {
                let (tcp_stream, _addr) = listener.accept().await?;
                let tls_stream = acceptor.accept(tcp_stream).await?;
                let ws_stream =
                    tokio_tungstenite::accept_hdr_async(tls_stream, negotiate_mqtt_subprotocol).await?;
                Ok(Stream::Wss(Box::new(ws_stream)))
            }
        }
    }

    /// Accept connections forever, spawning one connection task per
    /// socket. Returns only if `accept()` itself errors (the listening
    /// socket is gone).
    pub async fn run(mut self, broker: Arc<Broker>, session_config: SessionConfig) -> Error {
        loop {
            match self.accept().await {
                Ok(stream) => {
                    let broker = broker.clone();
                    let session_config = session_config.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection::handle_connection(stream, broker, session_config).await {
                            log::warn!("connection: handler exited with error: {err}");
                        }
                    });
                }
                Err(err) => {
                    log::error!("listener: accept failed on {}: {err}", self.address);
                    return err;
                }
            }
        }
    }
}
