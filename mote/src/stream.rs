// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Transport abstraction shared by every connection handler: a plain TCP
//! socket, a TLS-wrapped one, or a WebSocket built on either.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::Error;

pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
}

impl Stream {
    /// Read at least one byte into `buf`, appending to whatever is
    /// already there. Returns `0` on a clean EOF/close.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Stream::Mqtt(stream) => Ok(stream.read_buf(buf).await?),
            Stream::Mqtts(stream) => Ok(stream.read_buf(buf).await?),
            Stream::Ws(ws_stream) => Self::read_ws_buf(ws_stream, buf).await,
            Stream::Wss(ws_stream) => Self::read_ws_buf(ws_stream, buf).await,
        }
    }

    /// Drains control frames itself (tungstenite already auto-replies to
    /// pings) so a `0` return unambiguously means the socket closed.
    async fn read_ws_buf<S>(
        ws_stream: &mut WebSocketStream<S>,
        buf: &mut Vec<u8>,
    ) -> Result<usize, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let len = data.len();
                    buf.extend_from_slice(&data);
                    return Ok(len);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(0),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Stream::Mqtt(stream) => Ok(stream.write_all(buf).await?),
            Stream::Mqtts(stream) => Ok(stream.write_all(buf).await?),
            Stream::Ws(ws_stream) => Self::write_ws_all(ws_stream, buf).await,
            Stream::Wss(ws_stream) => Self::write_ws_all(ws_stream, buf).await,
        }
    }

    async fn write_ws_all<S>(
        ws_stream: &mut WebSocketStream<S>,
        buf: &[u8],
    ) -> Result<(), Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        ws_stream.send(Message::binary(buf.to_vec())).await?;
        Ok(())
    }
}
