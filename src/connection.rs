// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! One client connection: handshake, request loop, and server-to-client
//! emission.
//!
//! A connection owns its stream exclusively for its whole life. The task
//! running [`RfbConnection::run`] is the only reader and the only writer;
//! handler callbacks borrow the connection mutably, so emission can never
//! interleave with the read loop or with another task's frames.
//!
//! # Protocol Flow
//!
//! 1. **ProtocolVersion**: both sides exchange the fixed 12-byte version.
//! 2. **Security**: the server offers None or VNC Authentication and, for
//!    the latter, runs the DES challenge-response.
//! 3. **ClientInit/ServerInit**: the shared flag is read, then geometry,
//!    pixel format, and name are sent.
//! 4. **Requests**: tagged client messages are decoded and dispatched to
//!    the handler until EOF or a protocol error.

use bytes::{BufMut, BytesMut};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::VncAuth;
use crate::protocol::{
    ClientMessage, Rectangle, ServerInit, AUTH_FAILURE_REASON, PROTOCOL_VERSION,
    SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH,
    SERVER_MSG_FRAMEBUFFER_UPDATE, SERVER_MSG_SERVER_CUT_TEXT,
};
use crate::server::ServerConfig;

/// Full-duplex byte stream a connection can run over. Blanket-implemented,
/// so TCP streams, in-memory duplex pipes, and tunnelled transports all
/// qualify.
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for S {}

/// Where a connection is in its life. Transitions are monotonic; a
/// connection never re-enters an earlier phase. `Authenticating` is skipped
/// when the server offers security type None.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    Handshake,
    Authenticating,
    Initialising,
    Running,
    Closed,
}

/// A live client connection.
///
/// Handler callbacks receive `&mut RfbConnection` and use it to push
/// framebuffer rectangles and cut text back to the client.
pub struct RfbConnection {
    config: Arc<ServerConfig>,
    stream: Box<dyn AsyncStream>,
    peer: String,
    phase: ConnectionPhase,
}

impl RfbConnection {
    pub(crate) fn new(config: Arc<ServerConfig>, stream: Box<dyn AsyncStream>, peer: String) -> Self {
        Self {
            config,
            stream,
            peer,
            phase: ConnectionPhase::Handshake,
        }
    }

    /// The configuration this connection was accepted under.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A printable label for the remote end, used in log output.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The connection's current protocol phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    fn advance(&mut self, next: ConnectionPhase) {
        debug_assert!(self.phase <= next, "phase may not move backwards");
        if self.phase < next {
            debug!("client {}: {:?} -> {next:?}", self.peer, self.phase);
            self.phase = next;
        }
    }

    /// Drives the connection from handshake to close. The stream is shut
    /// down on every exit path.
    pub(crate) async fn run(mut self) {
        match self.handshake().await {
            Ok(()) => {
                self.advance(ConnectionPhase::Running);
                info!("client {}: handshake complete", self.peer);

                let handler = Arc::clone(&self.config.handler);
                handler.init(&mut self).await;

                match self.process_requests().await {
                    Ok(()) => info!("client {} disconnected", self.peer),
                    Err(e) => warn!("client {}: connection ended: {e}", self.peer),
                }
            }
            Err(e) => warn!("client {}: handshake failed: {e}", self.peer),
        }

        self.advance(ConnectionPhase::Closed);
        let _ = self.stream.shutdown().await;
    }

    async fn handshake(&mut self) -> io::Result<()> {
        self.agree_protocol().await?;
        self.agree_security().await?;
        self.perform_init().await
    }

    /// Phase 1: both sides must speak exactly RFB 3.8.
    async fn agree_protocol(&mut self) -> io::Result<()> {
        self.stream.write_all(PROTOCOL_VERSION).await?;

        let mut version = [0u8; 12];
        self.stream.read_exact(&mut version).await?;
        if &version != PROTOCOL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "client version {:?} is not RFB 3.8",
                    String::from_utf8_lossy(&version)
                ),
            ));
        }
        debug!("client {}: protocol version agreed", self.peer);
        Ok(())
    }

    /// Phase 2: offer exactly one security type and, for VNC Authentication,
    /// run the challenge-response before reporting the SecurityResult.
    async fn agree_security(&mut self) -> io::Result<()> {
        let offered = if self.config.authenticate {
            SECURITY_TYPE_VNC_AUTH
        } else {
            SECURITY_TYPE_NONE
        };
        self.stream.write_all(&[1, offered]).await?;

        // Only one type is on offer, so the selection is informational.
        let mut selected = [0u8; 1];
        self.stream.read_exact(&mut selected).await?;
        debug!("client {}: selected security type {}", self.peer, selected[0]);

        if self.config.authenticate {
            self.advance(ConnectionPhase::Authenticating);

            let auth = VncAuth::new(self.config.auth_text.clone());
            let challenge = auth.generate_challenge();
            self.stream.write_all(&challenge).await?;

            let mut response = [0u8; 16];
            self.stream.read_exact(&mut response).await?;

            if !auth.verify_response(&challenge, &response) {
                let reason = AUTH_FAILURE_REASON.as_bytes();
                let mut failure = BytesMut::with_capacity(8 + reason.len());
                failure.put_u32(SECURITY_RESULT_FAILED);
                failure.put_u32(reason.len() as u32);
                failure.put_slice(reason);
                self.stream.write_all(&failure).await?;
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "VNC authentication failed",
                ));
            }
        }

        let mut ok = BytesMut::with_capacity(4);
        ok.put_u32(SECURITY_RESULT_OK);
        self.stream.write_all(&ok).await?;
        Ok(())
    }

    /// Phase 3: read the shared flag, send ServerInit.
    async fn perform_init(&mut self) -> io::Result<()> {
        self.advance(ConnectionPhase::Initialising);

        // Single-client semantics are assumed; the flag is only logged.
        let mut shared = [0u8; 1];
        self.stream.read_exact(&mut shared).await?;
        debug!("client {}: shared flag {}", self.peer, shared[0]);

        let init = ServerInit {
            width: self.config.width,
            height: self.config.height,
            pixel_format: &self.config.pixel_format,
            name: &self.config.buffer_name,
        };
        let mut frame = BytesMut::with_capacity(24 + self.config.buffer_name.len());
        init.write_to(&mut frame);
        self.stream.write_all(&frame).await
    }

    /// The request loop: one tag byte, one exact body, one handler call,
    /// strictly in sequence. Returns `Ok` on a clean EOF at a message
    /// boundary; everything else is an error that closes the connection.
    async fn process_requests(&mut self) -> io::Result<()> {
        loop {
            let message = match self.config.read_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.next_message()).await {
                    Ok(read) => read?,
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "client read deadline elapsed",
                        ))
                    }
                },
                None => self.next_message().await?,
            };
            let Some(message) = message else {
                return Ok(());
            };

            let handler = Arc::clone(&self.config.handler);
            match message {
                ClientMessage::SetPixelFormat(format) => {
                    handler.on_set_pixel_format(self, format).await;
                }
                ClientMessage::FixColourMapEntries => {
                    debug!("client {}: discarding FixColourMapEntries", self.peer);
                }
                ClientMessage::SetEncodings(encodings) => {
                    handler.on_set_encodings(self, encodings).await;
                }
                ClientMessage::FramebufferUpdateRequest {
                    incremental,
                    x,
                    y,
                    width,
                    height,
                } => {
                    handler
                        .on_update_request(self, x, y, width, height, incremental)
                        .await;
                }
                ClientMessage::KeyEvent { down, keysym } => {
                    handler.on_key_event(self, keysym, down).await;
                }
                ClientMessage::PointerEvent { button_mask, x, y } => {
                    handler.on_pointer_event(self, x, y, button_mask).await;
                }
                ClientMessage::ClientCutText(text) => {
                    handler.on_cut_text(self, text).await;
                }
            }
        }
    }

    /// Reads the next message, distinguishing a clean close (EOF before the
    /// tag byte, `None`) from a truncated message (an error).
    async fn next_message(&mut self) -> io::Result<Option<ClientMessage>> {
        let mut tag = [0u8; 1];
        if self.stream.read(&mut tag).await? == 0 {
            return Ok(None);
        }
        ClientMessage::read_body(tag[0], &mut self.stream).await.map(Some)
    }

    /// Sends a FramebufferUpdate carrying the given rectangles, Raw-encoded,
    /// in caller order.
    ///
    /// The whole message is assembled first and written with a single
    /// `write_all`, so a frame is never interleaved with other output. A
    /// write error means the connection is dead; callers should let the
    /// request loop tear it down.
    #[allow(clippy::cast_possible_truncation)] // rectangle count limited to u16 by the protocol
    pub async fn send_rectangles(&mut self, rects: &[Rectangle<'_>]) -> io::Result<()> {
        let payload: usize = rects.iter().map(|r| 12 + r.pixels.len()).sum();
        let mut frame = BytesMut::with_capacity(4 + payload);
        frame.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        frame.put_u8(0); // padding
        frame.put_u16(rects.len() as u16);
        for rect in rects {
            rect.write_to(&mut frame);
        }
        self.stream.write_all(&frame).await
    }

    /// Sends a ServerCutText message with the given bytes (Latin-1 per the
    /// protocol; the bytes pass through untouched).
    #[allow(clippy::cast_possible_truncation)] // text length limited to u32 by the protocol
    pub async fn send_cut_text(&mut self, text: &[u8]) -> io::Result<()> {
        let mut frame = BytesMut::with_capacity(8 + text.len());
        frame.put_u8(SERVER_MSG_SERVER_CUT_TEXT);
        frame.put_bytes(0, 3);
        frame.put_u32(text.len() as u32);
        frame.put_slice(text);
        self.stream.write_all(&frame).await
    }
}
