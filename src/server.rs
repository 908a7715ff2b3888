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

//! Server configuration and the accept loop.
//!
//! The server validates its configuration before touching the network,
//! binds a TCP listener, and spawns one independent task per accepted
//! connection. A failing connection never takes the accept loop down; only
//! a failed bind is surfaced to the caller.

use log::{error, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::connection::RfbConnection;
use crate::handler::RfbHandler;
use crate::protocol::PixelFormat;

/// Everything a server needs to run. Immutable once handed to
/// [`RfbServer::new`]; all connection tasks share it read-only.
pub struct ServerConfig {
    /// TCP port to listen on. Empty selects the VNC default, 5900.
    pub port: String,
    /// Framebuffer width in pixels. Must be positive.
    pub width: u16,
    /// Framebuffer height in pixels. Must be positive.
    pub height: u16,
    /// Desktop name advertised in ServerInit.
    pub buffer_name: String,
    /// Pixel format advertised in ServerInit.
    pub pixel_format: PixelFormat,
    /// Whether to require VNC Authentication.
    pub authenticate: bool,
    /// Shared secret for VNC Authentication. Must be non-empty when
    /// `authenticate` is set.
    pub auth_text: String,
    /// Optional deadline for each client read in the request loop. `None`
    /// means reads may block indefinitely; closing the socket from outside
    /// remains the cancellation mechanism.
    pub read_timeout: Option<Duration>,
    /// The application's event callbacks.
    pub handler: Arc<dyn RfbHandler>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("buffer_name", &self.buffer_name)
            .field("pixel_format", &self.pixel_format)
            .field("authenticate", &self.authenticate)
            .field("auth_text", &self.auth_text)
            .field("read_timeout", &self.read_timeout)
            .field("handler", &"<dyn RfbHandler>")
            .finish()
    }
}

impl ServerConfig {
    /// A configuration with the usual defaults: port 5900, no
    /// authentication, no read deadline.
    pub fn new(
        width: u16,
        height: u16,
        buffer_name: impl Into<String>,
        pixel_format: PixelFormat,
        handler: Arc<dyn RfbHandler>,
    ) -> Self {
        Self {
            port: String::new(),
            width,
            height,
            buffer_name: buffer_name.into(),
            pixel_format,
            authenticate: false,
            auth_text: String::new(),
            read_timeout: None,
            handler,
        }
    }

    /// Listens on `port` instead of the default 5900.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Requires VNC Authentication against `auth_text`.
    #[must_use]
    pub fn with_auth(mut self, auth_text: impl Into<String>) -> Self {
        self.authenticate = true;
        self.auth_text = auth_text.into();
        self
    }

    /// Applies a per-read deadline to every connection's request loop.
    #[must_use]
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    /// Checks the configuration and fills in the default port. Every
    /// rejection happens here, before any socket exists.
    fn validate(&mut self) -> io::Result<()> {
        fn invalid(message: &str) -> io::Error {
            io::Error::new(io::ErrorKind::InvalidInput, message)
        }

        if self.port.is_empty() {
            self.port = "5900".to_string();
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid("framebuffer width and height must be positive"));
        }
        if self.authenticate && self.auth_text.is_empty() {
            return Err(invalid("authentication requires a non-empty auth text"));
        }

        let pf = &self.pixel_format;
        if !matches!(pf.bits_per_pixel, 8 | 16 | 24 | 32) {
            return Err(invalid("bits per pixel must be 8, 16, 24 or 32"));
        }
        if pf.true_colour_flag == 1 {
            if pf.red_max == 0 || pf.green_max == 0 || pf.blue_max == 0 {
                return Err(invalid("true-colour channel maxima must be non-zero"));
            }
            if pf.red_shift == pf.green_shift
                || pf.red_shift == pf.blue_shift
                || pf.green_shift == pf.blue_shift
            {
                return Err(invalid("true-colour channel shifts must be distinct"));
            }
        }
        Ok(())
    }
}

/// The RFB server: a validated configuration plus the machinery to run
/// connections over it.
#[derive(Debug)]
pub struct RfbServer {
    config: Arc<ServerConfig>,
}

impl RfbServer {
    /// Validates `config` and builds the server.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for any rejected configuration (zero dimensions,
    /// authentication without auth text, an unsupported bits-per-pixel, or
    /// degenerate true-colour parameters). No I/O happens before this
    /// check passes.
    pub fn new(mut config: ServerConfig) -> io::Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// The validated configuration, defaults filled in.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured port and accepts connections forever, one
    /// spawned task per client.
    ///
    /// # Errors
    ///
    /// Returns the bind error if listening fails. Accept errors are logged
    /// and the loop continues.
    pub async fn listen(&self) -> io::Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.config.port)).await?;
        info!("RFB server listening on port {}", self.config.port);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("client {addr} connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("client {addr}: could not disable Nagle: {e}");
                    }
                    // Detached; the connection task tears itself down.
                    let _ = self.serve_stream(stream, addr.to_string());
                }
                Err(e) => {
                    error!("error accepting connection: {e}");
                }
            }
        }
    }

    /// Runs the full connection lifecycle (handshake, handler `init`,
    /// request loop, close) on an already-established stream.
    ///
    /// This is how transports other than the built-in listener plug in:
    /// anything full-duplex works, including in-memory pipes. The returned
    /// handle completes when the connection is fully torn down.
    pub fn serve_stream<S>(
        &self,
        stream: S,
        peer: impl Into<String>,
    ) -> tokio::task::JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = RfbConnection::new(Arc::clone(&self.config), Box::new(stream), peer.into());
        tokio::spawn(conn.run())
    }
}
