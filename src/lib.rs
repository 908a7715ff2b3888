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

//! Server side of the Remote Framebuffer protocol, version 3.8 (RFC 6143).
//!
//! The host application supplies a framebuffer description (geometry, pixel
//! format, name) and an [`RfbHandler`] with its event callbacks; this crate
//! accepts connections, runs the RFB handshake (ProtocolVersion, Security
//! with optional VNC Authentication, ClientInit/ServerInit), and then
//! dispatches the client's message stream to the handler. From inside a
//! callback the handler pushes pixels with
//! [`RfbConnection::send_rectangles`] and clipboard text with
//! [`RfbConnection::send_cut_text`]. The only pixel encoding emitted is
//! Raw.
//!
//! Each connection runs on its own task and processes messages strictly in
//! order; handlers need no synchronisation against themselves on a single
//! connection. See [`RfbServer::listen`] for the TCP entry point and
//! [`RfbServer::serve_stream`] for running the protocol over any other
//! full-duplex stream.
//!
//! ```no_run
//! use rfbserver::{PixelFormat, RfbConnection, RfbHandler, RfbServer, Rectangle, ServerConfig};
//! use std::sync::Arc;
//!
//! struct Blank;
//!
//! #[async_trait::async_trait]
//! impl RfbHandler for Blank {
//!     async fn on_update_request(
//!         &self,
//!         conn: &mut RfbConnection,
//!         x: u16,
//!         y: u16,
//!         width: u16,
//!         height: u16,
//!         _incremental: bool,
//!     ) {
//!         let pixels = vec![0u8; usize::from(width) * usize::from(height) * 4];
//!         let rect = Rectangle { x, y, width, height, pixels: &pixels };
//!         let _ = conn.send_rectangles(&[rect]).await;
//!     }
//! }
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = ServerConfig::new(640, 480, "blank", PixelFormat::rgb32(), Arc::new(Blank));
//! RfbServer::new(config)?.listen().await
//! # }
//! ```

pub mod auth;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod wire;

pub use connection::{ConnectionPhase, RfbConnection};
pub use handler::RfbHandler;
pub use protocol::{ClientMessage, PixelFormat, Rectangle};
pub use server::{RfbServer, ServerConfig};
