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

//! The capability the host application plugs into the server.

use async_trait::async_trait;

use crate::connection::RfbConnection;
use crate::protocol::PixelFormat;

/// Callbacks for the client-to-server half of the protocol.
///
/// One handler instance serves every connection; callbacks from different
/// connections run in parallel, so any cross-connection state (a shared
/// framebuffer, say) needs its own synchronisation. Within one connection
/// the calls are strictly sequential and totally ordered: a callback
/// returns before the next message is read.
///
/// Every callback receives the connection, which is also the way to push
/// data back: [`RfbConnection::send_rectangles`] and
/// [`RfbConnection::send_cut_text`]. Callbacks are invoked inline by the
/// connection's read loop, so a callback that never returns stalls that
/// client (and only that client).
///
/// All methods default to doing nothing; implement the ones the
/// application cares about.
#[async_trait]
pub trait RfbHandler: Send + Sync {
    /// Invoked once per connection, right after ServerInit is sent and
    /// before the first client message is read.
    async fn init(&self, _conn: &mut RfbConnection) {}

    /// The client wants subsequent updates in `format`.
    async fn on_set_pixel_format(&self, _conn: &mut RfbConnection, _format: PixelFormat) {}

    /// The client announced its supported encodings, preference first.
    /// IDs are signed; negative values are pseudo-encodings.
    async fn on_set_encodings(&self, _conn: &mut RfbConnection, _encodings: Vec<i32>) {}

    /// The client asked for the given region. `incremental` false means a
    /// full refresh of the region is wanted.
    async fn on_update_request(
        &self,
        _conn: &mut RfbConnection,
        _x: u16,
        _y: u16,
        _width: u16,
        _height: u16,
        _incremental: bool,
    ) {
    }

    /// A key was pressed (`down`) or released. `keysym` is an X11 keysym.
    async fn on_key_event(&self, _conn: &mut RfbConnection, _keysym: u32, _down: bool) {}

    /// The pointer moved or a button changed. The low 8 bits of
    /// `button_mask` are buttons 1 through 8.
    async fn on_pointer_event(&self, _conn: &mut RfbConnection, _x: u16, _y: u16, _button_mask: u8) {
    }

    /// The client pasted text. Latin-1 on the wire, handed over as raw
    /// bytes.
    async fn on_cut_text(&self, _conn: &mut RfbConnection, _text: Vec<u8>) {}
}
