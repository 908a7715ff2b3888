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

//! A minimal host application: serves a static colour gradient and logs
//! every input event.
//!
//! Usage:
//!   cargo run --example pattern_server
//!
//! Then connect with a VNC viewer to localhost:5900.

use async_trait::async_trait;
use rfbserver::{PixelFormat, Rectangle, RfbConnection, RfbHandler, RfbServer, ServerConfig};
use std::error::Error;
use std::sync::Arc;

const WIDTH: u16 = 800;
const HEIGHT: u16 = 600;

/// Serves one precomputed full-screen gradient for every update request.
struct PatternHandler {
    pixels: Vec<u8>,
}

impl PatternHandler {
    fn new(format: &PixelFormat) -> Self {
        let (w, h) = (usize::from(WIDTH), usize::from(HEIGHT));
        let mut pixels = Vec::with_capacity(w * h * format.bytes_per_pixel());
        for y in 0..h {
            for x in 0..w {
                let red = (x * 255 / w) as u32;
                let green = (y * 255 / h) as u32;
                let blue = 128u32;
                let pixel = red << format.red_shift
                    | green << format.green_shift
                    | blue << format.blue_shift;
                pixels.extend_from_slice(&pixel.to_le_bytes());
            }
        }
        Self { pixels }
    }
}

#[async_trait]
impl RfbHandler for PatternHandler {
    async fn on_update_request(
        &self,
        conn: &mut RfbConnection,
        _x: u16,
        _y: u16,
        _width: u16,
        _height: u16,
        incremental: bool,
    ) {
        // The pattern never changes, so incremental requests need nothing.
        if incremental {
            return;
        }
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: WIDTH,
            height: HEIGHT,
            pixels: &self.pixels,
        };
        if let Err(e) = conn.send_rectangles(&[rect]).await {
            log::warn!("client {}: dropping after failed update: {e}", conn.peer());
        }
    }

    async fn on_key_event(&self, conn: &mut RfbConnection, keysym: u32, down: bool) {
        let action = if down { "pressed" } else { "released" };
        log::info!("client {}: key {keysym:#06x} {action}", conn.peer());
    }

    async fn on_pointer_event(&self, conn: &mut RfbConnection, x: u16, y: u16, button_mask: u8) {
        log::info!(
            "client {}: pointer at ({x}, {y}) buttons {button_mask:08b}",
            conn.peer()
        );
    }

    async fn on_cut_text(&self, conn: &mut RfbConnection, text: Vec<u8>) {
        log::info!(
            "client {}: pasted {:?}, echoing it back",
            conn.peer(),
            String::from_utf8_lossy(&text)
        );
        let _ = conn.send_cut_text(&text).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let format = PixelFormat::rgb32();
    let handler = Arc::new(PatternHandler::new(&format));
    let config = ServerConfig::new(WIDTH, HEIGHT, "rfbserver pattern demo", format, handler);

    let server = RfbServer::new(config)?;
    println!("Connect with: vncviewer localhost:5900");
    server.listen().await?;
    Ok(())
}
