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

//! RFB protocol constants, records, and the client message codec.
//!
//! Everything on the wire is big-endian with a fixed layout per message
//! (RFC 6143). Client messages are decoded by reading exactly one tag byte
//! and then exactly the body that tag dictates; server messages are framed
//! by the connection's emission methods. The only encoding the server ever
//! emits is Raw.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::wire;

/// The protocol version string exchanged verbatim by both sides. Exactly 12
/// bytes including the trailing newline.
pub const PROTOCOL_VERSION: &[u8; 12] = b"RFB 003.008\n";

/// Reason string sent with a failed SecurityResult.
pub const AUTH_FAILURE_REASON: &str = "Authentication Failure";

// Client-to-server message tags.

/// Client replaces the pixel format used for subsequent updates.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Legacy colour-map message, not part of RFB 3.8 but still sent by some
/// clients. Consumed and discarded to keep the stream framed.
pub const CLIENT_MSG_FIX_COLOUR_MAP_ENTRIES: u8 = 1;

/// Client lists the encodings it supports, in preference order.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Client asks for a (possibly incremental) update of a region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Keyboard key press or release.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Pointer position and button state.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Clipboard text pasted on the client side.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-client message tags.

/// Server pushes one or more framebuffer rectangles.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Server pushes clipboard text.
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Security negotiation.

/// Security type 1: no authentication.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type 2: VNC challenge-response authentication.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

/// SecurityResult value for a successful (or absent) authentication.
pub const SECURITY_RESULT_OK: u32 = 0;

/// SecurityResult value for a failed authentication.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Raw encoding, the only encoding this server emits.
pub const ENCODING_RAW: i32 = 0;

/// Upper bound on a ClientCutText payload. A length beyond this is treated
/// as a protocol error rather than an allocation request.
pub const MAX_CUT_TEXT_LEN: usize = 1 << 20;

/// The 16-byte pixel format record (13 significant bytes plus 3 padding).
///
/// When `true_colour_flag` is 1 the maxima and shifts describe how to pull
/// each channel out of a pixel value; when 0 the client expects a colour
/// map, which this server does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian_flag: u8,
    pub true_colour_flag: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// On-wire size of the record, padding included.
    pub const WIRE_LEN: usize = 16;

    /// 32-bit true colour, 8 bits per channel, red in the top colour byte.
    /// The format most viewers ask for first.
    pub fn rgb32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Serializes the record into its fixed 16-byte layout.
    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut raw = [0u8; Self::WIRE_LEN];
        raw[0] = self.bits_per_pixel;
        raw[1] = self.depth;
        raw[2] = self.big_endian_flag;
        raw[3] = self.true_colour_flag;
        wire::put_u16(&mut raw, 4, self.red_max);
        wire::put_u16(&mut raw, 6, self.green_max);
        wire::put_u16(&mut raw, 8, self.blue_max);
        raw[10] = self.red_shift;
        raw[11] = self.green_shift;
        raw[12] = self.blue_shift;
        // raw[13..16] stays zero padding
        raw
    }

    /// Decodes the fixed 16-byte layout; the 3 padding bytes are ignored.
    pub fn from_wire(raw: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            bits_per_pixel: raw[0],
            depth: raw[1],
            big_endian_flag: raw[2],
            true_colour_flag: raw[3],
            red_max: wire::get_u16(raw, 4),
            green_max: wire::get_u16(raw, 6),
            blue_max: wire::get_u16(raw, 8),
            red_shift: raw[10],
            green_shift: raw[11],
            blue_shift: raw[12],
        }
    }

    /// Bytes one pixel occupies on the wire under this format.
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel) / 8
    }
}

/// The ServerInit message closing the handshake: framebuffer geometry,
/// pixel format, and desktop name.
#[derive(Debug)]
pub struct ServerInit<'a> {
    pub width: u16,
    pub height: u16,
    pub pixel_format: &'a PixelFormat,
    pub name: &'a str,
}

impl ServerInit<'_> {
    /// Appends the message to `buf`: width, height, the 16-byte pixel
    /// format, a u32 name length, and the name bytes.
    #[allow(clippy::cast_possible_truncation)] // name length limited to u32 by the protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_slice(&self.pixel_format.to_wire());
        buf.put_u32(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
    }
}

/// One rectangle of a FramebufferUpdate. The pixel buffer is borrowed for
/// the duration of the send; its length must equal
/// `width * height * bits_per_pixel / 8` under the current pixel format,
/// which the caller owns.
#[derive(Debug)]
pub struct Rectangle<'a> {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub pixels: &'a [u8],
}

impl Rectangle<'_> {
    /// Appends the rectangle header and Raw pixel bytes to `buf`.
    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(ENCODING_RAW);
        buf.put_slice(self.pixels);
    }
}

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        button_mask: u8,
        x: u16,
        y: u16,
    },
    ClientCutText(Vec<u8>),
    /// Tag 1, consumed for framing and otherwise ignored.
    FixColourMapEntries,
}

impl ClientMessage {
    /// Reads one complete message: the tag byte, then exactly the body the
    /// tag dictates.
    ///
    /// # Errors
    ///
    /// `InvalidData` for an unknown tag or an oversized cut-text length;
    /// any transport error (including `UnexpectedEof` on a short read) is
    /// passed through.
    pub async fn read_from<S>(stream: &mut S) -> io::Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).await?;
        Self::read_body(tag[0], stream).await
    }

    /// Reads the body of a message whose tag byte has already been consumed.
    pub(crate) async fn read_body<S>(tag: u8, stream: &mut S) -> io::Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        match tag {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                let mut padding = [0u8; 3];
                stream.read_exact(&mut padding).await?;
                let mut raw = [0u8; PixelFormat::WIRE_LEN];
                stream.read_exact(&mut raw).await?;
                Ok(Self::SetPixelFormat(PixelFormat::from_wire(&raw)))
            }
            CLIENT_MSG_FIX_COLOUR_MAP_ENTRIES => {
                // 1 pad + 2 first-colour + 2 count, then 6 bytes per entry
                let mut head = [0u8; 5];
                stream.read_exact(&mut head).await?;
                let count = usize::from(wire::get_u16(&head, 3));
                let mut entries = vec![0u8; count * 6];
                stream.read_exact(&mut entries).await?;
                Ok(Self::FixColourMapEntries)
            }
            CLIENT_MSG_SET_ENCODINGS => {
                let mut head = [0u8; 3];
                stream.read_exact(&mut head).await?;
                let count = usize::from(wire::get_u16(&head, 1));
                let mut raw = vec![0u8; count * 4];
                stream.read_exact(&mut raw).await?;
                let encodings = (0..count)
                    .map(|i| wire::get_u32(&raw, i * 4) as i32)
                    .collect();
                Ok(Self::SetEncodings(encodings))
            }
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let mut body = [0u8; 9];
                stream.read_exact(&mut body).await?;
                Ok(Self::FramebufferUpdateRequest {
                    incremental: body[0] != 0,
                    x: wire::get_u16(&body, 1),
                    y: wire::get_u16(&body, 3),
                    width: wire::get_u16(&body, 5),
                    height: wire::get_u16(&body, 7),
                })
            }
            CLIENT_MSG_KEY_EVENT => {
                let mut body = [0u8; 7];
                stream.read_exact(&mut body).await?;
                Ok(Self::KeyEvent {
                    down: body[0] != 0,
                    keysym: wire::get_u32(&body, 3),
                })
            }
            CLIENT_MSG_POINTER_EVENT => {
                let mut body = [0u8; 5];
                stream.read_exact(&mut body).await?;
                Ok(Self::PointerEvent {
                    button_mask: body[0],
                    x: wire::get_u16(&body, 1),
                    y: wire::get_u16(&body, 3),
                })
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                let mut head = [0u8; 7];
                stream.read_exact(&mut head).await?;
                let length = wire::get_u32(&head, 3) as usize;
                if length > MAX_CUT_TEXT_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("cut text length {length} exceeds {MAX_CUT_TEXT_LEN}"),
                    ));
                }
                let mut text = vec![0u8; length];
                stream.read_exact(&mut text).await?;
                Ok(Self::ClientCutText(text))
            }
            unknown => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown client message tag {unknown}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_wire_round_trip() {
        let format = PixelFormat {
            bits_per_pixel: 16,
            depth: 15,
            big_endian_flag: 1,
            true_colour_flag: 1,
            red_max: 31,
            green_max: 31,
            blue_max: 31,
            red_shift: 10,
            green_shift: 5,
            blue_shift: 0,
        };
        let raw = format.to_wire();
        assert_eq!(&raw[13..], &[0, 0, 0]);
        assert_eq!(PixelFormat::from_wire(&raw), format);
    }

    #[test]
    fn server_init_layout() {
        let format = PixelFormat::rgb32();
        let init = ServerInit {
            width: 640,
            height: 480,
            pixel_format: &format,
            name: "demo",
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);

        assert_eq!(&buf[0..4], b"\x02\x80\x01\xe0");
        assert_eq!(&buf[4..20], &format.to_wire());
        assert_eq!(&buf[20..24], &[0, 0, 0, 4]);
        assert_eq!(&buf[24..], b"demo");
    }

    #[test]
    fn rectangle_frames_as_raw() {
        let rect = Rectangle {
            x: 1,
            y: 2,
            width: 2,
            height: 1,
            pixels: &[0xAA, 0xBB, 0xCC, 0xDD, 0x11, 0x22, 0x33, 0x44],
        };
        let mut buf = BytesMut::new();
        rect.write_to(&mut buf);
        assert_eq!(
            &buf[..12],
            &[0, 1, 0, 2, 0, 2, 0, 1, 0, 0, 0, 0],
        );
        assert_eq!(&buf[12..], rect.pixels);
    }

    #[tokio::test]
    async fn decode_set_pixel_format() {
        let mut input: Vec<u8> = vec![CLIENT_MSG_SET_PIXEL_FORMAT, 0, 0, 0];
        input.extend_from_slice(&PixelFormat::rgb32().to_wire());
        let message = ClientMessage::read_from(&mut input.as_slice()).await.unwrap();
        assert_eq!(message, ClientMessage::SetPixelFormat(PixelFormat::rgb32()));
    }

    #[tokio::test]
    async fn decode_set_encodings() {
        // 2 encodings: Raw (0) and Hextile (5)
        let input = [
            CLIENT_MSG_SET_ENCODINGS,
            0,
            0,
            2,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            5,
        ];
        let message = ClientMessage::read_from(&mut &input[..]).await.unwrap();
        assert_eq!(message, ClientMessage::SetEncodings(vec![0, 5]));
    }

    #[tokio::test]
    async fn decode_negative_encoding_ids() {
        // -239 (cursor pseudo-encoding) = 0xFFFF_FF11
        let input = [CLIENT_MSG_SET_ENCODINGS, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0x11];
        let message = ClientMessage::read_from(&mut &input[..]).await.unwrap();
        assert_eq!(message, ClientMessage::SetEncodings(vec![-239]));
    }

    #[tokio::test]
    async fn decode_pointer_event() {
        let input = [
            CLIENT_MSG_POINTER_EVENT,
            0x03,
            0x01,
            0x90,
            0x01,
            0x20,
        ];
        let message = ClientMessage::read_from(&mut &input[..]).await.unwrap();
        assert_eq!(
            message,
            ClientMessage::PointerEvent {
                button_mask: 3,
                x: 400,
                y: 288,
            }
        );
    }

    #[tokio::test]
    async fn decode_key_event() {
        let input = [CLIENT_MSG_KEY_EVENT, 1, 0, 0, 0, 0, 0xFF, 0x0D];
        let message = ClientMessage::read_from(&mut &input[..]).await.unwrap();
        assert_eq!(
            message,
            ClientMessage::KeyEvent {
                down: true,
                keysym: 0xFF0D,
            }
        );
    }

    #[tokio::test]
    async fn decode_cut_text() {
        let input = [CLIENT_MSG_CLIENT_CUT_TEXT, 0, 0, 0, 0, 0, 0, 2, b'h', b'i'];
        let message = ClientMessage::read_from(&mut &input[..]).await.unwrap();
        assert_eq!(message, ClientMessage::ClientCutText(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn oversized_cut_text_is_rejected() {
        let mut input = vec![CLIENT_MSG_CLIENT_CUT_TEXT, 0, 0, 0];
        input.extend_from_slice(&((MAX_CUT_TEXT_LEN as u32 + 1).to_be_bytes()));
        let err = ClientMessage::read_from(&mut input.as_slice())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn fix_colour_map_entries_is_consumed_whole() {
        // count = 2, so 12 entry bytes follow; a pointer event comes after.
        let mut input = vec![CLIENT_MSG_FIX_COLOUR_MAP_ENTRIES, 0, 0, 0, 0, 2];
        input.extend_from_slice(&[0u8; 12]);
        input.extend_from_slice(&[CLIENT_MSG_POINTER_EVENT, 0, 0, 1, 0, 1]);

        let mut cursor = input.as_slice();
        let first = ClientMessage::read_from(&mut cursor).await.unwrap();
        assert_eq!(first, ClientMessage::FixColourMapEntries);
        let second = ClientMessage::read_from(&mut cursor).await.unwrap();
        assert_eq!(
            second,
            ClientMessage::PointerEvent {
                button_mask: 0,
                x: 1,
                y: 1,
            }
        );
    }

    #[tokio::test]
    async fn unknown_tag_is_invalid_data() {
        let input = [0xABu8];
        let err = ClientMessage::read_from(&mut &input[..]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn short_body_is_unexpected_eof() {
        let input = [CLIENT_MSG_POINTER_EVENT, 0x03, 0x01];
        let err = ClientMessage::read_from(&mut &input[..]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
