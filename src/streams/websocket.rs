//! WebSocket, layered over TCP (§4.5, per-protocol specifics: WebSocket). Covers the
//! opening HTTP-upgrade handshake and RFC 6455 frame parse/encode; the underlying byte
//! stream is a plain TCP socket registered with the reactor the same way
//! [`crate::streams::tcp`] registers one, but data flows through the frame codec
//! instead of being handed to script code raw.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use base64::Engine;
use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Token};
use sha1::{Digest, Sha1};

use crate::core::reactor::Reactor;
use crate::evaluator::{CallbackHandle, Value};

use super::{deliver_error, deliver_event, CloseFlag, WriteQueue};

/// RFC 6455 §1.3.
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Extracts the `Sec-WebSocket-Key` header value from a raw HTTP upgrade request.
#[must_use]
pub fn extract_client_key(request: &str) -> Option<String> {
    request
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key:").or_else(|| line.strip_prefix("sec-websocket-key:")))
        .map(|value| value.trim().to_string())
}

#[must_use]
pub fn build_accept_response(client_key: &str) -> String {
    let accept = compute_accept_key(client_key);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_raw(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Encodes a frame. Per RFC 6455, client frames MUST be masked and server frames MUST
/// NOT be masked (§4.5); `mask` controls which side this encode is for.
#[must_use]
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.payload.len() + 14);
    let first_byte = (u8::from(frame.fin) << 7) | frame.opcode.to_raw();
    out.push(first_byte);

    let len = frame.payload.len();
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(frame.payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(&frame.payload),
    }
    out
}

/// Attempts to decode one frame from the front of `buffer`. Returns `None` if the
/// buffer doesn't yet hold a complete frame; on success, the consumed bytes are
/// drained from `buffer`.
#[must_use]
pub fn try_decode_frame(buffer: &mut VecDeque<u8>) -> Option<Frame> {
    if buffer.len() < 2 {
        return None;
    }
    let b0 = buffer[0];
    let b1 = buffer[1];
    let fin = (b0 & 0x80) != 0;
    let opcode = Opcode::from_raw(b0 & 0x0F)?;
    let masked = (b1 & 0x80) != 0;
    let len_field = b1 & 0x7F;

    let mut offset = 2usize;
    let payload_len: usize = match len_field {
        126 => {
            if buffer.len() < offset + 2 {
                return None;
            }
            let bytes: Vec<u8> = buffer.iter().skip(offset).take(2).copied().collect();
            offset += 2;
            u16::from_be_bytes([bytes[0], bytes[1]]) as usize
        }
        127 => {
            if buffer.len() < offset + 8 {
                return None;
            }
            let bytes: Vec<u8> = buffer.iter().skip(offset).take(8).copied().collect();
            offset += 8;
            u64::from_be_bytes(bytes.try_into().unwrap()) as usize
        }
        n => n as usize,
    };

    let mask_key = if masked {
        if buffer.len() < offset + 4 {
            return None;
        }
        let bytes: [u8; 4] = buffer.iter().skip(offset).take(4).copied().collect::<Vec<_>>().try_into().unwrap();
        offset += 4;
        Some(bytes)
    } else {
        None
    };

    if buffer.len() < offset + payload_len {
        return None;
    }

    let mut payload: Vec<u8> = buffer.iter().skip(offset).take(payload_len).copied().collect();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    buffer.drain(..offset + payload_len);
    Some(Frame { fin, opcode, payload })
}

#[derive(Default)]
struct Handlers {
    on_message: Mutex<Option<CallbackHandle>>,
    on_close: Mutex<Option<CallbackHandle>>,
    on_error: Mutex<Option<CallbackHandle>>,
}

/// A WebSocket connection past the handshake: frames in, assembled messages out.
pub struct WebSocketConnection {
    reactor: Arc<Reactor>,
    stream: Mutex<MioTcpStream>,
    token: Mutex<Option<Token>>,
    is_server_side: bool,
    close_flag: CloseFlag,
    write_queue: WriteQueue,
    read_buffer: Mutex<VecDeque<u8>>,
    write_buffer: Mutex<VecDeque<u8>>,
    assembling: Mutex<Option<(Opcode, Vec<u8>)>>,
    handlers: Handlers,
}

impl WebSocketConnection {
    /// Wraps an already-handshaken TCP stream and starts reading frames.
    pub fn from_handshaken_stream(reactor: &Arc<Reactor>, stream: MioTcpStream, is_server_side: bool) -> Arc<Self> {
        let conn = Arc::new(Self {
            reactor: Arc::clone(reactor),
            stream: Mutex::new(stream),
            token: Mutex::new(None),
            is_server_side,
            close_flag: CloseFlag::new(),
            write_queue: WriteQueue::new(),
            read_buffer: Mutex::new(VecDeque::new()),
            write_buffer: Mutex::new(VecDeque::new()),
            assembling: Mutex::new(None),
            handlers: Handlers::default(),
        });
        conn.register();
        conn
    }

    fn register(self: &Arc<Self>) {
        let conn = Arc::clone(self);
        let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |event| {
            if event.is_readable() {
                conn.on_readable();
            }
            if event.is_writable() {
                conn.flush_write_buffer();
            }
        });
        let mut stream = self.stream.lock().unwrap();
        let token = self.reactor.register_source(&mut *stream, Interest::READABLE, handler).expect("register websocket stream");
        drop(stream);
        *self.token.lock().unwrap() = Some(token);
    }

    fn on_readable(self: &Arc<Self>) {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let read_result = self.stream.lock().unwrap().read(&mut buf);
            match read_result {
                Ok(0) => {
                    if let Some(cb) = self.handlers.on_close.lock().unwrap().clone() {
                        deliver_event(cb);
                    }
                    return;
                }
                Ok(n) => {
                    self.read_buffer.lock().unwrap().extend(&buf[..n]);
                    self.drain_frames();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("websocket read error: {e}"));
                    }
                    return;
                }
            }
        }
    }

    fn drain_frames(self: &Arc<Self>) {
        loop {
            let frame = {
                let mut buffer = self.read_buffer.lock().unwrap();
                try_decode_frame(&mut buffer)
            };
            let Some(frame) = frame else { return };
            self.handle_frame(frame);
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame.opcode {
            Opcode::Close => {
                self.send_control(Opcode::Close, vec![]);
                self.close();
            }
            Opcode::Ping => self.send_control(Opcode::Pong, frame.payload),
            Opcode::Pong => {}
            Opcode::Text | Opcode::Binary => {
                if frame.fin {
                    self.deliver_message(frame.opcode, frame.payload);
                } else {
                    *self.assembling.lock().unwrap() = Some((frame.opcode, frame.payload));
                }
            }
            Opcode::Continuation => {
                let mut assembling = self.assembling.lock().unwrap();
                if let Some((opcode, buffer)) = assembling.as_mut() {
                    buffer.extend(frame.payload);
                    if frame.fin {
                        let (opcode, buffer) = assembling.take().unwrap();
                        drop(assembling);
                        self.deliver_message(opcode, buffer);
                    }
                }
            }
        }
    }

    fn deliver_message(&self, opcode: Opcode, payload: Vec<u8>) {
        let Some(cb) = self.handlers.on_message.lock().unwrap().clone() else { return };
        let value = match opcode {
            Opcode::Text => Value::Str(String::from_utf8_lossy(&payload).into_owned()),
            _ => Value::Buffer(payload),
        };
        crate::core::bridge::run_on_loop(move || {
            crate::core::bridge::enqueue_callback_global(crate::core::bridge::CallbackPayload::new(cb, vec![value]));
        });
    }

    fn send_control(self: &Arc<Self>, opcode: Opcode, payload: Vec<u8>) {
        self.send_frame(Frame { fin: true, opcode, payload });
    }

    fn send_frame(self: &Arc<Self>, frame: Frame) {
        let mask = if self.is_server_side { None } else { Some(client_mask_key()) };
        let encoded = encode_frame(&frame, mask);
        self.write_queue.begin_write(encoded.len());
        self.write_buffer.lock().unwrap().extend(encoded);
        self.flush_write_buffer();
    }

    /// Sends a text message.
    pub fn send_text(self: &Arc<Self>, text: &str) {
        self.send_frame(Frame { fin: true, opcode: Opcode::Text, payload: text.as_bytes().to_vec() });
    }

    /// Sends a binary message.
    pub fn send_binary(self: &Arc<Self>, data: Vec<u8>) {
        self.send_frame(Frame { fin: true, opcode: Opcode::Binary, payload: data });
    }

    fn flush_write_buffer(self: &Arc<Self>) {
        let flushed = {
            let mut buffer = self.write_buffer.lock().unwrap();
            if buffer.is_empty() {
                0
            } else {
                let (front, _) = buffer.as_slices();
                let contiguous: Vec<u8> = front.to_vec();
                match self.stream.lock().unwrap().write(&contiguous) {
                    Ok(n) => {
                        buffer.drain(..n);
                        n
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
                    Err(e) => {
                        if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                            deliver_error(cb, format!("websocket write error: {e}"));
                        }
                        0
                    }
                }
            }
        };
        if flushed > 0 {
            self.write_queue.complete_write(flushed);
        }
        if !self.write_buffer.lock().unwrap().is_empty() {
            let token = *self.token.lock().unwrap();
            if let Some(token) = token {
                let mut stream = self.stream.lock().unwrap();
                let _ = self.reactor.reregister_source(&mut *stream, token, Interest::READABLE | Interest::WRITABLE);
            }
        }
    }

    pub fn on(&self, event: &str, cb: CallbackHandle) {
        match event {
            "message" => *self.handlers.on_message.lock().unwrap() = Some(cb),
            "close" => *self.handlers.on_close.lock().unwrap() = Some(cb),
            "error" => *self.handlers.on_error.lock().unwrap() = Some(cb),
            _ => tracing::warn!(event, "websocket connection: unrecognized event name"),
        }
    }

    /// Idempotent close. Fails any drain callback still waiting on unflushed bytes
    /// rather than dropping it silently (§8 property 9).
    pub fn close(self: &Arc<Self>) {
        if !self.close_flag.close_once() {
            return;
        }
        self.write_queue.fail_pending("websocket connection closed before pending write completed".to_string());
        let conn = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let token = conn.token.lock().unwrap().take();
            if let Some(token) = token {
                let mut stream = conn.stream.lock().unwrap();
                let _ = conn.reactor.deregister_source(&mut *stream, token);
            }
            if let Some(cb) = conn.handlers.on_close.lock().unwrap().clone() {
                deliver_event(cb);
            }
        });
    }
}

fn client_mask_key() -> [u8; 4] {
    // The masking key only needs to be unpredictable to intermediaries, not
    // cryptographically secure; `rand` is already in the dependency graph for other
    // built-ins, so reuse it here rather than hand-rolling an RNG.
    use rand::RngCore;
    let mut key = [0u8; 4];
    rand::rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_the_rfc_6455_worked_example() {
        // RFC 6455 §1.3's example key/accept pair.
        let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn encode_then_decode_a_masked_text_frame_round_trips() {
        let frame = Frame { fin: true, opcode: Opcode::Text, payload: b"hello".to_vec() };
        let encoded = encode_frame(&frame, Some([1, 2, 3, 4]));
        let mut buffer: VecDeque<u8> = encoded.into_iter().collect();
        let decoded = try_decode_frame(&mut buffer).expect("frame should decode");
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.opcode, Opcode::Text);
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_returns_none_on_a_truncated_frame() {
        let frame = Frame { fin: true, opcode: Opcode::Binary, payload: vec![0u8; 200] };
        let encoded = encode_frame(&frame, None);
        let mut buffer: VecDeque<u8> = encoded[..encoded.len() - 5].iter().copied().collect();
        assert!(try_decode_frame(&mut buffer).is_none());
    }

    #[test]
    fn extract_client_key_reads_the_header_case_insensitively() {
        let request = "GET / HTTP/1.1\r\nSec-WebSocket-Key: abc123==\r\n\r\n";
        assert_eq!(extract_client_key(request).as_deref(), Some("abc123=="));
    }
}
