use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::probe::ProbeError;

/// 3 bytes payload length + 1 byte sequence id
pub const PACKET_HEADER_SIZE: usize = 4;

const PROTOCOL_V10: u8 = 0x0a;
const ERR_MARKER: u8 = 0xff;

/// Server refused the connection because max_connections is reached
pub const ER_CON_COUNT_ERROR: u16 = 1040;

/// One wire packet read from the server
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    /// Split one packet off `src`, `None` until the whole packet has arrived
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }
        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
        if src.len() < PACKET_HEADER_SIZE + len {
            return None;
        }
        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        Some(Self {
            sequence_id,
            payload,
        })
    }
}

/// Read-only codec, the probe never writes to the server
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Packet::decode(src))
    }
}

/// Fields of the initial handshake the probe cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGreeting {
    pub server_version: String,
    pub connection_id: u32,
}

impl ServerGreeting {
    /// Parse the first packet a server sends after accept
    ///
    /// A server that refuses the client sends an ERR packet here instead of
    /// the greeting; it is returned as `ProbeError::Rejected`.
    pub fn parse(payload: &[u8]) -> Result<Self, ProbeError> {
        let mut buf = payload;
        if buf.is_empty() {
            return Err(ProbeError::Protocol("empty greeting".into()));
        }
        match buf.get_u8() {
            PROTOCOL_V10 => {
                let nul = buf
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| ProbeError::Protocol("unterminated server version".into()))?;
                let server_version = String::from_utf8_lossy(&buf[..nul]).to_string();
                buf.advance(nul + 1);
                if buf.remaining() < 4 {
                    return Err(ProbeError::Protocol("truncated greeting".into()));
                }
                let connection_id = buf.get_u32_le();
                Ok(Self {
                    server_version,
                    connection_id,
                })
            }
            ERR_MARKER => {
                if buf.remaining() < 2 {
                    return Err(ProbeError::Protocol("truncated error packet".into()));
                }
                let code = buf.get_u16_le();
                // pre-handshake errors carry no sql state marker
                let message = String::from_utf8_lossy(buf).to_string();
                Err(ProbeError::Rejected { code, message })
            }
            other => Err(ProbeError::Protocol(format!(
                "unsupported protocol version {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) fn frame(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = vec![
        (len & 0xff) as u8,
        ((len >> 8) & 0xff) as u8,
        ((len >> 16) & 0xff) as u8,
        sequence_id,
    ];
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
pub(crate) fn greeting_payload(version: &str, connection_id: u32) -> Vec<u8> {
    let mut p = vec![PROTOCOL_V10];
    p.extend_from_slice(version.as_bytes());
    p.push(0);
    p.extend_from_slice(&connection_id.to_le_bytes());
    p.extend_from_slice(&[0u8; 27]);
    p
}

#[cfg(test)]
pub(crate) fn err_payload(code: u16, message: &str) -> Vec<u8> {
    let mut p = vec![ERR_MARKER];
    p.extend_from_slice(&code.to_le_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}
