use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::core::{Error, Port, MAGIC};

/// Offset of the frame type byte
pub const TYPE_OFFSET: usize = 0x0a;

/// Offset of the discovery sub-type byte
pub const SUB_TYPE_OFFSET: usize = 0x0b;

/// Shortest datagram that can carry a typed frame
pub const MIN_FRAME_LEN: usize = 0x0c;

/// Length of the model name field
pub const MODEL_NAME_LEN: usize = 0x14;

/// Checks length and magic, returning the frame type byte
pub fn validate_header(buf: &[u8]) -> Result<u8, Error> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(Error::malformed(format!("truncated frame of {} bytes", buf.len())));
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(Error::malformed("missing header"));
    }
    Ok(buf[TYPE_OFFSET])
}

/// The `len` bytes at `offset`, if the buffer holds all of them
pub(crate) fn field(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    buf.get(offset..offset.checked_add(len)?)
}

/// Reads one byte, 0 if the buffer ends before it
pub(crate) fn byte_at(buf: &[u8], offset: usize) -> u8 {
    buf.get(offset).copied().unwrap_or(0)
}

/// Reads a big-endian u16, 0 if the buffer ends before it
pub(crate) fn u16_at(buf: &[u8], offset: usize) -> u16 {
    match field(buf, offset, 2) {
        Some(mut bytes) => bytes.get_u16(),
        None => 0,
    }
}

/// Reads a big-endian u32, 0 if the buffer ends before it
pub(crate) fn u32_at(buf: &[u8], offset: usize) -> u32 {
    match field(buf, offset, 4) {
        Some(mut bytes) => bytes.get_u32(),
        None => 0,
    }
}

/// Reads a fixed-size field, all zeroes if the buffer ends before it
pub(crate) fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(bytes) = field(buf, offset, N) {
        out.copy_from_slice(bytes);
    }
    out
}

pub(crate) fn put_u16_at(buf: &mut [u8], offset: usize, value: u16) {
    (&mut buf[offset..offset + 2]).put_u16(value);
}

pub(crate) fn put_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    (&mut buf[offset..offset + 4]).put_u32(value);
}

/// A validated datagram together with the port it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub port: Port,
    pub payload: Bytes,
}

/// Datagram codec used with `UdpFramed`
///
/// Every datagram is consumed whole. Datagrams failing header validation are
/// dropped here, so a stream only ever yields payloads that parse.
#[derive(Debug, Clone, Copy)]
pub struct DatagramCodec {
    port: Port,
}

impl DatagramCodec {
    /// Creates a codec for datagrams arriving on `port`
    pub fn new(port: Port) -> Self {
        DatagramCodec { port }
    }
}

impl Decoder for DatagramCodec {
    type Item = Datagram;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let payload = src.split().freeze();
        match validate_header(&payload) {
            Ok(_) => Ok(Some(Datagram { port: self.port, payload })),
            Err(e) => {
                trace!(port = %self.port, error = %e, "dropping datagram");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(type_byte: u8, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        buf[..10].copy_from_slice(MAGIC);
        buf[TYPE_OFFSET] = type_byte;
        buf
    }

    #[test]
    fn test_validate_header() {
        assert_eq!(validate_header(&framed(0x06, 0x36)).unwrap(), 0x06);

        let err = validate_header(&framed(0x06, 0x36)[..11]).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        let mut bad = framed(0x06, 0x36);
        bad[3] = b'x';
        assert_eq!(validate_header(&bad).unwrap_err().to_string(), "Malformed frame: missing header");
    }

    #[test]
    fn test_readers_stop_at_buffer_end() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(u32_at(&buf, 0), 0x1234_5678);
        assert_eq!(u32_at(&buf, 1), 0);
        assert_eq!(u16_at(&buf, 2), 0x5678);
        assert_eq!(u16_at(&buf, 3), 0);
        assert_eq!(byte_at(&buf, 4), 0);
        assert_eq!(array_at::<2>(&buf, 3), [0, 0]);
        assert_eq!(u32_at(&buf, usize::MAX - 1), 0);
    }

    #[test]
    fn test_codec_consumes_whole_datagram() {
        let mut codec = DatagramCodec::new(Port::Beat);

        let mut src = BytesMut::from(&framed(0x28, 0x60)[..]);
        let datagram = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(datagram.port, Port::Beat);
        assert_eq!(datagram.payload.len(), 0x60);
        assert!(src.is_empty());

        let mut src = BytesMut::from(&b"not a prolink frame"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }
}
