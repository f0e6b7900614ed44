//! TFTP packet codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TftpError};

/// TFTP opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    /// Option acknowledgment (RFC 2347).
    Oack = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            _ => Err(TftpError::InvalidPacket(format!("unknown opcode: {value}"))),
        }
    }
}

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    OptionNegotiationFailed = 8,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionNegotiationFailed,
            _ => ErrorCode::NotDefined,
        }
    }
}

/// Transfer mode. Everything is served as octet; netascii requests are
/// accepted and treated the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Octet,
    NetAscii,
}

impl TransferMode {
    fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "octet" => Ok(TransferMode::Octet),
            "netascii" => Ok(TransferMode::NetAscii),
            _ => Err(TftpError::InvalidPacket(format!("unknown mode: {s}"))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Octet => "octet",
            TransferMode::NetAscii => "netascii",
        }
    }
}

/// Negotiable options (RFC 2347, 2348, 2349).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TftpOptions {
    pub blksize: Option<u16>,
    pub tsize: Option<u64>,
    pub timeout: Option<u8>,
}

impl TftpOptions {
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none() && self.tsize.is_none() && self.timeout.is_none()
    }

    fn parse<'a>(parts: impl Iterator<Item = &'a [u8]>) -> Self {
        let mut options = TftpOptions::default();
        let mut parts = parts;
        loop {
            let key = match parts.next() {
                Some(k) if !k.is_empty() => String::from_utf8_lossy(k).to_lowercase(),
                _ => break,
            };
            let value = match parts.next() {
                Some(v) => String::from_utf8_lossy(v).to_string(),
                None => break,
            };
            match key.as_str() {
                "blksize" => options.blksize = value.parse().ok(),
                "tsize" => options.tsize = value.parse().ok(),
                "timeout" => options.timeout = value.parse().ok(),
                _ => {} // unknown options are ignored
            }
        }
        options
    }
}

/// A decoded TFTP packet.
#[derive(Debug, Clone)]
pub enum TftpPacket {
    ReadRequest {
        filename: String,
        mode: TransferMode,
        options: TftpOptions,
    },
    WriteRequest {
        filename: String,
        mode: TransferMode,
        options: TftpOptions,
    },
    Data {
        block: u16,
        data: Bytes,
    },
    Ack {
        block: u16,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Oack {
        options: TftpOptions,
    },
}

impl TftpPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(TftpError::InvalidPacket("packet too short".to_string()));
        }

        let mut buf = data;
        let opcode = Opcode::try_from(buf.get_u16())?;

        match opcode {
            Opcode::Rrq => Self::parse_request(buf, false),
            Opcode::Wrq => Self::parse_request(buf, true),
            Opcode::Data => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("data packet too short".to_string()));
                }
                let block = buf.get_u16();
                Ok(TftpPacket::Data {
                    block,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            Opcode::Ack => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("ack packet too short".to_string()));
                }
                Ok(TftpPacket::Ack {
                    block: buf.get_u16(),
                })
            }
            Opcode::Error => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("error packet too short".to_string()));
                }
                let code = ErrorCode::from(buf.get_u16());
                let message = buf
                    .split(|&b| b == 0)
                    .next()
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                Ok(TftpPacket::Error { code, message })
            }
            Opcode::Oack => Ok(TftpPacket::Oack {
                options: TftpOptions::parse(buf.split(|&b| b == 0)),
            }),
        }
    }

    fn parse_request(data: &[u8], is_write: bool) -> Result<Self> {
        let mut parts = data.split(|&b| b == 0);

        let filename = parts
            .next()
            .filter(|b| !b.is_empty())
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TftpError::InvalidPacket("missing filename".to_string()))?;

        let mode = parts
            .next()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TftpError::InvalidPacket("missing mode".to_string()))
            .and_then(|s| TransferMode::parse(&s))?;

        let options = TftpOptions::parse(parts);

        if is_write {
            Ok(TftpPacket::WriteRequest {
                filename,
                mode,
                options,
            })
        } else {
            Ok(TftpPacket::ReadRequest {
                filename,
                mode,
                options,
            })
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            TftpPacket::ReadRequest {
                filename,
                mode,
                options,
            }
            | TftpPacket::WriteRequest {
                filename,
                mode,
                options,
            } => {
                let opcode = if matches!(self, TftpPacket::ReadRequest { .. }) {
                    Opcode::Rrq
                } else {
                    Opcode::Wrq
                };
                buf.put_u16(opcode as u16);
                buf.put_slice(filename.as_bytes());
                buf.put_u8(0);
                buf.put_slice(mode.as_str().as_bytes());
                buf.put_u8(0);
                encode_options(&mut buf, options);
            }
            TftpPacket::Data { block, data } => {
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            TftpPacket::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            TftpPacket::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code as u16);
                buf.put_slice(message.as_bytes());
                buf.put_u8(0);
            }
            TftpPacket::Oack { options } => {
                buf.put_u16(Opcode::Oack as u16);
                encode_options(&mut buf, options);
            }
        }

        buf.freeze()
    }

    pub fn data(block: u16, data: impl Into<Bytes>) -> Self {
        TftpPacket::Data {
            block,
            data: data.into(),
        }
    }

    pub fn ack(block: u16) -> Self {
        TftpPacket::Ack { block }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        TftpPacket::Error {
            code,
            message: message.into(),
        }
    }

    pub fn oack(options: TftpOptions) -> Self {
        TftpPacket::Oack { options }
    }
}

fn encode_options(buf: &mut BytesMut, options: &TftpOptions) {
    if let Some(blksize) = options.blksize {
        buf.put_slice(b"blksize");
        buf.put_u8(0);
        buf.put_slice(blksize.to_string().as_bytes());
        buf.put_u8(0);
    }
    if let Some(tsize) = options.tsize {
        buf.put_slice(b"tsize");
        buf.put_u8(0);
        buf.put_slice(tsize.to_string().as_bytes());
        buf.put_u8(0);
    }
    if let Some(timeout) = options.timeout {
        buf.put_slice(b"timeout");
        buf.put_u8(0);
        buf.put_slice(timeout.to_string().as_bytes());
        buf.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from() {
        assert_eq!(Opcode::try_from(1).unwrap(), Opcode::Rrq);
        assert_eq!(Opcode::try_from(6).unwrap(), Opcode::Oack);
        assert!(Opcode::try_from(42).is_err());
    }

    #[test]
    fn parse_rrq() {
        let mut packet = vec![0x00, 0x01];
        packet.extend_from_slice(b"ipxe.efi");
        packet.push(0);
        packet.extend_from_slice(b"octet");
        packet.push(0);

        match TftpPacket::parse(&packet).unwrap() {
            TftpPacket::ReadRequest {
                filename,
                mode,
                options,
            } => {
                assert_eq!(filename, "ipxe.efi");
                assert_eq!(mode, TransferMode::Octet);
                assert!(options.is_empty());
            }
            other => panic!("expected ReadRequest, got {other:?}"),
        }
    }

    #[test]
    fn parse_rrq_with_options() {
        let mut packet = vec![0x00, 0x01];
        packet.extend_from_slice(b"ipxe.efi");
        packet.push(0);
        packet.extend_from_slice(b"octet");
        packet.push(0);
        packet.extend_from_slice(b"blksize");
        packet.push(0);
        packet.extend_from_slice(b"1428");
        packet.push(0);
        packet.extend_from_slice(b"tsize");
        packet.push(0);
        packet.extend_from_slice(b"0");
        packet.push(0);

        match TftpPacket::parse(&packet).unwrap() {
            TftpPacket::ReadRequest { options, .. } => {
                assert_eq!(options.blksize, Some(1428));
                assert_eq!(options.tsize, Some(0));
                assert_eq!(options.timeout, None);
            }
            other => panic!("expected ReadRequest, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(TftpPacket::parse(&[]).is_err());
        assert!(TftpPacket::parse(&[0x00]).is_err());
        assert!(TftpPacket::parse(&[0x00, 0x01, 0x00]).is_err()); // empty filename
        // bad mode
        let mut packet = vec![0x00, 0x01];
        packet.extend_from_slice(b"f");
        packet.push(0);
        packet.extend_from_slice(b"mail");
        packet.push(0);
        assert!(TftpPacket::parse(&packet).is_err());
    }

    #[test]
    fn parse_ack() {
        match TftpPacket::parse(&[0x00, 0x04, 0x00, 0x05]).unwrap() {
            TftpPacket::Ack { block } => assert_eq!(block, 5),
            other => panic!("expected Ack, got {other:?}"),
        }
    }

    #[test]
    fn encode_data_roundtrip() {
        let encoded = TftpPacket::data(7, Bytes::from_static(b"firmware")).encode();
        assert_eq!(&encoded[..4], &[0x00, 0x03, 0x00, 0x07]);
        match TftpPacket::parse(&encoded).unwrap() {
            TftpPacket::Data { block, data } => {
                assert_eq!(block, 7);
                assert_eq!(&data[..], b"firmware");
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn encode_error() {
        let encoded = TftpPacket::error(ErrorCode::FileNotFound, "no such file").encode();
        assert_eq!(&encoded[..4], &[0x00, 0x05, 0x00, 0x01]);
        assert_eq!(encoded[encoded.len() - 1], 0);
        match TftpPacket::parse(&encoded).unwrap() {
            TftpPacket::Error { code, message } => {
                assert_eq!(code, ErrorCode::FileNotFound);
                assert_eq!(message, "no such file");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn oack_roundtrip() {
        let options = TftpOptions {
            blksize: Some(1024),
            tsize: Some(987_654),
            timeout: Some(5),
        };
        let encoded = TftpPacket::oack(options.clone()).encode();
        match TftpPacket::parse(&encoded).unwrap() {
            TftpPacket::Oack { options: parsed } => assert_eq!(parsed, options),
            other => panic!("expected Oack, got {other:?}"),
        }
    }
}
