//! Session status messages: authentication, key data, parameters, readiness.

use crate::error::{ProtocolError, Result};
use crate::protocol::codec::PacketReader;
use crate::protocol::types::TransactionStatus;

/// Authentication method codes carried in an `R` frame.
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Parsed authentication request or result.
#[derive(Debug)]
pub enum Authentication {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required, with the 4-byte salt
    Md5Password { salt: [u8; 4] },
    /// SASL exchange requested, with the offered mechanisms
    Sasl { mechanisms: Vec<String> },
    /// SASL continuation carrying the server-first-message
    SaslContinue { data: Vec<u8> },
    /// SASL completion carrying the server-final-message
    SaslFinal { data: Vec<u8> },
    /// A method this client does not implement (GSS, SSPI, SCM, ...)
    Unsupported { code: i32 },
}

impl Authentication {
    /// Parse an `R` frame payload.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        let code = reader.read_i32()?;
        match code {
            auth_code::OK => Ok(Authentication::Ok),
            auth_code::CLEARTEXT_PASSWORD => Ok(Authentication::CleartextPassword),
            auth_code::MD5_PASSWORD => {
                let salt: [u8; 4] = reader.read_bytes(4)?.try_into().map_err(|_| {
                    ProtocolError::MalformedFrame("MD5 salt must be 4 bytes".into())
                })?;
                Ok(Authentication::Md5Password { salt })
            }
            auth_code::SASL => {
                let mut mechanisms = Vec::new();
                while reader.remaining() > 1 {
                    mechanisms.push(reader.read_cstr()?.to_string());
                }
                Ok(Authentication::Sasl { mechanisms })
            }
            auth_code::SASL_CONTINUE => Ok(Authentication::SaslContinue {
                data: reader.read_rest().to_vec(),
            }),
            auth_code::SASL_FINAL => Ok(Authentication::SaslFinal {
                data: reader.read_rest().to_vec(),
            }),
            _ => Ok(Authentication::Unsupported { code }),
        }
    }
}

/// BackendKeyData: the backend process ID and cancellation secret.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: u32,
    /// Secret key for cancellation requests
    pub secret_key: u32,
}

impl BackendKeyData {
    /// Parse a `K` frame payload.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            pid: reader.read_u32()?,
            secret_key: reader.read_u32()?,
        })
    }
}

/// ParameterStatus: a server-reported `key=value` runtime parameter.
#[derive(Debug, Clone)]
pub struct ParameterStatus {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: String,
}

impl ParameterStatus {
    /// Parse an `S` frame payload.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            name: reader.read_cstr()?.to_string(),
            value: reader.read_cstr()?.to_string(),
        })
    }
}

/// ReadyForQuery: the server is idle and reports its transaction status.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    /// Transaction status at the time the frame was sent
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    /// Parse a `Z` frame payload.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        let byte = reader.read_u8()?;
        let status = TransactionStatus::from_byte(byte).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "unknown transaction status byte '{}'",
                byte as char
            ))
        })?;
        Ok(Self { status })
    }
}
