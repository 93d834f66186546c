//! ErrorResponse / NoticeResponse field parsing.

use crate::error::{Result, ServerNotice};
use crate::protocol::codec::PacketReader;

/// Field type codes used inside `E` and `N` frames.
mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse the field list of an ErrorResponse or NoticeResponse payload.
///
/// The non-localized severity, when present, wins over the localized one.
pub fn parse_notice_fields(reader: &mut PacketReader<'_>) -> Result<ServerNotice> {
    let mut notice = ServerNotice::default();
    let mut localized_severity = None;

    loop {
        let field = reader.read_u8()?;
        if field == 0 {
            break;
        }
        let value = reader.read_cstr()?;

        match field {
            field_type::SEVERITY => localized_severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => notice.severity = value.to_string(),
            field_type::CODE => notice.code = value.to_string(),
            field_type::MESSAGE => notice.message = value.to_string(),
            field_type::DETAIL => notice.detail = Some(value.to_string()),
            field_type::HINT => notice.hint = Some(value.to_string()),
            field_type::POSITION => notice.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => notice.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => notice.internal_query = Some(value.to_string()),
            field_type::WHERE => notice.where_ = Some(value.to_string()),
            field_type::SCHEMA => notice.schema = Some(value.to_string()),
            field_type::TABLE => notice.table = Some(value.to_string()),
            field_type::COLUMN => notice.column = Some(value.to_string()),
            field_type::DATA_TYPE => notice.data_type = Some(value.to_string()),
            field_type::CONSTRAINT => notice.constraint = Some(value.to_string()),
            field_type::FILE => notice.file = Some(value.to_string()),
            field_type::LINE => notice.line = value.parse().ok(),
            field_type::ROUTINE => notice.routine = Some(value.to_string()),
            _ => {
                tracing::debug!(field = %(field as char), "unknown notice field type");
            }
        }
    }

    if notice.severity.is_empty() {
        if let Some(severity) = localized_severity {
            notice.severity = severity;
        }
    }

    Ok(notice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_fields() {
        let payload =
            b"SERROR\0VERROR\0C42601\0Msyntax error at or near \"FROM\"\0P15\0Fscan.l\0L1145\0\0";
        let mut reader = PacketReader::new(payload);
        let notice = parse_notice_fields(&mut reader).unwrap();
        assert_eq!(notice.severity, "ERROR");
        assert_eq!(notice.code, "42601");
        assert!(notice.message.starts_with("syntax error"));
        assert_eq!(notice.position, Some(15));
        assert_eq!(notice.line, Some(1145));
        assert_eq!(notice.detail, None);
    }

    #[test]
    fn localized_severity_is_fallback() {
        let payload = b"SFATAL\0C28P01\0Mpassword authentication failed for user \"su\"\0\0";
        let mut reader = PacketReader::new(payload);
        let notice = parse_notice_fields(&mut reader).unwrap();
        assert_eq!(notice.severity, "FATAL");
        assert!(notice.is_fatal());
    }
}
