//! Result-bearing messages: row descriptions, data rows, command tags.

use crate::error::Result;
use crate::protocol::codec::PacketReader;
use crate::protocol::types::{FormatCode, Oid};

/// Description of a single output column.
#[derive(Debug, Clone)]
pub struct ColumnDescription {
    /// Column name
    pub name: String,
    /// Originating table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Attribute number within the table (0 if not a table column)
    pub column_index: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 variable, -2 null-terminated)
    pub type_size: i16,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
    /// Wire format of values in this column
    pub format: FormatCode,
}

/// RowDescription: the ordered column descriptors of a result set.
#[derive(Debug, Clone, Default)]
pub struct RowDescription {
    /// Column descriptors in result order
    pub columns: Vec<ColumnDescription>,
}

impl RowDescription {
    /// Parse a `T` frame payload.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        let count = reader.read_i16()?;
        let mut columns = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let name = reader.read_cstr()?.to_string();
            columns.push(ColumnDescription {
                name,
                table_oid: reader.read_u32()?,
                column_index: reader.read_i16()?,
                type_oid: reader.read_u32()?,
                type_size: reader.read_i16()?,
                type_modifier: reader.read_i32()?,
                format: FormatCode::from_i16(reader.read_i16()?),
            });
        }
        Ok(Self { columns })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the description carries no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// DataRow: the raw field values of one row. `None` is SQL NULL.
#[derive(Debug, Clone)]
pub struct DataRow {
    /// Raw field bytes per column
    pub fields: Vec<Option<Vec<u8>>>,
}

impl DataRow {
    /// Parse a `D` frame payload: a field count, then per field a 4-byte
    /// length (-1 for NULL) and that many bytes.
    pub fn parse(reader: &mut PacketReader<'_>) -> Result<Self> {
        let count = reader.read_i16()?;
        let mut fields = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let len = reader.read_i32()?;
            if len < 0 {
                fields.push(None);
            } else {
                fields.push(Some(reader.read_bytes(len as usize)?.to_vec()));
            }
        }
        Ok(Self { fields })
    }
}

/// Parse a `C` frame payload into its command tag text.
pub fn parse_command_tag(reader: &mut PacketReader<'_>) -> Result<String> {
    Ok(reader.read_cstr()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&0_i16.to_be_bytes()); // column index
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        payload.extend_from_slice(&0_i16.to_be_bytes()); // text format
        payload
    }

    #[test]
    fn parse_row_description() {
        let payload = row_description_payload();
        let mut reader = PacketReader::new(&payload);
        let desc = RowDescription::parse(&mut reader).unwrap();
        assert_eq!(desc.len(), 1);
        assert_eq!(desc.columns[0].name, "id");
        assert_eq!(desc.columns[0].type_oid, 23);
        assert_eq!(desc.columns[0].format, FormatCode::Text);
    }

    #[test]
    fn parse_data_row_with_null() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2_i16.to_be_bytes());
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());

        let mut reader = PacketReader::new(&payload);
        let row = DataRow::parse(&mut reader).unwrap();
        assert_eq!(row.fields.len(), 2);
        assert_eq!(row.fields[0].as_deref(), Some(b"42".as_slice()));
        assert_eq!(row.fields[1], None);
    }

    #[test]
    fn truncated_data_row_fails() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");

        let mut reader = PacketReader::new(&payload);
        assert!(DataRow::parse(&mut reader).is_err());
    }
}
