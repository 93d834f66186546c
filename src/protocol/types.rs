//! Common wire protocol types and type OIDs.

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Data format code in the v3 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw i16 value. Unknown codes read as text.
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

/// Transaction status indicator from the ReadyForQuery frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    #[default]
    Idle = b'I',
    /// In a transaction block
    InTransaction = b'T',
    /// In a failed transaction block; queries rejected until rollback
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from the status byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently inside a transaction block (active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }
}

/// Type OIDs the default codec understands, with their array counterparts.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const REGPROC: Oid = 24;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const TID: Oid = 27;
    pub const XID: Oid = 28;
    pub const CID: Oid = 29;
    pub const JSON: Oid = 114;
    pub const XML: Oid = 142;
    pub const POINT: Oid = 600;
    pub const LSEG: Oid = 601;
    pub const PATH: Oid = 602;
    pub const BOX: Oid = 603;
    pub const POLYGON: Oid = 604;
    pub const LINE: Oid = 628;
    pub const CIDR: Oid = 650;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const CIRCLE: Oid = 718;
    pub const MACADDR: Oid = 829;
    pub const INET: Oid = 869;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const INTERVAL: Oid = 1186;
    pub const TIMETZ: Oid = 1266;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;

    pub const JSON_ARRAY: Oid = 199;
    pub const XML_ARRAY: Oid = 143;
    pub const LINE_ARRAY: Oid = 629;
    pub const CIDR_ARRAY: Oid = 651;
    pub const CIRCLE_ARRAY: Oid = 719;
    pub const BOOL_ARRAY: Oid = 1000;
    pub const BYTEA_ARRAY: Oid = 1001;
    pub const CHAR_ARRAY: Oid = 1002;
    pub const NAME_ARRAY: Oid = 1003;
    pub const INT2_ARRAY: Oid = 1005;
    pub const INT4_ARRAY: Oid = 1007;
    pub const REGPROC_ARRAY: Oid = 1008;
    pub const TEXT_ARRAY: Oid = 1009;
    pub const TID_ARRAY: Oid = 1010;
    pub const XID_ARRAY: Oid = 1011;
    pub const CID_ARRAY: Oid = 1012;
    pub const BPCHAR_ARRAY: Oid = 1014;
    pub const VARCHAR_ARRAY: Oid = 1015;
    pub const INT8_ARRAY: Oid = 1016;
    pub const POINT_ARRAY: Oid = 1017;
    pub const LSEG_ARRAY: Oid = 1018;
    pub const PATH_ARRAY: Oid = 1019;
    pub const BOX_ARRAY: Oid = 1020;
    pub const FLOAT4_ARRAY: Oid = 1021;
    pub const FLOAT8_ARRAY: Oid = 1022;
    pub const POLYGON_ARRAY: Oid = 1027;
    pub const OID_ARRAY: Oid = 1028;
    pub const MACADDR_ARRAY: Oid = 1040;
    pub const INET_ARRAY: Oid = 1041;
    pub const TIMESTAMP_ARRAY: Oid = 1115;
    pub const DATE_ARRAY: Oid = 1182;
    pub const TIME_ARRAY: Oid = 1183;
    pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
    pub const INTERVAL_ARRAY: Oid = 1187;
    pub const NUMERIC_ARRAY: Oid = 1231;
    pub const TIMETZ_ARRAY: Oid = 1270;
    pub const UUID_ARRAY: Oid = 2951;
    pub const JSONB_ARRAY: Oid = 3807;

    /// Element type of an array OID, if it is one the codec knows.
    pub fn element_of(array_oid: Oid) -> Option<Oid> {
        let element = match array_oid {
            JSON_ARRAY => JSON,
            XML_ARRAY => XML,
            LINE_ARRAY => LINE,
            CIDR_ARRAY => CIDR,
            CIRCLE_ARRAY => CIRCLE,
            BOOL_ARRAY => BOOL,
            BYTEA_ARRAY => BYTEA,
            CHAR_ARRAY => CHAR,
            NAME_ARRAY => NAME,
            INT2_ARRAY => INT2,
            INT4_ARRAY => INT4,
            REGPROC_ARRAY => REGPROC,
            TEXT_ARRAY => TEXT,
            TID_ARRAY => TID,
            XID_ARRAY => XID,
            CID_ARRAY => CID,
            BPCHAR_ARRAY => BPCHAR,
            VARCHAR_ARRAY => VARCHAR,
            INT8_ARRAY => INT8,
            POINT_ARRAY => POINT,
            LSEG_ARRAY => LSEG,
            PATH_ARRAY => PATH,
            BOX_ARRAY => BOX,
            FLOAT4_ARRAY => FLOAT4,
            FLOAT8_ARRAY => FLOAT8,
            POLYGON_ARRAY => POLYGON,
            OID_ARRAY => OID,
            MACADDR_ARRAY => MACADDR,
            INET_ARRAY => INET,
            TIMESTAMP_ARRAY => TIMESTAMP,
            DATE_ARRAY => DATE,
            TIME_ARRAY => TIME,
            TIMESTAMPTZ_ARRAY => TIMESTAMPTZ,
            INTERVAL_ARRAY => INTERVAL,
            NUMERIC_ARRAY => NUMERIC,
            TIMETZ_ARRAY => TIMETZ,
            UUID_ARRAY => UUID,
            JSONB_ARRAY => JSONB,
            _ => return None,
        };
        Some(element)
    }

    /// Catalog name of a scalar or array type OID, used to resolve custom
    /// decoders registered by type name.
    pub fn type_name(oid: Oid) -> Option<&'static str> {
        let name = match oid {
            BOOL => "bool",
            BYTEA => "bytea",
            CHAR => "char",
            NAME => "name",
            INT8 => "int8",
            INT2 => "int2",
            INT4 => "int4",
            REGPROC => "regproc",
            TEXT => "text",
            OID => "oid",
            TID => "tid",
            XID => "xid",
            CID => "cid",
            JSON => "json",
            XML => "xml",
            POINT => "point",
            LSEG => "lseg",
            PATH => "path",
            BOX => "box",
            POLYGON => "polygon",
            LINE => "line",
            CIDR => "cidr",
            FLOAT4 => "float4",
            FLOAT8 => "float8",
            CIRCLE => "circle",
            MACADDR => "macaddr",
            INET => "inet",
            BPCHAR => "bpchar",
            VARCHAR => "varchar",
            DATE => "date",
            TIME => "time",
            TIMESTAMP => "timestamp",
            TIMESTAMPTZ => "timestamptz",
            INTERVAL => "interval",
            TIMETZ => "timetz",
            NUMERIC => "numeric",
            UUID => "uuid",
            JSONB => "jsonb",
            JSON_ARRAY => "_json",
            XML_ARRAY => "_xml",
            LINE_ARRAY => "_line",
            CIDR_ARRAY => "_cidr",
            CIRCLE_ARRAY => "_circle",
            BOOL_ARRAY => "_bool",
            BYTEA_ARRAY => "_bytea",
            CHAR_ARRAY => "_char",
            NAME_ARRAY => "_name",
            INT2_ARRAY => "_int2",
            INT4_ARRAY => "_int4",
            REGPROC_ARRAY => "_regproc",
            TEXT_ARRAY => "_text",
            TID_ARRAY => "_tid",
            XID_ARRAY => "_xid",
            CID_ARRAY => "_cid",
            BPCHAR_ARRAY => "_bpchar",
            VARCHAR_ARRAY => "_varchar",
            INT8_ARRAY => "_int8",
            POINT_ARRAY => "_point",
            LSEG_ARRAY => "_lseg",
            PATH_ARRAY => "_path",
            BOX_ARRAY => "_box",
            FLOAT4_ARRAY => "_float4",
            FLOAT8_ARRAY => "_float8",
            POLYGON_ARRAY => "_polygon",
            OID_ARRAY => "_oid",
            MACADDR_ARRAY => "_macaddr",
            INET_ARRAY => "_inet",
            TIMESTAMP_ARRAY => "_timestamp",
            DATE_ARRAY => "_date",
            TIME_ARRAY => "_time",
            TIMESTAMPTZ_ARRAY => "_timestamptz",
            INTERVAL_ARRAY => "_interval",
            NUMERIC_ARRAY => "_numeric",
            TIMETZ_ARRAY => "_timetz",
            UUID_ARRAY => "_uuid",
            JSONB_ARRAY => "_jsonb",
            _ => return None,
        };
        Some(name)
    }
}
