//! Frontend (client → server) messages.

use crate::protocol::codec::MessageBuilder;
use crate::types::encode::EncodedArg;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSL request code, sent length-prefixed before startup
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Write an SSLRequest message.
///
/// Sent before StartupMessage to request TLS. The server answers with a
/// single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage.
///
/// `params` is a list of (name, value) pairs, terminated on the wire by an
/// empty key.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_untagged(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a Terminate message, sent to cleanly close the session.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, msg_type::TERMINATE);
    msg.finish();
}

/// Write a PasswordMessage (cleartext or MD5-hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse carrying the client-first-message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse carrying the client-final-message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

/// Write a Query message (simple query protocol).
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

/// Write a Parse message for the unnamed statement with no type hints.
pub fn write_parse(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr("");
    msg.write_cstr(query);
    msg.write_i16(0);
    msg.finish();
}

/// Write a Bind message binding `args` to the unnamed statement/portal.
///
/// Parameters travel in the text format unless any argument is a raw byte
/// sequence, in which case a per-parameter format code list is emitted.
pub fn write_bind(buf: &mut Vec<u8>, args: &[EncodedArg]) {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);
    msg.write_cstr("");
    msg.write_cstr("");

    let has_binary = args.iter().any(|arg| matches!(arg, EncodedArg::Binary(_)));
    if has_binary {
        msg.write_i16(args.len() as i16);
        for arg in args {
            let code = match arg {
                EncodedArg::Binary(_) => 1,
                _ => 0,
            };
            msg.write_i16(code);
        }
    } else {
        msg.write_i16(0);
    }

    msg.write_i16(args.len() as i16);
    for arg in args {
        match arg {
            EncodedArg::Null => msg.write_i32(-1),
            EncodedArg::Text(text) => {
                msg.write_i32(text.len() as i32);
                msg.write_bytes(text.as_bytes());
            }
            EncodedArg::Binary(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
        }
    }

    // All results in text format
    msg.write_i16(0);
    msg.finish();
}

/// Write a Describe message for the unnamed portal.
pub fn write_describe_portal(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr("");
    msg.finish();
}

/// Write an Execute message for the unnamed portal with no row limit.
pub fn write_execute(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr("");
    msg.write_i32(0);
    msg.finish();
}

/// Write a Sync message, ending an extended query sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, msg_type::SYNC);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_len(buf: &[u8]) -> i32 {
        i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]])
    }

    #[test]
    fn ssl_request_is_eight_bytes() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn startup_carries_version_and_terminator() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "alice"), ("database", "app")]);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        let version = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(version, PROTOCOL_VERSION_3_0);
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn terminate_is_tag_plus_length() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn query_frame_length_matches() {
        let mut buf = Vec::new();
        write_query(&mut buf, "SELECT 1");
        assert_eq!(buf[0], b'Q');
        assert_eq!(frame_len(&buf) as usize, buf.len() - 1);
    }

    #[test]
    fn bind_all_text_sends_no_format_codes() {
        let mut buf = Vec::new();
        write_bind(&mut buf, &[EncodedArg::Text("42".into()), EncodedArg::Null]);
        assert_eq!(buf[0], b'B');
        // portal "" + statement "" (two NULs), then zero format codes
        assert_eq!(&buf[5..7], &[0, 0]);
        assert_eq!(&buf[7..9], &0_i16.to_be_bytes());
        // two parameter values follow
        assert_eq!(&buf[9..11], &2_i16.to_be_bytes());
    }

    #[test]
    fn bind_with_binary_arg_sends_per_parameter_codes() {
        let mut buf = Vec::new();
        write_bind(
            &mut buf,
            &[
                EncodedArg::Text("x".into()),
                EncodedArg::Binary(vec![1, 2, 3]),
            ],
        );
        assert_eq!(&buf[7..9], &2_i16.to_be_bytes());
        assert_eq!(&buf[9..11], &0_i16.to_be_bytes());
        assert_eq!(&buf[11..13], &1_i16.to_be_bytes());
    }

    #[test]
    fn sync_and_execute_shapes() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        assert_eq!(buf, [b'S', 0, 0, 0, 4]);

        let mut buf = Vec::new();
        write_execute(&mut buf);
        assert_eq!(buf[0], b'E');
        assert_eq!(frame_len(&buf), 9);
    }
}
