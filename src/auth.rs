//! Authentication engine: cleartext, MD5, and SCRAM-SHA-256 (RFC 5802/7677).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::{Digest as _, Md5};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{AuthError, Result};

const SCRAM_MECHANISM: &str = "SCRAM-SHA-256";
const GS2_HEADER: &str = "n,,";
// base64("n,,"), sent as the channel-binding attribute of the final message
const CHANNEL_BINDING: &str = "biws";
const NONCE_BYTES: usize = 18;

/// Compute the MD5 password response.
///
/// Format: `"md5" + md5(md5(password + username) + salt)`, both digests
/// rendered lowercase hexadecimal.
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// SASLprep-lite: reject anything outside printable ASCII (0x21..=0x7E,
/// plus space which PostgreSQL permits in passwords).
fn assert_printable(text: &str, allow_space: bool) -> Result<()> {
    let ok = text.chars().all(|c| {
        let code = c as u32;
        (0x21..=0x7e).contains(&code) || (allow_space && c == ' ')
    });
    if ok {
        Ok(())
    } else {
        Err(AuthError::UnsafeChars.into())
    }
}

/// Escape `,` and `=` in a SCRAM username per RFC 5802.
fn escape_username(username: &str) -> String {
    let mut escaped = String::with_capacity(username.len());
    for c in username.chars() {
        match c {
            ',' => escaped.push_str("=2C"),
            '=' => escaped.push_str("=3D"),
            _ => escaped.push(c),
        }
    }
    escaped
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::Protocol(format!("HMAC key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Keys derived from the salted password (RFC 5802 §3).
struct ScramKeys {
    client: [u8; 32],
    stored: [u8; 32],
    server: [u8; 32],
}

impl ScramKeys {
    fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        let mut salted = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted);

        let client = hmac_sha256(&salted, b"Client Key")?;
        let stored = Sha256::digest(client).into();
        let server = hmac_sha256(&salted, b"Server Key")?;
        Ok(Self {
            client,
            stored,
            server,
        })
    }
}

/// Progress of the SCRAM exchange. Any out-of-order transition fails the
/// exchange permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScramState {
    Init,
    ClientChallenge,
    ServerChallenge,
    ClientResponse,
    ServerResponse,
    Failed,
}

/// Client side of a SCRAM-SHA-256 exchange.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    server_nonce: String,
    auth_message: String,
    keys: Option<ScramKeys>,
    state: ScramState,
}

impl ScramClient {
    /// The mechanism name announced in the SASLInitialResponse.
    pub const MECHANISM: &'static str = SCRAM_MECHANISM;

    /// Start a SCRAM exchange with a random client nonce.
    pub fn new(username: &str, password: &str) -> Result<Self> {
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut nonce_bytes);
        Self::with_nonce(username, password, &BASE64.encode(nonce_bytes))
    }

    /// Start a SCRAM exchange with a caller-provided nonce.
    pub(crate) fn with_nonce(username: &str, password: &str, nonce: &str) -> Result<Self> {
        assert_printable(username, false)?;
        assert_printable(password, true)?;
        Ok(Self {
            username: escape_username(username),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            server_nonce: String::new(),
            auth_message: String::new(),
            keys: None,
            state: ScramState::Init,
        })
    }

    fn expect_state(&mut self, expected: ScramState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            let actual = self.state;
            self.state = ScramState::Failed;
            Err(AuthError::Protocol(format!(
                "SCRAM message out of order (expected {expected:?}, state {actual:?})"
            ))
            .into())
        }
    }

    /// Compose the client-first-message, gs2 header included.
    pub fn client_first_message(&mut self) -> Result<String> {
        self.expect_state(ScramState::Init)?;
        let bare = format!("n={},r={}", self.username, self.client_nonce);
        self.auth_message.push_str(&bare);
        self.state = ScramState::ClientChallenge;
        Ok(format!("{GS2_HEADER}{bare}"))
    }

    /// Digest the server-first-message: nonce, salt, and iteration count.
    pub fn receive_server_first(&mut self, message: &str) -> Result<()> {
        self.expect_state(ScramState::ClientChallenge)?;
        self.state = ScramState::Failed;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attribute in message.split(',') {
            if let Some(value) = attribute.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = attribute.strip_prefix("s=") {
                salt = Some(value);
            } else if let Some(value) = attribute.strip_prefix("i=") {
                iterations = Some(value);
            }
        }

        let nonce = nonce.ok_or(AuthError::BadServerNonce)?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(AuthError::BadServerNonce.into());
        }

        let salt = BASE64
            .decode(salt.ok_or(AuthError::BadSalt)?)
            .map_err(|_| AuthError::BadSalt)?;

        let iterations: u32 = iterations
            .ok_or(AuthError::BadIterationCount)?
            .parse()
            .map_err(|_| AuthError::BadIterationCount)?;
        if iterations == 0 {
            return Err(AuthError::BadIterationCount.into());
        }

        self.server_nonce = nonce.to_string();
        self.keys = Some(ScramKeys::derive(&self.password, &salt, iterations)?);
        self.auth_message.push(',');
        self.auth_message.push_str(message);
        self.state = ScramState::ServerChallenge;
        Ok(())
    }

    /// Compose the client-final-message carrying the proof.
    pub fn client_final_message(&mut self) -> Result<String> {
        self.expect_state(ScramState::ServerChallenge)?;

        let without_proof = format!("c={CHANNEL_BINDING},r={}", self.server_nonce);
        self.auth_message.push(',');
        self.auth_message.push_str(&without_proof);

        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| AuthError::Protocol("keys not derived".into()))?;
        let signature = hmac_sha256(&keys.stored, self.auth_message.as_bytes())?;
        let mut proof = [0u8; 32];
        for (i, byte) in proof.iter_mut().enumerate() {
            *byte = keys.client[i] ^ signature[i];
        }

        self.state = ScramState::ClientResponse;
        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Verify the server-final-message signature.
    pub fn receive_server_final(&mut self, message: &str) -> Result<()> {
        self.expect_state(ScramState::ClientResponse)?;
        self.state = ScramState::Failed;

        if let Some(reason) = message.strip_prefix("e=") {
            return Err(AuthError::Rejected(reason.to_string()).into());
        }
        let verifier = message.strip_prefix("v=").ok_or(AuthError::BadVerifier)?;
        let verifier = BASE64.decode(verifier).map_err(|_| AuthError::BadVerifier)?;

        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| AuthError::Protocol("keys not derived".into()))?;
        let expected = hmac_sha256(&keys.server, self.auth_message.as_bytes())?;
        if verifier != expected {
            return Err(AuthError::BadVerifier.into());
        }

        self.state = ScramState::ServerResponse;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_shape() {
        let hashed = md5_password("alice", "hunter2", &[1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
        assert!(hashed[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    // RFC 7677 §3 test vector.
    #[test]
    fn scram_sha256_rfc_vector() {
        let mut scram = ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO").unwrap();

        assert_eq!(
            scram.client_first_message().unwrap(),
            "n,,n=user,r=rOprNGfwEbeRWgbNEkqO"
        );

        scram
            .receive_server_first(
                "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                 s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
            )
            .unwrap();

        let final_message = scram.client_final_message().unwrap();
        assert_eq!(
            final_message,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        scram
            .receive_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn server_nonce_must_extend_client_nonce() {
        let mut scram = ScramClient::with_nonce("user", "pencil", "abcdef").unwrap();
        scram.client_first_message().unwrap();
        let err = scram
            .receive_server_first("r=zzzzzz123,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Auth(AuthError::BadServerNonce)
        ));
    }

    #[test]
    fn bad_salt_and_iteration_count() {
        let mut scram = ScramClient::with_nonce("user", "pencil", "abc").unwrap();
        scram.client_first_message().unwrap();
        let err = scram
            .receive_server_first("r=abc123,s=!!!,i=4096")
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Auth(AuthError::BadSalt)));

        let mut scram = ScramClient::with_nonce("user", "pencil", "abc").unwrap();
        scram.client_first_message().unwrap();
        let err = scram
            .receive_server_first("r=abc123,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=0")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Auth(AuthError::BadIterationCount)
        ));
    }

    #[test]
    fn server_rejection_is_surfaced() {
        let mut scram = ScramClient::with_nonce("user", "pencil", "abc").unwrap();
        scram.client_first_message().unwrap();
        scram
            .receive_server_first("r=abcdef,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap();
        scram.client_final_message().unwrap();
        let err = scram
            .receive_server_final("e=invalid-proof")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Auth(AuthError::Rejected(_))
        ));
    }

    #[test]
    fn username_escaping_and_unsafe_chars() {
        let mut scram = ScramClient::with_nonce("a,b=c", "pw", "n").unwrap();
        let first = scram.client_first_message().unwrap();
        assert_eq!(first, "n,,n=a=2Cb=3Dc,r=n");

        assert!(ScramClient::with_nonce("héllo", "pw", "n").is_err());
        assert!(ScramClient::with_nonce("user", "tab\tchar", "n").is_err());
    }

    #[test]
    fn out_of_order_messages_fail() {
        let mut scram = ScramClient::with_nonce("user", "pencil", "abc").unwrap();
        assert!(scram
            .receive_server_first("r=abc,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .is_err());
        // Once failed, the exchange stays failed
        assert!(scram.client_first_message().is_err());
    }
}
