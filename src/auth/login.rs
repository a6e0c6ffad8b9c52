//! OAuth 2.0 PKCE building blocks for minting the initial token pair.
//!
//! The callback listener and code-for-token exchange live outside this
//! crate; this module only produces the verifier/challenge/state triple and
//! the authorize URL a user opens in a browser.

use base64::Engine;
use sha2::Digest;

/// Endpoints and client identity for one OAuth login.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// One prepared PKCE flow.
#[derive(Debug, Clone)]
pub struct PkceFlow {
    /// Kept locally and sent with the code exchange.
    pub code_verifier: String,
    /// S256 digest of the verifier, sent in the authorize URL.
    pub code_challenge: String,
    /// CSRF-protection state parameter.
    pub state: String,
}

impl PkceFlow {
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = code_challenge_s256(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Generate a PKCE code verifier (43-128 chars, URL-safe).
fn generate_code_verifier() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE code challenge: BASE64URL(SHA256(verifier)).
fn code_challenge_s256(verifier: &str) -> String {
    let hash = sha2::Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Build the browser authorize URL for a prepared flow.
pub fn authorize_url(config: &LoginConfig, flow: &PkceFlow) -> String {
    let scopes = config.scopes.join(" ");
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scopes),
        urlencoding::encode(&flow.state),
        urlencoding::encode(&flow.code_challenge),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let flow = PkceFlow::generate();
        assert!(flow.code_verifier.len() >= 43);
        assert!(flow.code_verifier.len() <= 128);
    }

    #[test]
    fn test_code_challenge_is_deterministic() {
        assert_eq!(code_challenge_s256("abc"), code_challenge_s256("abc"));
    }

    #[test]
    fn test_code_challenge_known_vector() {
        // SHA256("test") base64url-encoded without padding.
        assert_eq!(
            code_challenge_s256("test"),
            "n4bQgYhMfWWaL-qgxVrQFaO_TxsrC4Is0V1sFbDwCgg"
        );
    }

    #[test]
    fn test_state_uniqueness() {
        let a = PkceFlow::generate();
        let b = PkceFlow::generate();
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn test_authorize_url_escapes_parameters() {
        let config = LoginConfig {
            authorize_url: "https://auth.example.com/authorize".into(),
            client_id: "cli 01".into(),
            redirect_uri: "http://localhost:8765/callback".into(),
            scopes: vec!["inference".into(), "profile".into()],
        };
        let flow = PkceFlow::generate();
        let url = authorize_url(&config, &flow);
        assert!(url.starts_with("https://auth.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=cli%2001"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8765%2Fcallback"));
        assert!(url.contains("scope=inference%20profile"));
        assert!(url.contains("code_challenge_method=S256"));
    }
}
