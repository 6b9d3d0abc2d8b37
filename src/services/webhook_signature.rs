use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Optional algorithm prefix some senders put in front of the hex digest.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks webhook authenticity with HMAC-SHA256 over the exact request bytes.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret_configured", &self.secret.is_some())
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.secret.is_some()
    }

    /// Returns true when the signature matches, or when no secret is configured.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return false;
        };

        let hex_digest = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .unwrap_or(signature);
        let provided = match hex::decode(hex_digest) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!("webhook signature is not hex encoded");
                return false;
            }
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if expected.len() != provided.len() {
            return false;
        }
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    /// Hex signature for `body`, as a sender would compute it.
    pub fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}
