use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenClaims {
  #[serde(rename = "sub")]
  pub subject: String,
  #[serde(rename = "exp")]
  pub expires_at_ms: i64,
}

pub fn sign_session_token(claims: &SessionTokenClaims, secret: &str) -> anyhow::Result<String> {
  let payload = serde_json::to_vec(claims).context("failed to serialize token claims")?;
  let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .context("failed to initialize token signer")?;
  mac.update(payload_b64.as_bytes());
  let signature = mac.finalize().into_bytes();
  let signature_b64 = URL_SAFE_NO_PAD.encode(signature);

  Ok(format!("{payload_b64}.{signature_b64}"))
}

/// Returns the claims when the signature checks out and the token is not yet
/// expired at `now_ms`.
pub fn verify_session_token(token: &str, secret: &str, now_ms: i64) -> Option<SessionTokenClaims> {
  let (payload_b64, signature_b64) = token.split_once('.')?;
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
  mac.update(payload_b64.as_bytes());
  let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
  mac.verify_slice(&signature).ok()?;

  let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
  let claims: SessionTokenClaims = serde_json::from_slice(&payload).ok()?;
  if claims.expires_at_ms <= now_ms {
    return None;
  }
  Some(claims)
}

pub fn hash_password(username: &str, password: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(username.to_lowercase().as_bytes());
  hasher.update(b":");
  hasher.update(password.as_bytes());
  URL_SAFE_NO_PAD.encode(hasher.finalize())
}
