//! Join-ticket verifier (spec §4.A): validates HMAC-signed admission
//! tokens and enforces single-use-per-identity replay protection.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use colab_domain::config::AdmissionConfig;
use colab_protocol::Role;

type HmacSha256 = Hmac<Sha256>;

/// Hard-coded dev-mode signing secret. Only honored when
/// [`AdmissionConfig::is_production`] is `false` (spec §9).
const DEV_FALLBACK_SECRET: &str = "colab-dev-insecure-secret";

const MAX_SUB_LEN: usize = 128;
const MAX_WORKSPACE_ID_LEN: usize = 128;
const EXPECTED_AUDIENCE: &str = "colab-backend";

/// The decoded claims of a validated join ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketClaims {
    pub sub: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    pub aud: String,
    pub jti: String,
    /// Unix seconds.
    pub exp: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Closed set of admission failure reasons (spec §4.A), surfaced to the
/// client before the connection is closed with code `4003`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("missing ticket")]
    Missing,
    #[error("invalid ticket")]
    Invalid,
    #[error("ticket expired")]
    Expired,
    #[error("workspace mismatch")]
    WorkspaceMismatch,
    #[error("user mismatch")]
    UserMismatch,
    #[error("ticket replay")]
    Replay,
}

impl TicketError {
    /// Machine-readable reason string sent to the client.
    pub fn code(self) -> &'static str {
        match self {
            TicketError::Missing => "missing",
            TicketError::Invalid => "invalid",
            TicketError::Expired => "expired",
            TicketError::WorkspaceMismatch => "workspace-mismatch",
            TicketError::UserMismatch => "user-mismatch",
            TicketError::Replay => "replay",
        }
    }
}

/// Tracks consumed `jti`s to enforce single-use semantics while still
/// allowing the same `(sub, workspaceId)` pair to replay a ticket until
/// it expires (reload / reconnect, spec §3, §4.A).
#[derive(Default)]
pub struct ConsumedTicketMap {
    inner: Mutex<HashMap<String, ConsumedEntry>>,
}

struct ConsumedEntry {
    sub: String,
    workspace_id: String,
    exp: i64,
}

impl ConsumedTicketMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prunes expired entries, then checks `jti` against the map.
    ///
    /// Returns `Err(Replay)` if `jti` was consumed by a different
    /// `(sub, workspaceId)` pair. Otherwise records/refreshes the entry
    /// and returns `Ok(())`.
    fn check_and_record(
        &self,
        jti: &str,
        sub: &str,
        workspace_id: &str,
        exp: i64,
        now: i64,
    ) -> Result<(), TicketError> {
        let mut map = self.inner.lock();
        map.retain(|_, entry| entry.exp > now);

        if let Some(entry) = map.get(jti) {
            if entry.sub != sub || entry.workspace_id != workspace_id {
                return Err(TicketError::Replay);
            }
        }

        map.insert(
            jti.to_string(),
            ConsumedEntry {
                sub: sub.to_string(),
                workspace_id: workspace_id.to_string(),
                exp,
            },
        );
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Resolves the HMAC secret in priority order (spec §4.A): primary env,
/// fallback env, then the dev fallback gated on non-production.
fn resolve_secret(config: &AdmissionConfig) -> Option<String> {
    if let Ok(v) = std::env::var(&config.primary_secret_env) {
        if !v.is_empty() {
            return Some(v);
        }
    }
    if let Ok(v) = std::env::var(&config.fallback_secret_env) {
        if !v.is_empty() {
            return Some(v);
        }
    }
    if !config.is_production() {
        return Some(DEV_FALLBACK_SECRET.to_string());
    }
    None
}

/// Ticket format: `base64url(json claims).base64url(hmac-sha256 signature)`.
/// The issuer is an external service (spec §1); this verifies only.
pub struct TicketVerifier {
    consumed: ConsumedTicketMap,
}

impl TicketVerifier {
    pub fn new() -> Self {
        Self {
            consumed: ConsumedTicketMap::new(),
        }
    }

    /// Verifies a bearer ticket string against the admission config, and
    /// (if present) cross-checks `claimed_workspace`/`claimed_user` from
    /// the `auth` frame itself (spec §4.A).
    pub fn verify(
        &self,
        token: &str,
        config: &AdmissionConfig,
        claimed_workspace: Option<&str>,
        claimed_user: Option<&str>,
        now: i64,
    ) -> Result<TicketClaims, TicketError> {
        if token.is_empty() {
            return Err(TicketError::Missing);
        }

        let mut parts = token.splitn(2, '.');
        let payload_b64 = parts.next().ok_or(TicketError::Invalid)?;
        let sig_b64 = parts.next().ok_or(TicketError::Invalid)?;

        let payload_bytes = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            payload_b64,
        )
        .map_err(|_| TicketError::Invalid)?;
        let sig_bytes = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            sig_b64,
        )
        .map_err(|_| TicketError::Invalid)?;

        let secret = resolve_secret(config).ok_or(TicketError::Invalid)?;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TicketError::Invalid)?;
        mac.update(payload_b64.as_bytes());
        let expected = mac.finalize().into_bytes();

        if expected.len() != sig_bytes.len() || expected.ct_eq(&sig_bytes).unwrap_u8() != 1 {
            return Err(TicketError::Invalid);
        }

        let claims: TicketClaims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TicketError::Invalid)?;

        if claims.sub.is_empty() || claims.sub.len() > MAX_SUB_LEN {
            return Err(TicketError::Invalid);
        }
        if claims.workspace_id.is_empty() || claims.workspace_id.len() > MAX_WORKSPACE_ID_LEN {
            return Err(TicketError::Invalid);
        }
        if claims.aud != EXPECTED_AUDIENCE {
            return Err(TicketError::Invalid);
        }
        if claims.jti.is_empty() {
            return Err(TicketError::Invalid);
        }
        if claims.exp <= now {
            return Err(TicketError::Expired);
        }

        if let Some(ws) = claimed_workspace {
            if !ws.is_empty() && ws != claims.workspace_id {
                return Err(TicketError::WorkspaceMismatch);
            }
        }
        if let Some(user) = claimed_user {
            if !user.is_empty() && user != claims.sub {
                return Err(TicketError::UserMismatch);
            }
        }

        self.consumed.check_and_record(
            &claims.jti,
            &claims.sub,
            &claims.workspace_id,
            claims.exp,
            now,
        )?;

        Ok(claims)
    }
}

impl Default for TicketVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Signs a ticket for tests. Production issuance lives in an external
/// service (spec §1) — this exists purely so this crate's tests can
/// construct valid tickets without a second codebase.
#[cfg(test)]
pub fn sign_for_test(claims: &TicketClaims, secret: &str) -> String {
    let payload = serde_json::to_vec(claims).unwrap();
    let payload_b64 =
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload_b64.as_bytes());
    let sig = mac.finalize().into_bytes();
    let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, sig);
    format!("{payload_b64}.{sig_b64}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_secret(secret_env_value: &str) -> AdmissionConfig {
        std::env::set_var("COLAB_TEST_SECRET", secret_env_value);
        AdmissionConfig {
            primary_secret_env: "COLAB_TEST_SECRET".into(),
            fallback_secret_env: "COLAB_TEST_SECRET_FALLBACK_UNUSED".into(),
            node_env: "test".into(),
        }
    }

    fn claims(sub: &str, ws: &str, jti: &str, exp: i64) -> TicketClaims {
        TicketClaims {
            sub: sub.into(),
            workspace_id: ws.into(),
            aud: EXPECTED_AUDIENCE.into(),
            jti: jti.into(),
            exp,
            username: None,
            role: None,
        }
    }

    #[test]
    fn valid_ticket_verifies() {
        let config = config_with_secret("shh");
        let c = claims("u1", "w1", "j1", 1_000_000);
        let token = sign_for_test(&c, "shh");
        let verifier = TicketVerifier::new();
        let result = verifier.verify(&token, &config, None, None, 500_000).unwrap();
        assert_eq!(result.sub, "u1");
    }

    #[test]
    fn expired_ticket_is_rejected() {
        let config = config_with_secret("shh2");
        let c = claims("u1", "w1", "j1", 100);
        let token = sign_for_test(&c, "shh2");
        let verifier = TicketVerifier::new();
        let err = verifier.verify(&token, &config, None, None, 200).unwrap_err();
        assert_eq!(err, TicketError::Expired);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let config = config_with_secret("shh3");
        let c = claims("u1", "w1", "j1", 1_000_000);
        let token = sign_for_test(&c, "wrong-secret");
        let verifier = TicketVerifier::new();
        let err = verifier.verify(&token, &config, None, None, 500_000).unwrap_err();
        assert_eq!(err, TicketError::Invalid);
    }

    #[test]
    fn same_identity_may_replay_before_expiry() {
        let config = config_with_secret("shh4");
        let c = claims("u1", "w1", "j1", 1_000_000);
        let token = sign_for_test(&c, "shh4");
        let verifier = TicketVerifier::new();
        verifier.verify(&token, &config, None, None, 500_000).unwrap();
        let second = verifier.verify(&token, &config, None, None, 500_001).unwrap();
        assert_eq!(second.sub, "u1");
    }

    #[test]
    fn different_identity_reusing_jti_is_replay() {
        let config = config_with_secret("shh5");
        let c1 = claims("u1", "w1", "j-shared", 1_000_000);
        let token1 = sign_for_test(&c1, "shh5");
        let verifier = TicketVerifier::new();
        verifier.verify(&token1, &config, None, None, 500_000).unwrap();

        let c2 = claims("u2", "w1", "j-shared", 1_000_000);
        let token2 = sign_for_test(&c2, "shh5");
        let err = verifier.verify(&token2, &config, None, None, 500_000).unwrap_err();
        assert_eq!(err, TicketError::Replay);
    }

    #[test]
    fn claimed_workspace_mismatch_is_rejected() {
        let config = config_with_secret("shh6");
        let c = claims("u1", "w1", "j1", 1_000_000);
        let token = sign_for_test(&c, "shh6");
        let verifier = TicketVerifier::new();
        let err = verifier
            .verify(&token, &config, Some("w2"), None, 500_000)
            .unwrap_err();
        assert_eq!(err, TicketError::WorkspaceMismatch);
    }

    #[test]
    fn pruning_drops_expired_entries() {
        let map = ConsumedTicketMap::new();
        map.check_and_record("j1", "u1", "w1", 100, 50).unwrap();
        assert_eq!(map.len(), 1);
        map.check_and_record("j2", "u2", "w1", 100, 200).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn missing_token_is_rejected() {
        let config = config_with_secret("shh7");
        let verifier = TicketVerifier::new();
        let err = verifier.verify("", &config, None, None, 0).unwrap_err();
        assert_eq!(err, TicketError::Missing);
    }
}
