//! Bearer token decoding.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! read; signature trust belongs to the server that issued the token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::AuthError;

/// Decoded, read-only view of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: String,
    pub email: String,
    pub expiry: DateTime<Utc>,
}

/// Backends emit the user id as either a number or a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubjectId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(alias = "sub")]
    user_id: SubjectId,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    user_id: &'a str,
    email: &'a str,
    exp: i64,
}

impl Claims {
    /// True iff the expiry instant is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// True iff the token expires within `lead` of `now` (or already has).
    /// A horizon past the representable range counts as within.
    pub fn expires_within(&self, lead: Duration, now: DateTime<Utc>) -> bool {
        now.checked_add_signed(lead)
            .map_or(true, |horizon| self.expiry <= horizon)
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expiry - now
    }
}

/// Decode a bearer token into its claims.
pub fn decode(token: &str) -> Result<Claims, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let raw: RawClaims = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::MalformedToken(format!("invalid payload: {}", e)))?;

    let expiry = DateTime::from_timestamp(raw.exp, 0)
        .ok_or_else(|| AuthError::MalformedToken(format!("exp out of range: {}", raw.exp)))?;

    let subject_id = match raw.user_id {
        SubjectId::Number(n) => n.to_string(),
        SubjectId::Text(s) => s,
    };

    Ok(Claims {
        subject_id,
        email: raw.email.unwrap_or_default(),
        expiry,
    })
}

/// Build an unsigned (`alg: none`) token carrying `claims`.
/// Sub-second precision of `expiry` is dropped.
pub fn issue_unsigned(claims: &Claims) -> String {
    let header = json!({ "alg": "none", "typ": "JWT" });
    let payload = IssuedClaims {
        user_id: &claims.subject_id,
        email: &claims.email,
        exp: claims.expiry.timestamp(),
    };
    // serializing a json! value and a struct of &str/i64 cannot fail
    let header = serde_json::to_vec(&header).unwrap_or_default();
    let payload = serde_json::to_vec(&payload).unwrap_or_default();

    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(subject: &str, email: &str, exp: i64) -> Claims {
        Claims {
            subject_id: subject.to_string(),
            email: email.to_string(),
            expiry: DateTime::from_timestamp(exp, 0).expect("valid timestamp"),
        }
    }

    fn encode_payload(payload: serde_json::Value) -> String {
        format!(
            "eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn test_issue_then_decode_reproduces_claims() {
        for c in [
            claims("42", "user@example.com", 1_700_000_000),
            claims("b7d1c2e0-uuid", "", 0),
            claims("7", "ünïcode@example.com", 4_102_444_800),
        ] {
            assert_eq!(decode(&issue_unsigned(&c)).expect("decodes"), c);
        }
    }

    #[test]
    fn test_decode_numeric_user_id() {
        let token = encode_payload(json!({"user_id": 17, "email": "a@b.c", "exp": 1_700_000_000}));
        let decoded = decode(&token).expect("decodes");
        assert_eq!(decoded.subject_id, "17");
        assert_eq!(decoded.email, "a@b.c");
        assert_eq!(decoded.expiry.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_sub_alias_and_missing_email() {
        let token = encode_payload(json!({"sub": "abc", "exp": 10}));
        let decoded = decode(&token).expect("decodes");
        assert_eq!(decoded.subject_id, "abc");
        assert_eq!(decoded.email, "");
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE
            .encode(json!({"user_id": 1, "exp": 5}).to_string());
        let token = format!("h.{}.s", payload);
        assert!(decode(&token).is_ok());
    }

    #[test]
    fn test_decode_malformed() {
        let cases = [
            "".to_string(),
            "only.two".to_string(),
            "a.b.c.d".to_string(),
            "h.!!!not-base64!!!.s".to_string(),
            format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json")),
            encode_payload(json!({"email": "a@b.c", "exp": 10})),
            encode_payload(json!({"user_id": 1})),
            encode_payload(json!({"user_id": 1, "exp": "soon"})),
            encode_payload(json!({"user_id": 1, "exp": i64::MAX})),
        ];
        for token in cases {
            assert!(
                matches!(decode(&token), Err(AuthError::MalformedToken(_))),
                "expected MalformedToken for {token:?}"
            );
        }
    }

    #[test]
    fn test_is_expired_at_exact_expiry() {
        let c = claims("1", "", 1_000);
        let at = c.expiry;
        assert!(c.is_expired(at));
        assert!(c.is_expired(at + Duration::seconds(1)));
        assert!(!c.is_expired(at - Duration::seconds(1)));
    }

    #[test]
    fn test_expires_within_lead() {
        let c = claims("1", "", 1_000);
        let lead = Duration::seconds(60);
        assert!(!c.expires_within(lead, c.expiry - Duration::seconds(61)));
        assert!(c.expires_within(lead, c.expiry - Duration::seconds(60)));
        assert!(c.expires_within(Duration::zero(), c.expiry));
        assert_eq!(
            c.time_until_expiry(c.expiry - Duration::seconds(90)),
            Duration::seconds(90)
        );
    }

    #[test]
    fn test_expires_within_at_range_limits() {
        let earliest = Claims {
            subject_id: "1".to_string(),
            email: String::new(),
            expiry: DateTime::<Utc>::MIN_UTC,
        };
        let now = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        assert!(earliest.expires_within(Duration::seconds(60), now));
        assert!(earliest.is_expired(now));

        let c = claims("1", "", 1_000);
        assert!(c.expires_within(Duration::seconds(60), DateTime::<Utc>::MAX_UTC));
        assert!(!c.expires_within(Duration::seconds(60), DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn test_decode_extreme_expiry() {
        let token = encode_payload(json!({"user_id": 1, "exp": DateTime::<Utc>::MIN_UTC.timestamp()}));
        let decoded = decode(&token).expect("decodes");
        assert!(decoded.expires_within(Duration::seconds(60), Utc::now()));
    }
}
