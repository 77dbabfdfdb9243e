use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// The authenticated identity a credential decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

#[derive(Clone)]
pub struct AccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue(&self, username: &str) -> anyhow::Result<String> {
        self.issue_at(username, current_unix_timestamp()?)
    }

    fn issue_at(&self, username: &str, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: username.to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate(&self, token: &str) -> anyhow::Result<Identity> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        if claims.sub.trim().is_empty() {
            bail!("access token subject is empty");
        }

        Ok(Identity { username: claims.sub })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, AccessTokenService, ACCESS_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;

    const TEST_SECRET: &str = "quad_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_validates_tokens() {
        let service = AccessTokenService::new(TEST_SECRET).expect("service should initialize");

        let token = service.issue("amara").expect("token should be issued");
        let identity = service.validate(&token).expect("token should validate");

        assert_eq!(identity.username, "amara");
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(AccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = AccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue("amara").expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(service.validate(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = AccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service.issue_at("amara", issued_at).expect("token should be issued");

        assert!(service.validate(&token).is_err());
    }

    #[test]
    fn rejects_tokens_with_empty_subject() {
        #[derive(Serialize)]
        struct EmptySubjectClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let service = AccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let claims = EmptySubjectClaims { sub: "  ", iat: now, exp: now + ACCESS_TOKEN_TTL_SECONDS };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert!(service.validate(&token).is_err());
    }
}
