/// 세션 토큰 서명/검증 (HS256)
/// 로그인 서비스는 외부 협력자: 같은 서명 키를 공유한다고 가정
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 세션 토큰 클레임
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// 사용자 id
    pub sub: Uuid,
    /// 표시 이름
    pub username: String,
    /// 만료 시각 (Unix timestamp)
    pub exp: i64,
    /// 발급 시각 (Unix timestamp)
    pub iat: i64,
}

pub struct TokenSigner {
    signing_key: String,
}

impl TokenSigner {
    pub fn new(signing_key: String) -> Self {
        Self { signing_key }
    }

    /// 세션 토큰 발급
    pub fn issue(
        &self,
        user_id: Uuid,
        username: &str,
        ttl_seconds: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id,
            username: username.to_string(),
            exp: now + ttl_seconds,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.signing_key.as_bytes()),
        )
    }

    /// 토큰 검증 및 클레임 추출
    pub fn verify(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.signing_key.as_bytes()),
            &validation,
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test_signing_key_long_enough_for_hs256_use".to_string())
    }

    #[test]
    fn test_issue_and_verify() {
        let user_id = Uuid::new_v4();
        let token = signer().issue(user_id, "bidder1", 3600).unwrap();
        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "bidder1");
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(signer().verify("invalid.token.here").is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = signer().issue(Uuid::new_v4(), "bidder1", 3600).unwrap();
        let other = TokenSigner::new("a_completely_different_signing_key_value".to_string());
        assert!(other.verify(&token).is_err());
    }
}
