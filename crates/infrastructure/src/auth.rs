//! JWT 用户目录
//!
//! 凭证是 HS256 签名的 JWT，载荷中的 `user_id` 即连接绑定的用户。

use application::{DirectoryError, UserDirectory};
use async_trait::async_trait;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

#[derive(Clone)]
pub struct JwtUserDirectory {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtUserDirectory {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 为用户签发令牌
    pub fn issue_token(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        self.encode(&Claims {
            user_id: user_id.into(),
            exp: exp.timestamp(),
        })
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), claims, &self.encoding_key)
    }

    /// 验证并解析令牌
    pub fn verify(&self, token: &str) -> Result<Claims, DirectoryError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => DirectoryError::Expired,
                _ => DirectoryError::InvalidCredential(err.to_string()),
            })
    }
}

#[async_trait]
impl UserDirectory for JwtUserDirectory {
    async fn authenticate(&self, credential: String) -> Result<UserId, DirectoryError> {
        let claims = self.verify(&credential)?;
        debug!(user_id = %claims.user_id, "令牌验证通过");
        Ok(UserId::from(claims.user_id))
    }
}
