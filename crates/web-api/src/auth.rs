//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证，以及把请求解析为已认证用户的提取器

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::{UserId, UserProfile};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = OffsetDateTime::now_utc() + Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user_id.value(),
            exp: exp.unix_timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::unauthorized(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        let claims = self.verify_token(token)?;
        Ok(UserId::new(claims.user_id))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// 已认证的调用者
///
/// 优先读取 `Authorization: Bearer`，浏览器 WebSocket 无法设置请求头，
/// 所以也接受 `?token=` 查询参数。
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserProfile);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = if parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            state.jwt_service.extract_user_from_headers(&parts.headers)?
        } else {
            let token = Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.token)
                .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;
            UserId::new(state.jwt_service.verify_token(&token)?.user_id)
        };

        let user = state
            .users
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, user_id = %user_id, "查询用户失败");
                ApiError::internal_server_error("Failed to resolve user")
            })?
            .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

        Ok(AuthUser(user))
    }
}
