use serde::Deserialize;

use crate::face::descriptor::DEFAULT_MATCH_THRESHOLD;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceConfig {
    /// Maximum accepted distance between a submitted and a stored descriptor.
    pub match_threshold: f32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub face: FaceConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "mediassist".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "mediassist-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };
        let face = match std::env::var("FACE_MATCH_THRESHOLD") {
            Ok(raw) => FaceConfig {
                match_threshold: parse_threshold(&raw)?,
            },
            Err(_) => FaceConfig::default(),
        };
        Ok(Self {
            database_url,
            jwt,
            face,
        })
    }
}

fn parse_threshold(raw: &str) -> anyhow::Result<f32> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("FACE_MATCH_THRESHOLD {raw:?}: {e}"))?;
    if !value.is_finite() || value <= 0.0 {
        anyhow::bail!("FACE_MATCH_THRESHOLD must be a positive finite number, got {value}");
    }
    Ok(value)
}
