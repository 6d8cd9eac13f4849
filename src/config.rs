use anyhow::Context;
use std::env;

use crate::analysis::{DEFAULT_BASE_URL, DEFAULT_MODEL};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_api_key: String,
    /// 单个上传文件的上限 (字节)
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a number")?;

        let max_upload_mb: usize = env::var("MAX_UPLOAD_MB")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .context("MAX_UPLOAD_MB must be a number")?;

        // 没有 key 也允许启动：分析请求会被推理服务拒绝，按 Service 错误处理
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("API_KEY"))
            .unwrap_or_default();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            db_path: env::var("HISTORY_DB_PATH").unwrap_or_else(|_| "data/db/history_db".to_string()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            gemini_api_key,
            max_upload_bytes: upload_limit_bytes(max_upload_mb)?,
        })
    }
}

fn upload_limit_bytes(max_upload_mb: usize) -> anyhow::Result<usize> {
    max_upload_mb
        .checked_mul(1024 * 1024)
        .context("MAX_UPLOAD_MB too large")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_limit_is_megabytes() {
        assert_eq!(upload_limit_bytes(64).unwrap(), 64 * 1024 * 1024);
        assert_eq!(upload_limit_bytes(0).unwrap(), 0);
    }

    #[test]
    fn oversized_upload_limit_is_rejected() {
        let err = upload_limit_bytes(usize::MAX / 1024).unwrap_err();
        assert!(err.to_string().contains("MAX_UPLOAD_MB too large"));
    }
}
