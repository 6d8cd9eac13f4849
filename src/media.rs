use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::error::AnalysisError;

/// 媒体类别
///
/// 由调用方声明，不从文件内容推断。
/// 它决定两件事：可接受的文件过滤器 (accept filter)，以及发给推理服务的提示词措辞。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// 文件选择控件的 accept 过滤器，例如 `image/*`
    pub fn accept_filter(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/*",
            MediaKind::Video => "video/*",
            MediaKind::Audio => "audio/*",
        }
    }

    /// 判断声明的 MIME 类型是否落在本类别的 accept 过滤器内。
    /// 只比较顶级类型 (`image/png` -> `image`)，忽略大小写和参数。
    pub fn accepts(&self, mime_type: &str) -> bool {
        let top_level = mime_type
            .split(';')
            .next()
            .and_then(|essence| essence.trim().split('/').next())
            .unwrap_or_default();
        top_level.eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路径里出现了不认识的媒体类别
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown media kind: {0}")]
pub struct UnknownMediaKind(pub String);

// 和 serde 的小写表示保持一致：只认 `image` / `video` / `audio`
impl FromStr for MediaKind {
    type Err = UnknownMediaKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(UnknownMediaKind(other.to_string())),
        }
    }
}

/// 一份完整缓冲在内存里的上传文件
///
/// 推理服务只接受一个原子载荷，没有分片上传，所以文件必须先整体读入再编码。
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// 从磁盘读取文件，MIME 类型按扩展名猜测 (猜不到时退回 `application/octet-stream`)
    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let bytes = std::fs::read(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "读取媒体文件失败");
            AnalysisError::input(format!("cannot read {}", path.display()))
        })?;

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        Ok(Self::new(file_name, mime_type, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
