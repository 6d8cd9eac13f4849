//! 分析请求组件 (Analysis Request Component)
//!
//! **职责**: 把一份媒体文件翻译成一次推理服务调用，再把响应翻译回判决。
//!
//! 它是一个纯粹的“请求/响应翻译器”：
//! - 不缓存、不重试、不流式消费；
//! - 不写历史账本 (由调用方在成功后交给 `HistoryLedger`)；
//! - 唯一的副作用就是那一次出站网络调用。
//!
//! 流程:
//! 1. **编码**: 二进制载荷整体转成 base64，必须在发请求前完成。
//! 2. **组包**: 内联数据 + 固定的法证系统指令 + 要求“只返回 JSON”的响应 schema。
//! 3. **提交**: 单次非流式调用，调用方挂起直到成功或失败。
//! 4. **校验**: 类型化解析，缺字段 / 非 JSON / 空响应一律视为失败。

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{AnalysisError, AnalysisResult, ServiceFailure};
use crate::media::{MediaFile, MediaKind};
use crate::verdict::AnalysisVerdict;

pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// 固定的系统指令：区分“真实拍摄的痕迹”和“生成模型的痕迹”
pub const SYSTEM_INSTRUCTION: &str = "\
You are a Forensic Investigator trained in Neural Media Authenticity.
Your mission is to find PROOF of human recording OR proof of synthetic generation.

KEY TRAINING DATA:
1. REAL MEDIA: Often contains sensor noise (random grain), JPEG compression artifacts (blocks), and motion blur. THESE DO NOT MEAN IT IS FAKE. In fact, a lack of sensor noise is often suspicious.
2. FAKE MEDIA: Look for 'Diffusion Smoothing' (skin looks like wax), 'Spectral Inconsistency' (reflections don't match light sources), and 'Neural Hallucinations' (warped lines in backgrounds).

VERDICT LOGIC:
- If you see clear camera noise and organic imperfections: REAL.
- If you see repetitive AI patterns or unnatural smoothing: FAKE.
- If media is too low quality to tell: SUSPICIOUS.

BE OBJECTIVE. Do not label things as FAKE just because they look high quality.";

/// 按媒体类别生成的用户提示词
pub fn audit_prompt(kind: MediaKind) -> String {
    format!(
        "Conduct a technical audit of this {}.\n\
         Search for neural signatures vs camera noise.\n\
         Output ONLY a valid JSON object matching the provided schema.",
        kind.as_str().to_uppercase()
    )
}

/// 声明给推理服务的响应 schema，五个字段全部必填
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "confidence": { "type": "NUMBER", "description": "Confidence score 0-100" },
            "label": { "type": "STRING", "description": "REAL, FAKE, or SUSPICIOUS" },
            "findings": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "Specific forensic markers found"
            },
            "summary": { "type": "STRING", "description": "Technical summary of analysis" },
            "detectionMethodology": {
                "type": "STRING",
                "description": "Methodologies applied (e.g. Spectral Noise Analysis)"
            }
        },
        "required": ["confidence", "label", "findings", "summary", "detectionMethodology"]
    })
}

/// 已编码、可以直接发出的分析请求
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub kind: MediaKind,
    pub mime_type: String,
    pub data_base64: String,
}

impl AnalysisRequest {
    /// `generateContent` 的请求体
    pub fn to_body(&self) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "inlineData": { "mimeType": self.mime_type, "data": self.data_base64 } },
                    { "text": audit_prompt(self.kind) }
                ]
            }],
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema()
            }
        })
    }
}

/// 外部推理服务的抽象
///
/// 成功时返回模型输出的原始文本 (期望是 JSON)，由 `analyze` 负责校验。
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(&self, request: &AnalysisRequest) -> Result<String, ServiceFailure>;
}

/// Gemini `generateContent` 客户端
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish()
    }
}

impl GeminiClient {
    /// 不设置超时：调用方一直等到服务返回或连接失败
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(format!("faketrace-core/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

// 只取需要的字段，其余忽略
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// 第一个候选的全部文本片段拼接
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn generate(&self, request: &AnalysisRequest) -> Result<String, ServiceFailure> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "提交 generateContent 请求");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request.to_body())
            .send()
            .await
            .map_err(|e| ServiceFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // 响应体里可能有诊断信息，只进日志
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "推理服务返回非 2xx");
            return Err(ServiceFailure::Status {
                status: status.as_u16(),
            });
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceFailure::Malformed(e.to_string()))?;

        if let Some(reason) = payload
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            warn!(block_reason = %reason, "推理服务拦截了本次请求");
        }

        Ok(payload.text())
    }
}

/// 把二进制载荷转成 base64 文本
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// 核心功能：分析一份媒体文件
///
/// **输入**: 完整缓冲的文件 + 调用方声明的媒体类别
/// **输出**: 完整的 `AnalysisVerdict`，或者可区分的 Input / Service 错误
pub async fn analyze(
    service: &dyn ReasoningService,
    file: Arc<MediaFile>,
    kind: MediaKind,
) -> AnalysisResult<AnalysisVerdict> {
    if file.is_empty() {
        return Err(AnalysisError::input(format!("{} is empty", file.file_name)));
    }

    // 文件指纹由调用方的 span 带上
    info!(kind = %kind, mime = %file.mime_type, bytes = file.len(), "🔬 开始法证分析");

    // 1. 编码 (CPU 密集型操作，移至 spawn_blocking，避免卡住运行时)
    let encoded = {
        let file = Arc::clone(&file);
        tokio::task::spawn_blocking(move || encode_payload(&file.bytes))
            .await
            .map_err(|e| AnalysisError::input(format!("encoding task failed: {}", e)))?
    };

    // 2. 组包
    let request = AnalysisRequest {
        kind,
        mime_type: file.mime_type.clone(),
        data_base64: encoded,
    };

    // 3. 提交 & 4. 校验
    let verdict = service
        .generate(&request)
        .await
        .and_then(|raw| {
            if raw.trim().is_empty() {
                Err(ServiceFailure::EmptyResponse)
            } else {
                Ok(raw)
            }
        })
        .map_err(AnalysisError::service)
        .and_then(|raw| AnalysisVerdict::parse(&raw));

    match verdict {
        Ok(verdict) => {
            info!(
                label = %verdict.label,
                confidence = verdict.confidence,
                findings = verdict.findings.len(),
                "✅ 分析完成"
            );
            Ok(verdict)
        }
        Err(e) => {
            error!(error = %e, "Forensic Engine Error");
            Err(e)
        }
    }
}
