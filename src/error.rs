use thiserror::Error;

/// 面向用户的通用提示：读文件失败
pub const INPUT_FAILURE_MESSAGE: &str = "Failed to read file.";

/// 面向用户的通用提示：推理服务失败或返回了不可用的载荷。
/// 具体原因只进日志，不返回给用户。
pub const SERVICE_FAILURE_MESSAGE: &str = "Neural Audit failed. Please provide a high-fidelity file.";

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// 一次分析请求可能出现的错误
///
/// 两类错误都只终止当前这一次操作，进程保持可用：
/// - `Input`: 文件读不出来 / 不能编码，请求根本没有发出去，重新选择文件即可。
/// - `Service`: 调用失败或返回的 JSON 不合格，同一文件重试即可。
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("input error: {reason}")]
    Input { reason: String },

    #[error("reasoning service error: {cause}")]
    Service { cause: ServiceFailure },
}

/// Service 错误的内部细分，仅用于诊断日志
#[derive(Debug, Error)]
pub enum ServiceFailure {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected status {status}")]
    Status { status: u16 },

    #[error("response carried no candidate text")]
    EmptyResponse,

    #[error("response is not valid verdict JSON: {0}")]
    Malformed(String),

    #[error("verdict failed validation: {0}")]
    Invalid(String),
}

impl AnalysisError {
    pub fn input(reason: impl Into<String>) -> Self {
        AnalysisError::Input {
            reason: reason.into(),
        }
    }

    pub fn service(cause: ServiceFailure) -> Self {
        AnalysisError::Service { cause }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, AnalysisError::Input { .. })
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AnalysisError::Service { .. })
    }

    /// 可以直接展示给用户的消息
    pub fn user_message(&self) -> &'static str {
        match self {
            AnalysisError::Input { .. } => INPUT_FAILURE_MESSAGE,
            AnalysisError::Service { .. } => SERVICE_FAILURE_MESSAGE,
        }
    }
}

impl From<ServiceFailure> for AnalysisError {
    fn from(cause: ServiceFailure) -> Self {
        AnalysisError::service(cause)
    }
}
