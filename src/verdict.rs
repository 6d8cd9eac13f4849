use serde::{Deserialize, Serialize}; // 引入序列化库，让结构体能转成 JSON 存储/传输
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AnalysisError, ServiceFailure};
use crate::media::MediaKind;

/// 方法论拆分后最多展示的要点数
pub const MAX_METHODOLOGY_POINTS: usize = 5;

/// 太短的片段 (例如 "e.g" 被句号切开后的残渣) 不算要点
const MIN_METHODOLOGY_POINT_LEN: usize = 15;

/// 判决标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
    Suspicious,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Real => "REAL",
            Label::Fake => "FAKE",
            Label::Suspicious => "SUSPICIOUS",
        };
        f.write_str(s)
    }
}

// Derive 宏：自动生成 Debug 打印、序列化、反序列化、克隆的能力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisVerdict {
    // === 第一层：结论 (Verdict) ===

    // 置信度
    // 类型：f64，取值 0 到 100 (闭区间)。注意不是 0.0~1.0。
    pub confidence: f64,

    // 判决结果
    // 和 confidence 必须同时存在。缺了 label 的响应视为请求失败，而不是“未知”判决。
    pub label: Label,

    // === 第二层：证据 (Reasoning) ===

    // 法证标记
    // 例如 "waxy skin texture"、"reflection mismatch"，可以为空。
    pub findings: Vec<String>,

    // 技术性总结 (自由文本)
    pub summary: String,

    // 检测方法论 (自由文本)
    // 展示时会被拆成若干要点，见 `methodology_points`。
    pub detection_methodology: String,

    // === 第三层：附加信息 (Metadata) ===

    // 不做约束，仅供参考。推理服务不返回时序列化结果里也不出现该字段。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl AnalysisVerdict {
    /// 把推理服务返回的原始文本解析成判决
    ///
    /// 这是一个“失败即关闭”的类型化解析：
    /// - 空文本、非法 JSON、缺字段、字段类型不对 -> `ServiceFailure::Malformed`
    /// - confidence 不是有限数或超出 0..=100 -> `ServiceFailure::Invalid`
    ///
    /// 绝不会构造出半成品判决。
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        let verdict: AnalysisVerdict = serde_json::from_str(raw)
            .map_err(|e| ServiceFailure::Malformed(e.to_string()))?;
        verdict.validate()?;
        Ok(verdict)
    }

    fn validate(&self) -> Result<(), ServiceFailure> {
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(ServiceFailure::Invalid(format!(
                "confidence {} outside 0..=100",
                self.confidence
            )));
        }
        Ok(())
    }

    /// 把方法论文本拆成展示用的要点
    ///
    /// 按 `.` 和换行切分，去掉首尾空白，丢弃不超过 15 个字符的碎片，
    /// 最多保留前 5 条，最后去掉列表前缀 (`* `、`- `、`1. `)。
    pub fn methodology_points(&self) -> Vec<String> {
        self.detection_methodology
            .split(['.', '\n'])
            .map(str::trim)
            .filter(|p| p.chars().count() > MIN_METHODOLOGY_POINT_LEN)
            .take(MAX_METHODOLOGY_POINTS)
            .map(|p| strip_list_marker(p).to_string())
            .collect()
    }
}

fn strip_list_marker(point: &str) -> &str {
    if let Some(rest) = point.strip_prefix(['*', '-']) {
        return rest.trim_start();
    }

    // "3. xxx" 形式的编号前缀
    let digits = point.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = point[digits..].strip_prefix('.') {
            return rest.trim_start();
        }
    }
    point
}

/// 一条历史记录
///
/// 只在分析成功后创建一次，之后永不修改；
/// 只会因为整体清空或超出容量被挤出而消失。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,

    // 毫秒级 Unix 时间戳
    pub timestamp: i64,

    #[serde(rename = "type")]
    pub kind: MediaKind,

    pub file_name: String,

    pub result: AnalysisVerdict,
}

impl HistoryEntry {
    pub fn new(kind: MediaKind, file_name: impl Into<String>, result: AnalysisVerdict) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
            file_name: file_name.into(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_RESPONSE: &str = r#"{
        "confidence": 92,
        "label": "FAKE",
        "findings": ["waxy skin texture", "reflection mismatch"],
        "summary": "Diffusion smoothing across the face.",
        "detectionMethodology": "Spectral analysis. Texture analysis. Lighting analysis."
    }"#;

    #[test]
    fn parses_verdict_fields_verbatim() {
        let verdict = AnalysisVerdict::parse(FAKE_RESPONSE).unwrap();
        assert_eq!(verdict.label, Label::Fake);
        assert_eq!(verdict.confidence, 92.0);
        assert_eq!(
            verdict.findings,
            vec!["waxy skin texture".to_string(), "reflection mismatch".to_string()]
        );
        assert_eq!(verdict.summary, "Diffusion smoothing across the face.");
        assert_eq!(
            verdict.detection_methodology,
            "Spectral analysis. Texture analysis. Lighting analysis."
        );
        assert!(verdict.metadata.is_none());
    }

    #[test]
    fn keeps_optional_metadata() {
        let raw = r#"{"confidence":10,"label":"REAL","findings":[],"summary":"s",
            "detectionMethodology":"m","metadata":{"codec":"h264"}}"#;
        let verdict = AnalysisVerdict::parse(raw).unwrap();
        let metadata = verdict.metadata.unwrap();
        assert_eq!(metadata.get("codec").map(String::as_str), Some("h264"));
    }

    #[test]
    fn each_missing_required_field_fails() {
        let full: serde_json::Value = serde_json::from_str(FAKE_RESPONSE).unwrap();
        for field in ["confidence", "label", "findings", "summary", "detectionMethodology"] {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(field);
            let err = AnalysisVerdict::parse(&partial.to_string()).unwrap_err();
            assert!(err.is_service(), "missing {} should be a service error", field);
        }
    }

    #[test]
    fn rejects_non_json_and_empty_object() {
        assert!(AnalysisVerdict::parse("the image looks fake").unwrap_err().is_service());
        assert!(AnalysisVerdict::parse("").unwrap_err().is_service());
        assert!(AnalysisVerdict::parse("{}").unwrap_err().is_service());
    }

    #[test]
    fn rejects_mistyped_and_unknown_label() {
        let mistyped = r#"{"confidence":"high","label":"FAKE","findings":[],"summary":"","detectionMethodology":""}"#;
        assert!(AnalysisVerdict::parse(mistyped).is_err());

        let unknown = r#"{"confidence":50,"label":"MAYBE","findings":[],"summary":"","detectionMethodology":""}"#;
        assert!(AnalysisVerdict::parse(unknown).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        for confidence in ["-1", "100.5", "250"] {
            let raw = format!(
                r#"{{"confidence":{},"label":"REAL","findings":[],"summary":"","detectionMethodology":""}}"#,
                confidence
            );
            assert!(AnalysisVerdict::parse(&raw).is_err(), "confidence {}", confidence);
        }

        let edge = r#"{"confidence":100,"label":"REAL","findings":[],"summary":"","detectionMethodology":""}"#;
        assert!(AnalysisVerdict::parse(edge).is_ok());
    }

    #[test]
    fn methodology_points_are_segmented_and_capped() {
        let mut verdict = AnalysisVerdict::parse(FAKE_RESPONSE).unwrap();
        verdict.detection_methodology = "Spectral noise analysis of the sensor grain.\n\
            - Lighting and reflection consistency check\n\
            Short one. \
            Background geometry scan for warped lines. \
            Compression block grid inspection. \
            Skin texture smoothness evaluation. \
            Frequency domain residual comparison."
            .to_string();

        let points = verdict.methodology_points();
        assert_eq!(points.len(), MAX_METHODOLOGY_POINTS);
        assert_eq!(points[0], "Spectral noise analysis of the sensor grain");
        assert_eq!(points[1], "Lighting and reflection consistency check");
        assert_eq!(points[2], "Background geometry scan for warped lines");
        assert!(!points.iter().any(|p| p.contains("Short one")));
    }

    #[test]
    fn short_methodology_yields_no_points() {
        let verdict = AnalysisVerdict::parse(FAKE_RESPONSE).unwrap();
        // "Spectral analysis" 只有 17 个字符，"Texture analysis" 16 个，"Lighting analysis" 17 个
        assert_eq!(
            verdict.methodology_points(),
            vec!["Spectral analysis", "Texture analysis", "Lighting analysis"]
        );
    }

    #[test]
    fn history_entry_uses_persisted_field_names() {
        let verdict = AnalysisVerdict::parse(FAKE_RESPONSE).unwrap();
        let entry = HistoryEntry::new(MediaKind::Image, "face.jpg", verdict);
        let json = serde_json::to_value(&entry).unwrap();

        for field in ["id", "timestamp", "type", "fileName", "result"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["type"], "image");
        assert_eq!(json["result"]["label"], "FAKE");
        assert!(json["result"].get("detectionMethodology").is_some());
        assert!(entry.timestamp > 0);
    }
}
