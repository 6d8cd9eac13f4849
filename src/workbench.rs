//! 工作台：每种媒体类别一个“选中文件 + 进行中分析”的槽位
//!
//! 分析调用期间调用方可以换文件或丢弃文件，而已经发出去的请求没法撤回。
//! 这里用代数 (generation) 计数器解决“迟到响应覆盖新状态”的问题：
//! 每次选择 / 丢弃文件都会让代数加一，请求完成时拿着发起时的代数回来核对，
//! 对不上就静默丢弃结果。

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::fingerprint;
use crate::media::{MediaFile, MediaKind};
use crate::verdict::AnalysisVerdict;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkbenchError {
    #[error("no file selected for {kind}")]
    NoSelection { kind: MediaKind },

    #[error("an analysis is already running for the selected {kind}")]
    Busy { kind: MediaKind },

    #[error("selection changed while the analysis was running")]
    Stale,
}

/// 发起分析时领取的凭证，完成时交回核对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub kind: MediaKind,
    generation: u64,
}

/// 选择文件后的回执
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionReceipt {
    pub kind: MediaKind,
    pub file_name: String,
    pub mime_type: String,
    pub size: usize,
    pub sha256: String,
}

/// 某个槽位当前状态的快照 (对外展示用)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub kind: MediaKind,
    pub selection: Option<SelectionReceipt>,
    pub analyzing: bool,
    pub result: Option<AnalysisVerdict>,
}

/// 校验过、算好指纹的一份选择
///
/// 只能通过 `Selection::prepare` 得到，所以装进工作台的文件一定已经过了 accept 过滤器。
#[derive(Debug, Clone)]
pub struct Selection {
    file: Arc<MediaFile>,
    receipt: SelectionReceipt,
}

impl Selection {
    /// 充当文件选择控件：声明的 MIME 必须落在该类别的 accept 过滤器内，文件不能为空。
    ///
    /// 整个文件要算一遍 SHA-256，属于 CPU 密集型操作：
    /// 调用方应放在 `spawn_blocking` 里执行，并且不要持有工作台的锁。
    pub fn prepare(kind: MediaKind, file: MediaFile) -> Result<Self, AnalysisError> {
        if !kind.accepts(&file.mime_type) {
            return Err(AnalysisError::input(format!(
                "{} is not accepted by {}",
                file.mime_type,
                kind.accept_filter()
            )));
        }
        if file.is_empty() {
            return Err(AnalysisError::input(format!("{} is empty", file.file_name)));
        }

        let receipt = SelectionReceipt {
            kind,
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.len(),
            sha256: fingerprint::sha256_hex(&file.bytes),
        };

        Ok(Self {
            file: Arc::new(file),
            receipt,
        })
    }

    pub fn file(&self) -> Arc<MediaFile> {
        Arc::clone(&self.file)
    }

    pub fn receipt(&self) -> &SelectionReceipt {
        &self.receipt
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    selection: Option<Selection>,
    // 正在分析的那一代；只有等于当前代数时才算“分析中”
    in_flight: Option<u64>,
    result: Option<AnalysisVerdict>,
}

impl Slot {
    fn analyzing(&self) -> bool {
        self.in_flight == Some(self.generation)
    }
}

#[derive(Default)]
pub struct Workbench {
    slots: HashMap<MediaKind, Slot>,
}

impl Workbench {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Slot {
        self.slots.entry(kind).or_default()
    }

    /// 选择文件
    ///
    /// 只安装已经准备好的 `Selection`，这里不做任何哈希计算。
    /// 新选择会清掉上一次的结果，并让任何进行中的请求过期。
    pub fn select(&mut self, selection: Selection) -> SelectionReceipt {
        let kind = selection.receipt.kind;
        let receipt = selection.receipt.clone();

        let slot = self.slot_mut(kind);
        slot.generation += 1;
        slot.selection = Some(selection);
        slot.result = None;

        info!(kind = %kind, sha256 = %receipt.sha256, size = receipt.size, "📥 已选择文件");
        receipt
    }

    /// 丢弃当前选择；返回之前是否真的有选择
    pub fn discard(&mut self, kind: MediaKind) -> bool {
        let slot = self.slot_mut(kind);
        slot.generation += 1;
        slot.result = None;
        let had_selection = slot.selection.take().is_some();
        debug!(kind = %kind, had_selection, "丢弃选择");
        had_selection
    }

    /// 发起分析：同一份选择同时只能有一个请求
    pub fn begin(&mut self, kind: MediaKind) -> Result<(Ticket, Selection), WorkbenchError> {
        let slot = self.slot_mut(kind);
        let selection = match &slot.selection {
            Some(selection) => selection.clone(),
            None => return Err(WorkbenchError::NoSelection { kind }),
        };
        if slot.analyzing() {
            return Err(WorkbenchError::Busy { kind });
        }

        slot.in_flight = Some(slot.generation);
        slot.result = None;
        Ok((
            Ticket {
                kind,
                generation: slot.generation,
            },
            selection,
        ))
    }

    /// 交回凭证
    ///
    /// 代数仍然匹配：结束“分析中”状态，保存结果 (失败时传 `None`)。
    /// 代数已经变了：返回 `Stale`，结果不做任何应用。
    pub fn finish(
        &mut self,
        ticket: Ticket,
        verdict: Option<AnalysisVerdict>,
    ) -> Result<(), WorkbenchError> {
        let slot = self.slot_mut(ticket.kind);
        if slot.in_flight == Some(ticket.generation) {
            slot.in_flight = None;
        }
        if slot.generation != ticket.generation {
            debug!(kind = %ticket.kind, "迟到的分析结果，已丢弃");
            return Err(WorkbenchError::Stale);
        }
        slot.result = verdict;
        Ok(())
    }

    pub fn view(&self, kind: MediaKind) -> SlotView {
        match self.slots.get(&kind) {
            Some(slot) => SlotView {
                kind,
                selection: slot.selection.as_ref().map(|s| s.receipt.clone()),
                analyzing: slot.analyzing(),
                result: slot.result.clone(),
            },
            None => SlotView {
                kind,
                selection: None,
                analyzing: false,
                result: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Label;

    fn png(name: &str) -> Selection {
        Selection::prepare(
            MediaKind::Image,
            MediaFile::new(name, "image/png", b"pixels".to_vec()),
        )
        .unwrap()
    }

    fn verdict() -> AnalysisVerdict {
        AnalysisVerdict {
            confidence: 88.0,
            label: Label::Suspicious,
            findings: Vec::new(),
            summary: "low resolution".to_string(),
            detection_methodology: "Block artifact survey.".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn prepare_rejects_mime_outside_accept_filter() {
        let file = MediaFile::new("a.png", "image/png", b"pixels".to_vec());
        let err = Selection::prepare(MediaKind::Audio, file).unwrap_err();
        assert!(err.is_input());

        let empty = MediaFile::new("b.png", "image/png", Vec::new());
        assert!(Selection::prepare(MediaKind::Image, empty).unwrap_err().is_input());
    }

    #[test]
    fn select_installs_the_prepared_digest() {
        let selection = png("a.png");
        let prepared = selection.receipt().clone();
        assert_eq!(prepared.sha256, fingerprint::sha256_hex(b"pixels"));

        let mut bench = Workbench::new();
        let receipt = bench.select(selection);
        assert_eq!(receipt.sha256, prepared.sha256);
        assert_eq!(receipt.size, 6);
        assert_eq!(
            bench.view(MediaKind::Image).selection.unwrap().sha256,
            prepared.sha256
        );
    }

    // 大文件在锁外算指纹时，其它类别的槽位照常可读
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn large_upload_is_fingerprinted_outside_the_lock() {
        let bench = Arc::new(tokio::sync::Mutex::new(Workbench::new()));
        bench.lock().await.select(png("a.png"));

        let gate = Arc::new(std::sync::Barrier::new(2));
        let preparing = {
            let gate = Arc::clone(&gate);
            tokio::task::spawn_blocking(move || {
                gate.wait();
                let clip = MediaFile::new("clip.mp4", "video/mp4", vec![7u8; 16 * 1024 * 1024]);
                Selection::prepare(MediaKind::Video, clip)
            })
        };

        // 指纹计算已经开始，锁却一直空闲
        tokio::task::block_in_place(|| {
            gate.wait();
        });
        let guard = bench.try_lock().expect("workbench lock is free while hashing");
        assert!(guard.view(MediaKind::Image).selection.is_some());
        drop(guard);

        let selection = preparing.await.unwrap().unwrap();
        let receipt = bench.lock().await.select(selection);
        assert_eq!(receipt.kind, MediaKind::Video);
        assert_eq!(receipt.sha256.len(), 64);
    }

    #[test]
    fn begin_without_selection_fails() {
        let mut bench = Workbench::new();
        assert_eq!(
            bench.begin(MediaKind::Image).unwrap_err(),
            WorkbenchError::NoSelection {
                kind: MediaKind::Image
            }
        );
    }

    #[test]
    fn second_begin_for_same_selection_is_busy() {
        let mut bench = Workbench::new();
        bench.select(png("a.png"));
        let (ticket, _) = bench.begin(MediaKind::Image).unwrap();
        assert!(bench.view(MediaKind::Image).analyzing);

        assert_eq!(
            bench.begin(MediaKind::Image).unwrap_err(),
            WorkbenchError::Busy {
                kind: MediaKind::Image
            }
        );

        bench.finish(ticket, Some(verdict())).unwrap();
        let view = bench.view(MediaKind::Image);
        assert!(!view.analyzing);
        assert_eq!(view.result.unwrap().label, Label::Suspicious);
    }

    #[test]
    fn discard_makes_in_flight_result_stale() {
        let mut bench = Workbench::new();
        bench.select(png("a.png"));
        let (ticket, _) = bench.begin(MediaKind::Image).unwrap();

        assert!(bench.discard(MediaKind::Image));
        assert_eq!(
            bench.finish(ticket, Some(verdict())).unwrap_err(),
            WorkbenchError::Stale
        );
        assert!(bench.view(MediaKind::Image).result.is_none());
    }

    #[test]
    fn reselect_allows_new_analysis_and_drops_old_result() {
        let mut bench = Workbench::new();
        bench.select(png("a.png"));
        let (old, _) = bench.begin(MediaKind::Image).unwrap();

        bench.select(png("b.png"));
        let (new, selection) = bench.begin(MediaKind::Image).unwrap();
        assert_eq!(selection.file().file_name, "b.png");

        assert_eq!(bench.finish(old, Some(verdict())), Err(WorkbenchError::Stale));
        assert!(bench.view(MediaKind::Image).analyzing);
        bench.finish(new, None).unwrap();
        assert!(!bench.view(MediaKind::Image).analyzing);
    }

    #[test]
    fn failed_analysis_can_be_retried() {
        let mut bench = Workbench::new();
        bench.select(png("a.png"));
        let (ticket, _) = bench.begin(MediaKind::Image).unwrap();
        bench.finish(ticket, None).unwrap();

        assert!(bench.begin(MediaKind::Image).is_ok());
    }

    #[test]
    fn slots_are_independent_per_kind() {
        let mut bench = Workbench::new();
        bench.select(png("a.png"));
        let clip = MediaFile::new("clip.mp4", "video/mp4", b"frames".to_vec());
        bench.select(Selection::prepare(MediaKind::Video, clip).unwrap());

        let (_image, _) = bench.begin(MediaKind::Image).unwrap();
        assert!(bench.begin(MediaKind::Video).is_ok());
    }
}
