use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::verdict::HistoryEntry;

/// 账本容量：最多保留最近 20 条
pub const HISTORY_CAPACITY: usize = 20;

/// 快照在 KV 库里的键名
pub const HISTORY_KEY: &str = "faketrace_history";

/// 模块：历史账本 (History Ledger)
///
/// **职责**: 负责“档案管理”。
/// 按时间倒序保存最近的分析结果，进程重启后依然可见，可以整体清空。
///
/// **存储模型**:
/// - 整个账本序列化成一个 JSON 数组，作为一个 blob 存在 sled 的 `faketrace_history` 键下。
/// - 数据量很小 (≤ 20 条)、写入很稀疏，所以每次变更都整体重写并 `flush`，不做批量写。
///
/// **不变式**:
/// - 顺序严格是插入顺序的逆序 (最新在前)，不按任何其他字段重新排序。
/// - 任何一次 `record` 之后长度 ≤ 20，超出部分从尾部 (最旧) 丢弃。
///
/// **并发**: 本身不加锁。多线程环境下由持有者用 `Mutex` 串行化 `record` / `clear`，
/// 否则“读-改-写”会交错，容量和顺序不变式都保不住。
pub struct HistoryLedger {
    /// 存储引擎
    ///
    /// `None` 表示 KV 库打不开，账本退化为纯内存模式，本次进程内依然可用。
    tree: Option<sled::Tree>,

    /// 内存中的权威副本 (最新在前)
    entries: Vec<HistoryEntry>,
}

/// 一次变更之后的持久化结果
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// 已写入并刷盘
    Persisted,
    /// 写入失败或没有后端；内存账本仍然是权威，只是这一版没有落盘
    MemoryOnly { reason: String },
}

impl Durability {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Durability::Persisted)
    }
}

#[derive(Debug, Error)]
enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl HistoryLedger {
    /// 打开 (或创建) 磁盘上的账本并加载快照
    ///
    /// 不会失败：库打不开就退化成纯内存账本，快照损坏就从空账本开始。
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match sled::open(path) {
            Ok(db) => match db.open_tree("history") {
                Ok(tree) => Self::load(tree),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "打开 history tree 失败，使用内存账本");
                    Self::in_memory()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "打开历史库失败，使用内存账本");
                Self::in_memory()
            }
        }
    }

    /// 不落盘的账本 (测试、或存储不可用时)
    pub fn in_memory() -> Self {
        Self {
            tree: None,
            entries: Vec::new(),
        }
    }

    /// 从已经打开的 tree 里读取快照
    ///
    /// 缺失 -> 空账本；损坏 -> 记录日志后空账本。永远不会返回致命错误。
    pub fn load(tree: sled::Tree) -> Self {
        let entries = match Self::read_snapshot(&tree) {
            Ok(Some(mut entries)) => {
                // 旧快照可能是别的版本写的，这里顺手保证容量不变式
                entries.truncate(HISTORY_CAPACITY);
                info!(entries = entries.len(), "📚 历史账本加载完成");
                entries
            }
            Ok(None) => {
                debug!("历史快照不存在，从空账本开始");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "历史快照无法解析，从空账本开始");
                Vec::new()
            }
        };

        Self {
            tree: Some(tree),
            entries,
        }
    }

    fn read_snapshot(tree: &sled::Tree) -> Result<Option<Vec<HistoryEntry>>, LedgerError> {
        match tree.get(HISTORY_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 当前全部记录 (最新在前)
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 核心功能：记录一次成功的分析
    ///
    /// **实现流程**:
    /// 1. **置顶**: 新记录插到最前面。
    /// 2. **淘汰**: 超过 20 条时从尾部截断，被挤掉的是最旧的。
    /// 3. **落盘**: 整个序列重写一次。
    pub fn record(&mut self, entry: HistoryEntry) -> Durability {
        debug!(id = %entry.id, kind = %entry.kind, "写入历史记录");
        self.entries.insert(0, entry);
        if self.entries.len() > HISTORY_CAPACITY {
            let evicted = self.entries.len() - HISTORY_CAPACITY;
            self.entries.truncate(HISTORY_CAPACITY);
            debug!(evicted, "超出容量，淘汰最旧记录");
        }
        self.persist()
    }

    /// 清空账本并删除快照
    ///
    /// 幂等：清空一个空账本也是成功的。不可撤销，调用前需要用户显式确认。
    pub fn clear(&mut self) -> Durability {
        self.entries.clear();

        let Some(tree) = &self.tree else {
            return Durability::MemoryOnly {
                reason: "no storage backend".to_string(),
            };
        };

        let result = tree
            .remove(HISTORY_KEY)
            .and_then(|_| tree.flush())
            .map_err(LedgerError::from);
        Self::outcome(result.map(|_| ()))
    }

    fn persist(&self) -> Durability {
        let Some(tree) = &self.tree else {
            return Durability::MemoryOnly {
                reason: "no storage backend".to_string(),
            };
        };

        Self::outcome(Self::write_snapshot(tree, &self.entries))
    }

    fn write_snapshot(tree: &sled::Tree, entries: &[HistoryEntry]) -> Result<(), LedgerError> {
        let payload = serde_json::to_vec(entries)?;
        tree.insert(HISTORY_KEY, payload)?;
        tree.flush()?;
        Ok(())
    }

    fn outcome(result: Result<(), LedgerError>) -> Durability {
        match result {
            Ok(()) => Durability::Persisted,
            Err(e) => {
                warn!(error = %e, "⚠️ 历史账本落盘失败，本次会话以内存账本为准");
                Durability::MemoryOnly {
                    reason: e.to_string(),
                }
            }
        }
    }
}
