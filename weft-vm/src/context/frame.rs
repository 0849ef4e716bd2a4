use std::{collections::VecDeque, fmt::Debug, sync::Arc};

use arc_gc::{
    arc::{GCArc, GCArcWeak},
    traceable::GCTraceable,
};
use indexmap::IndexMap;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::types::{
    object::ObjectCell,
    value::{HeapValue, Value},
};

use super::{
    key::{CellKey, StorageKey},
    stack::AsyncContextState,
};

type CellTable = IndexMap<CellKey, HeapValue, FxBuildHasher>;

/// 根帧的 async id，同时也是“没有触发者”时报告的 trigger id。
pub const ROOT_ASYNC_ID: u64 = 0;

/// 上下文帧：某一时刻 continuation-local 存储的快照。
///
/// 帧只在构造时从来源帧复制一次存活的单元，之后不再持有父帧的引用，
/// 因此帧之间不会形成越来越长的反向链。构造完成后表只会被“清除失效键”这一种方式修改，
/// 这种修改对外不可见。
///
/// 帧对存入的对象只持有弱引用：挂在堆对象上的帧随宿主对象一起被 GC 遍历，
/// 被宿主代码持有的帧则通过 [`PinnedFrame`] 把这些对象固定为根。
pub struct ContextFrame {
    id: u64,
    parent_id: Option<u64>,
    cells: RwLock<CellTable>,
}

impl ContextFrame {
    pub(crate) fn root() -> Self {
        ContextFrame {
            id: ROOT_ASYNC_ID,
            parent_id: None,
            cells: RwLock::new(CellTable::default()),
        }
    }

    /// 创建一个新帧。
    ///
    /// `parent` 缺省时使用栈顶的当前帧。先清除来源帧里的失效单元，复制剩下的单元，
    /// 再把 `store`（如果有）写入新帧，已存在同一个键时替换它的值。
    pub fn create(
        state: &AsyncContextState,
        parent: Option<&Arc<ContextFrame>>,
        store: Option<(&Arc<StorageKey>, Value)>,
    ) -> Arc<ContextFrame> {
        let source = match parent {
            Some(parent) => parent.clone(),
            None => state.current(),
        };
        let mut cells = source.live_cells();
        if let Some((key, value)) = store {
            debug_assert!(!key.is_dead(), "storing a value under a dead key");
            cells.insert(CellKey(key.clone()), value.downgrade());
        }
        let frame = Arc::new(ContextFrame {
            id: state.next_async_id(),
            parent_id: Some(source.id),
            cells: RwLock::new(cells),
        });
        debug!(
            "async context frame #{} created from #{} ({} cells)",
            frame.id,
            source.id,
            frame.len()
        );
        state.register(&frame);
        frame
    }

    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    #[inline(always)]
    pub fn is_root(&self) -> bool {
        self.id == ROOT_ASYNC_ID
    }

    pub fn get(&self, key: &Arc<StorageKey>) -> Option<Value> {
        self.purge_dead_cells();
        self.cells
            .read()
            .get(&CellKey(key.clone()))
            .and_then(HeapValue::upgrade)
    }

    /// 存活单元的数量。
    pub fn len(&self) -> usize {
        self.purge_dead_cells();
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_cells(&self) -> CellTable {
        self.purge_dead_cells();
        self.cells.read().clone()
    }

    /// 帧里所有仍然存活的对象的强引用。
    fn held_objects(&self) -> Vec<GCArc<ObjectCell>> {
        self.purge_dead_cells();
        self.cells
            .read()
            .values()
            .filter_map(HeapValue::upgrade_object)
            .collect()
    }

    fn purge_dead_cells(&self) {
        if !self.cells.read().keys().any(CellKey::is_dead) {
            return;
        }
        let mut cells = self.cells.write();
        let before = cells.len();
        cells.retain(|key, _| !key.is_dead());
        debug!(
            "async context frame #{} purged {} dead cells",
            self.id,
            before - cells.len()
        );
    }

    pub fn format_context(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "parent_id": self.parent_id,
            "cells": self.cells.read().len(),
        })
    }
}

impl GCTraceable<ObjectCell> for ContextFrame {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        for value in self.cells.read().values() {
            value.collect(queue);
        }
    }
}

/// 被宿主代码持有（作用域栈、资源对象）的帧，同时持有帧内对象的强引用，使它们成为 GC 根。
pub struct PinnedFrame {
    frame: Arc<ContextFrame>,
    _arcs: Vec<GCArc<ObjectCell>>,
}

impl PinnedFrame {
    pub fn new(frame: Arc<ContextFrame>) -> Self {
        let arcs = frame.held_objects();
        PinnedFrame { frame, _arcs: arcs }
    }

    #[inline(always)]
    pub fn frame(&self) -> &Arc<ContextFrame> {
        &self.frame
    }
}

impl Debug for PinnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pinned{:?}", self.frame)
    }
}

impl Debug for ContextFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ContextFrame(#{}, parent: {:?}, cells: {})",
            self.id,
            self.parent_id,
            self.cells.read().len()
        )
    }
}
