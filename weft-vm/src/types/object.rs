use std::{collections::VecDeque, fmt::Debug, sync::Arc};

use arc_gc::{arc::GCArcWeak, traceable::GCTraceable};
use parking_lot::RwLock;

use crate::context::frame::ContextFrame;

use super::{function::NativeFunction, promise::PromiseData};

/// 堆对象的种类。
pub enum ObjectKind {
    Ordinary,
    Function(NativeFunction),
    Promise(PromiseData),
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Promise(_) => "Promise",
        }
    }
}

impl GCTraceable<ObjectCell> for ObjectKind {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        match self {
            ObjectKind::Ordinary => {}
            ObjectKind::Function(function) => function.collect(queue),
            ObjectKind::Promise(data) => data.collect(queue),
        }
    }
}

/// GC 堆上的对象单元。
///
/// 除了对象本身的数据，每个单元还带一个脚本不可见的隐藏槽位，用于把对象与某个
/// [`ContextFrame`] 关联起来（相当于引擎提供的 private symbol）。
pub struct ObjectCell {
    id: u64,
    kind: RwLock<ObjectKind>,
    context: RwLock<Option<Arc<ContextFrame>>>,
}

impl ObjectCell {
    pub(crate) fn new(id: u64, kind: ObjectKind) -> Self {
        ObjectCell {
            id,
            kind: RwLock::new(kind),
            context: RwLock::new(None),
        }
    }

    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn with_kind<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&ObjectKind) -> T,
    {
        f(&*self.kind.read())
    }

    #[inline(always)]
    pub fn with_kind_mut<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut ObjectKind) -> T,
    {
        f(&mut *self.kind.write())
    }

    pub fn context_frame(&self) -> Option<Arc<ContextFrame>> {
        self.context.read().clone()
    }

    pub fn has_context_frame(&self) -> bool {
        self.context.read().is_some()
    }

    pub fn attach_context_frame(&self, frame: Arc<ContextFrame>) -> bool {
        let mut slot = self.context.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(frame);
        true
    }

    pub fn detach_context_frame(&self) -> Option<Arc<ContextFrame>> {
        self.context.write().take()
    }
}

impl GCTraceable<ObjectCell> for ObjectCell {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        self.kind.read().collect(queue);
        if let Some(frame) = self.context.read().as_ref() {
            frame.collect(queue);
        }
    }
}

impl Debug for ObjectCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不能在这里打印 kind 的内容，promise 可能引用自身
        match self.kind.try_read() {
            Some(kind) => write!(f, "[{} #{}]", kind.name(), self.id),
            None => write!(f, "[<locked> #{}]", self.id),
        }
    }
}
