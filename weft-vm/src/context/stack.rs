//! 作用域栈。
//!
//! 每个 isolate 持有一份 [`AsyncContextState`]，所有访问都经过 isolate，
//! 不存在进程级的全局状态。栈一旦被使用就永远非空，栈底是惰性创建的根帧。
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock, Weak,
};

use log::{error, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::frame::{ContextFrame, PinnedFrame, ROOT_ASYNC_ID};

const MIN_REGISTRY_WATERMARK: usize = 64;

/// 存活帧的登记表：async id -> 弱引用，用于按 trigger id 查找资源。
struct FrameRegistry {
    frames: FxHashMap<u64, Weak<ContextFrame>>,
    watermark: usize,
}

impl FrameRegistry {
    fn prune(&mut self) {
        self.frames.retain(|_, frame| frame.strong_count() > 0);
        self.watermark = std::cmp::max(MIN_REGISTRY_WATERMARK, self.frames.len() * 2);
    }
}

pub struct AsyncContextState {
    stack: Mutex<Vec<PinnedFrame>>,
    root: OnceLock<Arc<ContextFrame>>,
    next_id: AtomicU64,
    registry: Mutex<FrameRegistry>,
}

impl Default for AsyncContextState {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncContextState {
    pub fn new() -> Self {
        AsyncContextState {
            stack: Mutex::new(Vec::new()),
            root: OnceLock::new(),
            next_id: AtomicU64::new(ROOT_ASYNC_ID + 1),
            registry: Mutex::new(FrameRegistry {
                frames: FxHashMap::default(),
                watermark: MIN_REGISTRY_WATERMARK,
            }),
        }
    }

    /// 根帧，每个 isolate 只创建一次。
    pub fn root(&self) -> Arc<ContextFrame> {
        self.root
            .get_or_init(|| Arc::new(ContextFrame::root()))
            .clone()
    }

    pub fn current(&self) -> Arc<ContextFrame> {
        let mut stack = self.stack.lock();
        if let Some(top) = stack.last() {
            return top.frame().clone();
        }
        let root = self.root();
        stack.push(PinnedFrame::new(root.clone()));
        root
    }

    pub fn is_current(&self, frame: &Arc<ContextFrame>) -> bool {
        match self.stack.lock().last() {
            Some(top) => Arc::ptr_eq(top.frame(), frame),
            None => frame.is_root(),
        }
    }

    pub fn push(&self, frame: Arc<ContextFrame>) {
        let mut stack = self.stack.lock();
        if stack.is_empty() {
            stack.push(PinnedFrame::new(self.root()));
        }
        stack.push(PinnedFrame::new(frame));
    }

    /// 弹出栈顶帧。栈被弹到空说明 push/pop 配对已经损坏，这是不可恢复的错误。
    pub fn pop(&self) -> Arc<ContextFrame> {
        let mut stack = self.stack.lock();
        let popped = stack.pop();
        match popped {
            Some(entry) if !stack.is_empty() => entry.frame().clone(),
            _ => {
                drop(stack);
                error!("the async context stack was corrupted: popped past the root frame");
                panic!("CRITICAL: the async context stack was corrupted. This indicates unbalanced scope push/pop.")
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// 把栈恢复到 `depth` 层（至少保留根帧），丢弃上方所有帧。
    ///
    /// 只用于引擎终止时：终止期间钩子不再出栈，被打断的 job 留下的帧要由引擎清掉。
    pub fn unwind_to(&self, depth: usize) {
        let mut stack = self.stack.lock();
        let depth = depth.max(1);
        if stack.len() <= depth {
            return;
        }
        warn!(
            "discarding {} async context frames left by an interrupted continuation",
            stack.len() - depth
        );
        stack.truncate(depth);
    }

    pub fn next_async_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, frame: &Arc<ContextFrame>) {
        let mut registry = self.registry.lock();
        if registry.frames.len() >= registry.watermark {
            registry.prune();
        }
        registry.frames.insert(frame.id(), Arc::downgrade(frame));
    }

    /// 按 async id 查找仍然存活的帧。
    pub fn lookup(&self, id: u64) -> Option<Arc<ContextFrame>> {
        if id == ROOT_ASYNC_ID {
            return Some(self.root());
        }
        let mut registry = self.registry.lock();
        let frame = registry.frames.get(&id)?.upgrade();
        if frame.is_none() {
            registry.frames.remove(&id);
        }
        frame
    }

    /// 从栈顶到栈底输出所有帧，用于诊断。
    pub fn format_context(&self) -> serde_json::Value {
        let frames: Vec<serde_json::Value> = self
            .stack
            .lock()
            .iter()
            .rev()
            .map(|entry| entry.frame().format_context())
            .collect();
        serde_json::json!({ "depth": frames.len(), "frames": frames })
    }
}

/// 让给定帧在作用域内成为当前帧。
///
/// 构造时入栈，`Drop` 时出栈，因此提前返回、`?` 传播错误以及 panic 展开都会恢复原来的当前帧。
pub struct Scope {
    state: Arc<AsyncContextState>,
    frame: Arc<ContextFrame>,
}

impl Scope {
    pub fn new(state: &Arc<AsyncContextState>, frame: Arc<ContextFrame>) -> Self {
        state.push(frame.clone());
        Scope {
            state: state.clone(),
            frame,
        }
    }

    pub fn frame(&self) -> &Arc<ContextFrame> {
        &self.frame
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if std::thread::panicking() && self.state.depth() <= 1 {
            // 展开过程中再 panic 会直接 abort，这里只记录
            error!(
                "async context stack already unwound while leaving frame #{}",
                self.frame.id()
            );
            return;
        }
        let popped = self.state.pop();
        if !Arc::ptr_eq(&popped, &self.frame) {
            error!(
                "scope exited out of order: expected frame #{}, popped #{}",
                self.frame.id(),
                popped.id()
            );
            if !std::thread::panicking() {
                debug_assert!(false, "scope exited out of order");
            }
        }
    }
}
