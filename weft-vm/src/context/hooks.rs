//! promise 生命周期适配器。
//!
//! 引擎对每个 promise 发出四种信号，适配器据此维护上下文：
//!
//! | 信号      | 动作 |
//! |-----------|------|
//! | `Init`    | 未标记时用当前帧标记（当前帧是根帧时跳过） |
//! | `Before`  | 把标记的帧（没有标记则是根帧）入栈 |
//! | `After`   | 检查栈顶并出栈；结果不是 rejection 时释放标记 |
//! | `Resolve` | 结果是 rejection 且未标记时用当前帧标记 |
//!
//! 对于创建时就已经确定结果的 promise，引擎通常只发出 `Resolve`，不会有 Init/Before/After，
//! 所以同步 reject 的 promise 要靠 `Resolve` 才能保留上下文，供后续的未处理 rejection 处理使用。
use std::sync::Arc;

use log::{error, trace, warn};

use crate::{isolate::Isolate, types::value::Value};

use super::{frame::ContextFrame, stack::AsyncContextState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromiseHookType {
    Init,
    Before,
    After,
    Resolve,
}

/// 引擎在 promise 生命周期各节点同步调用的钩子。
pub trait PromiseHook: Send + Sync {
    fn on_hook(
        &self,
        isolate: &Isolate,
        hook: PromiseHookType,
        promise: &Value,
        parent: Option<&Value>,
    );
}

/// 驱动异步上下文传播的钩子实现。
#[derive(Debug, Default)]
pub struct AsyncContextHooks;

impl AsyncContextHooks {
    pub fn new() -> Self {
        AsyncContextHooks
    }

    fn on_init(&self, state: &AsyncContextState, promise: &Value, parent: Option<&Value>) {
        if promise.context_frame().is_some() {
            return;
        }

        if let Some(parent) = parent.filter(|parent| parent.is_promise()) {
            // 父 promise 还没有标记时先标记它（只多走一层），再从父标记派生出子标记
            let parent_frame = match parent.context_frame() {
                Some(frame) => Some(frame),
                None => Self::tag_with_current(state, parent),
            };
            if let Some(parent_frame) = parent_frame {
                let frame = ContextFrame::create(state, Some(&parent_frame), None);
                trace!(
                    "promise {:?} tagged with frame #{} (derived from #{})",
                    promise,
                    frame.id(),
                    parent_frame.id()
                );
                promise.attach_context_frame(frame);
            }
            return;
        }

        Self::tag_with_current(state, promise);
    }

    fn on_before(&self, state: &AsyncContextState, promise: &Value) {
        let frame = promise.context_frame().unwrap_or_else(|| state.root());
        state.push(frame);
    }

    fn on_after(&self, isolate: &Isolate, state: &AsyncContextState, promise: &Value) {
        let expected = promise.context_frame().unwrap_or_else(|| state.root());
        if isolate.config().assert_scope_pairing && !state.is_current(&expected) {
            error!(
                "promise {:?} resumed in frame #{} but the stack is {}",
                promise,
                expected.id(),
                state.format_context()
            );
            panic!("CRITICAL: async context stack does not match the resuming promise. This indicates unbalanced Before/After hooks.");
        }
        state.pop();
        if !promise.is_rejected_promise() {
            promise.detach_context_frame();
        }
    }

    fn on_resolve(&self, state: &AsyncContextState, promise: &Value) {
        if promise.is_rejected_promise() && promise.context_frame().is_none() {
            Self::tag_with_current(state, promise);
        }
    }

    /// 用当前帧标记 promise。当前帧是根帧时不标记，`Before` 会回退到根帧。
    fn tag_with_current(state: &AsyncContextState, promise: &Value) -> Option<Arc<ContextFrame>> {
        let current = state.current();
        if current.is_root() {
            return None;
        }
        trace!("promise {:?} tagged with frame #{}", promise, current.id());
        promise.attach_context_frame(current.clone());
        Some(current)
    }
}

impl PromiseHook for AsyncContextHooks {
    fn on_hook(
        &self,
        isolate: &Isolate,
        hook: PromiseHookType,
        promise: &Value,
        parent: Option<&Value>,
    ) {
        if isolate.is_terminating() {
            // 引擎正在终止，对象图已经不可靠，不做任何事
            warn!("ignoring {:?} hook for {:?}: isolate is terminating", hook, promise);
            return;
        }
        let state = isolate.async_context();
        trace!("promise hook {:?} for {:?} (parent: {:?})", hook, promise, parent);
        match hook {
            PromiseHookType::Init => self.on_init(state, promise, parent),
            PromiseHookType::Before => self.on_before(state, promise),
            PromiseHookType::After => self.on_after(isolate, state, promise),
            PromiseHookType::Resolve => self.on_resolve(state, promise),
        }
    }
}
