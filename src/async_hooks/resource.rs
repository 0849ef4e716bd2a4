use std::sync::Arc;

use log::{debug, warn};
use weft_vm::{
    context::{
        frame::{ContextFrame, PinnedFrame, ROOT_ASYNC_ID},
        wrap::wrap_function,
    },
    error::RuntimeError,
    isolate::Isolate,
    types::value::Value,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsyncResourceOptions {
    /// 作为父上下文的资源 id，缺省时使用创建时的当前帧。
    pub trigger_async_id: Option<u64>,
}

/// 通用异步资源：持有一个帧，并为它提供对外可见的 id。
///
/// 资源由宿主代码持有，帧里的存储值在资源存活期间不会被 GC 回收。
#[derive(Debug)]
pub struct AsyncResource {
    type_name: String,
    frame: PinnedFrame,
}

impl AsyncResource {
    /// 创建资源。
    ///
    /// 指定的 trigger id 找不到存活的帧时（资源已经被回收，或者 id 从未存在），
    /// 退回到当前帧。
    pub fn new(isolate: &Isolate, type_name: &str, options: AsyncResourceOptions) -> Self {
        let state = isolate.async_context();
        let parent = match options.trigger_async_id {
            Some(id) => state.lookup(id).unwrap_or_else(|| {
                let current = state.current();
                warn!(
                    "AsyncResource {}: trigger async id {} is not a live resource, using current frame #{}",
                    type_name,
                    id,
                    current.id()
                );
                current
            }),
            None => state.current(),
        };
        let frame = ContextFrame::create(state, Some(&parent), None);
        debug!(
            "AsyncResource {} created with async id {} (trigger {})",
            type_name,
            frame.id(),
            parent.id()
        );
        AsyncResource {
            type_name: type_name.to_string(),
            frame: PinnedFrame::new(frame),
        }
    }

    #[inline(always)]
    pub fn async_id(&self) -> u64 {
        self.frame().id()
    }

    pub fn trigger_async_id(&self) -> u64 {
        self.frame().parent_id().unwrap_or(ROOT_ASYNC_ID)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn frame(&self) -> &Arc<ContextFrame> {
        self.frame.frame()
    }

    /// 把 `function` 绑定到本资源的帧。给出 `this_arg` 时返回的函数总以它为 receiver 调用。
    pub fn bind(
        &self,
        isolate: &mut Isolate,
        function: &Value,
        this_arg: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let bound = wrap_function(isolate, function, Some(self.frame().clone()))?;
        let Some(this_arg) = this_arg else {
            return Ok(bound);
        };
        Ok(isolate.new_function_capturing(
            "boundAsyncResource",
            &[bound, this_arg],
            |isolate, captured, _this, arguments| isolate.call(&captured[0], &captured[1], arguments),
        ))
    }

    /// 在本资源的帧里同步调用 `function`，返回前恢复之前的当前帧。
    pub fn run_in_async_scope(
        &self,
        isolate: &mut Isolate,
        function: &Value,
        this_arg: Option<Value>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let _scope = isolate.enter_scope(self.frame().clone());
        isolate.call(function, &this_arg.unwrap_or_default(), args)
    }
}
