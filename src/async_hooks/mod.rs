//! `node:async_hooks` 的子集：`AsyncLocalStorage`、`AsyncResource`
//! 以及读取当前执行上下文 id 的模块函数。
//!
//! 所有类型都只是核心原语（帧、作用域、绑定）的薄包装。
mod local_storage;
mod resource;

pub use local_storage::AsyncLocalStorage;
pub use resource::{AsyncResource, AsyncResourceOptions};

use weft_vm::{context::frame::ROOT_ASYNC_ID, isolate::Isolate};

/// 模块对象。
#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncHooksModule;

impl AsyncHooksModule {
    pub fn new() -> Self {
        AsyncHooksModule
    }

    /// 当前帧的 async id，根帧为 0。
    pub fn execution_async_id(&self, isolate: &Isolate) -> u64 {
        isolate.current_context().id()
    }

    /// 当前帧的创建来源，根帧为 0。
    pub fn trigger_async_id(&self, isolate: &Isolate) -> u64 {
        isolate
            .current_context()
            .parent_id()
            .unwrap_or(ROOT_ASYNC_ID)
    }

    pub fn async_local_storage(&self) -> AsyncLocalStorage {
        AsyncLocalStorage::new()
    }

    pub fn async_resource(
        &self,
        isolate: &Isolate,
        type_name: &str,
        options: AsyncResourceOptions,
    ) -> AsyncResource {
        AsyncResource::new(isolate, type_name, options)
    }
}
