use std::sync::Arc;

use log::debug;
use weft_vm::{
    context::{frame::ContextFrame, key::StorageKey},
    error::RuntimeError,
    isolate::Isolate,
    types::value::Value,
};

/// continuation-local 存储单元。
///
/// 每个实例拥有一个独立的存储键。`run` 期间以及期间创建的所有续体里，
/// `get_store` 都能读到传入的值。实例被销毁后键被标记为失效，
/// 仍然引用它的帧在下一次访问时清除对应的单元。
#[derive(Debug)]
pub struct AsyncLocalStorage {
    key: Arc<StorageKey>,
}

impl Default for AsyncLocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncLocalStorage {
    pub fn new() -> Self {
        AsyncLocalStorage {
            key: StorageKey::new("AsyncLocalStorage"),
        }
    }

    #[inline(always)]
    pub fn storage_key(&self) -> &Arc<StorageKey> {
        &self.key
    }

    /// 在一个新帧里同步调用 `callback(...args)`，新帧从当前帧复制而来并把本单元的值设为 `store`。
    ///
    /// `this` 是 isolate 的全局对象。无论 callback 正常返回还是抛出，返回前都会恢复之前的当前帧。
    pub fn run(
        &self,
        isolate: &mut Isolate,
        store: Value,
        callback: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let frame = ContextFrame::create(isolate.async_context(), None, Some((&self.key, store)));
        debug!("AsyncLocalStorage {:?} entering frame #{}", self.key, frame.id());
        let _scope = isolate.enter_scope(frame);
        let this = isolate.global().clone();
        isolate.call(callback, &this, args)
    }

    /// 在“没有值”的上下文里调用 callback，等价于 `run(undefined, ...)`。
    ///
    /// 这样得到的上下文和其他上下文一样会传播给期间创建的续体。
    pub fn exit(
        &self,
        isolate: &mut Isolate,
        callback: &Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.run(isolate, Value::Undefined, callback, args)
    }

    pub fn get_store(&self, isolate: &Isolate) -> Value {
        isolate
            .current_context()
            .get(&self.key)
            .unwrap_or_default()
    }

    pub fn enter_with(&self, _isolate: &mut Isolate, _store: Value) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotImplemented(
            "AsyncLocalStorage.enterWith() is not implemented".to_string(),
        ))
    }

    pub fn disable(&self) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotImplemented(
            "AsyncLocalStorage.disable() is not implemented".to_string(),
        ))
    }
}

impl Drop for AsyncLocalStorage {
    fn drop(&mut self) {
        self.key.mark_dead();
    }
}
