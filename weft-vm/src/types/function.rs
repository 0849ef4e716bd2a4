use std::{collections::VecDeque, fmt::Debug, sync::Arc};

use arc_gc::{arc::GCArcWeak, traceable::GCTraceable};

use crate::{error::RuntimeError, isolate::Isolate};

use super::{
    object::ObjectCell,
    value::{HeapValue, Value},
};

/// 原生函数体：`(isolate, captured, this, arguments) -> result`
///
/// `captured` 是创建函数时登记的引擎值，调用时才取回强引用。
pub type NativeBody = Arc<
    dyn Fn(&mut Isolate, &[Value], &Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync,
>;

pub struct NativeFunction {
    name: Arc<str>,
    body: NativeBody,
    /// 闭包需要的引擎值。闭包对 GC 不透明，直接捕获强引用会让它们变成根，
    /// 所以登记在这里，以弱引用保存并参与遍历
    captured: Vec<HeapValue>,
}

impl NativeFunction {
    pub fn new(name: &str, body: NativeBody, captured: &[Value]) -> Self {
        NativeFunction {
            name: Arc::from(name),
            body,
            captured: captured.iter().map(Value::downgrade).collect(),
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn body(&self) -> NativeBody {
        self.body.clone()
    }

    /// 取回所有捕获值的强引用，任何一个已被回收时返回 `None`。
    pub fn captured(&self) -> Option<Vec<Value>> {
        self.captured.iter().map(HeapValue::upgrade).collect()
    }
}

impl GCTraceable<ObjectCell> for NativeFunction {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        for value in &self.captured {
            value.collect(queue);
        }
    }
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}
