use std::{
    collections::VecDeque,
    fmt::{Debug, Display},
    sync::Arc,
};

use arc_gc::{
    arc::{GCArc, GCArcWeak},
    traceable::GCTraceable,
};

use crate::context::frame::ContextFrame;

use super::{
    object::{ObjectCell, ObjectKind},
    promise::PromiseState,
};

/// 引擎值。
///
/// 原始值按值保存；对象是指向 GC 堆的强引用句柄，clone 只增加引用计数，不会深拷贝。
/// 堆外持有的强引用就是 GC 的根，堆内部一律保存 [`HeapValue`]。
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Object(GCArc<ObjectCell>),
}

impl Value {
    #[inline(always)]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline(always)]
    pub fn as_object(&self) -> Option<&ObjectCell> {
        match self {
            Value::Object(arc) => Some(arc.as_ref()),
            _ => None,
        }
    }

    pub fn object_id(&self) -> Option<u64> {
        self.as_object().map(|obj| obj.id())
    }

    pub fn is_function(&self) -> bool {
        self.as_object()
            .map(|obj| obj.with_kind(|kind| matches!(kind, ObjectKind::Function(_))))
            .unwrap_or(false)
    }

    pub fn is_promise(&self) -> bool {
        self.as_object()
            .map(|obj| obj.with_kind(|kind| matches!(kind, ObjectKind::Promise(_))))
            .unwrap_or(false)
    }

    pub fn promise_state(&self) -> Option<PromiseState> {
        self.as_object()?.with_kind(|kind| match kind {
            ObjectKind::Promise(data) => Some(data.state()),
            _ => None,
        })
    }

    pub fn is_rejected_promise(&self) -> bool {
        self.as_object()
            .map(|obj| {
                obj.with_kind(|kind| matches!(kind, ObjectKind::Promise(data) if data.is_rejected()))
            })
            .unwrap_or(false)
    }

    /// 对象按身份比较，原始值按值比较。
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.as_ref().id() == b.as_ref().id(),
            _ => false,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) if self.is_function() => "function",
            Value::Object(_) => "object",
        }
    }

    /// 读取对象隐藏槽位上关联的上下文帧，可重复读取；原始值永远没有关联。
    pub fn context_frame(&self) -> Option<Arc<ContextFrame>> {
        self.as_object()?.context_frame()
    }

    /// 写入隐藏槽位。槽位是一次性写入的，已有关联时返回 false。
    pub fn attach_context_frame(&self, frame: Arc<ContextFrame>) -> bool {
        match self.as_object() {
            Some(obj) => obj.attach_context_frame(frame),
            None => false,
        }
    }

    pub fn detach_context_frame(&self) -> Option<Arc<ContextFrame>> {
        self.as_object()?.detach_context_frame()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// 转为堆内部使用的弱引用形式。
    pub fn downgrade(&self) -> HeapValue {
        match self {
            Value::Object(arc) => HeapValue::Object(arc.as_weak()),
            other => HeapValue::Primitive(other.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(arc) => write!(f, "{:?}", arc.as_ref()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

/// 存放在堆对象或上下文帧内部的值。
///
/// 对象只以弱引用保存，是否存活由 GC 从根出发遍历决定；强引用 [`Value`] 只出现在
/// 堆外（宿主代码、任务队列、作用域栈）。这样对象之间的环不会把彼此变成根。
#[derive(Clone)]
pub enum HeapValue {
    Primitive(Value),
    Object(GCArcWeak<ObjectCell>),
}

impl Default for HeapValue {
    fn default() -> Self {
        HeapValue::Primitive(Value::Undefined)
    }
}

impl HeapValue {
    /// 取回强引用。对象已经被回收时返回 `None`。
    pub fn upgrade(&self) -> Option<Value> {
        match self {
            HeapValue::Primitive(value) => Some(value.clone()),
            HeapValue::Object(weak) => weak.upgrade().map(Value::Object),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            HeapValue::Primitive(_) => true,
            HeapValue::Object(weak) => weak.is_valid(),
        }
    }

    pub(crate) fn upgrade_object(&self) -> Option<GCArc<ObjectCell>> {
        match self {
            HeapValue::Object(weak) => weak.upgrade(),
            HeapValue::Primitive(_) => None,
        }
    }
}

impl GCTraceable<ObjectCell> for HeapValue {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        if let HeapValue::Object(weak) = self {
            queue.push_back(weak.clone());
        }
    }
}

impl Debug for HeapValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(value) => write!(f, "{:?}", value),
            None => write!(f, "<collected>"),
        }
    }
}
