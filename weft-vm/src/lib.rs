//! weft 虚拟机核心。
//!
//! - `types`：引擎值、堆对象、原生函数与 Promise。
//! - `context`：continuation-local 异步上下文（存储键、上下文帧、作用域栈、生命周期钩子、绑定原语）。
//! - `isolate`：宿主引擎实例，持有 GC 堆、任务队列与异步上下文状态。

pub mod config;
pub mod context;
pub mod error;
pub mod isolate;
pub mod types;
pub use arc_gc::arc::GCArc;
pub use arc_gc::arc::GCArcWeak;
pub use arc_gc::gc::GC;
pub use arc_gc::traceable::GCTraceable;
