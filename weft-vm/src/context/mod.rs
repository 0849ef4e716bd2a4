//! continuation-local 异步上下文。
//!
//! 类似线程局部存储，但作用域是一条异步续体链（回调、promise reaction、任务），而不是线程。
//!
//! - `key`：存储键，标识帧里的一个存储单元，由外部设施持有，可能失效
//! - `frame`：上下文帧，构造后不可变的 键 -> 值 表，构造时从父帧按值复制
//! - `stack`：每个 isolate 一份的作用域栈，以及 RAII 的 [`stack::Scope`]
//! - `hooks`：把引擎的四种 promise 生命周期信号转换为帧的标记/入栈/出栈
//! - `wrap`：把函数或 promise 绑定到某个帧的原语

pub mod frame;
pub mod hooks;
pub mod key;
pub mod stack;
pub mod wrap;

pub use frame::ContextFrame;
pub use hooks::{AsyncContextHooks, PromiseHook, PromiseHookType};
pub use key::StorageKey;
pub use stack::{AsyncContextState, Scope};
pub use wrap::{wrap_function, wrap_promise};
