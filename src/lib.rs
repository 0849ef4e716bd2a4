//! weft：嵌入式脚本引擎的 continuation-local 存储。
//!
//! 核心（上下文帧、作用域栈、promise 生命周期钩子）在 [`weft_vm`] 里，
//! 这个 crate 在其上提供面向用户的 [`async_hooks`] 模块。

pub mod async_hooks;

pub use weft_vm::{
    config::IsolateConfig,
    error::RuntimeError,
    isolate::Isolate,
    types::value::Value,
};

pub use async_hooks::{AsyncHooksModule, AsyncLocalStorage, AsyncResource, AsyncResourceOptions};

/// 初始化日志系统，级别默认是 Debug，可以用 `RUST_LOG` 覆盖。
///
/// 重复调用是安全的，已经初始化过时返回错误。
#[cfg(feature = "debug")]
pub fn init_logging() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .try_init()
}
