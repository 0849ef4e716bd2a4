use thiserror::Error;

use crate::types::value::Value;

#[derive(Clone, Debug, Error)]
pub enum RuntimeError {
    /// API 被错误使用，例如重复绑定同一个函数。
    #[error("Usage Error: {0}")]
    UsageError(String),
    #[error("Not Implemented: {0}")]
    NotImplemented(String),
    #[error("Invalid Type: {0}")]
    InvalidType(String),
    #[error("Invalid Operation: {0}")]
    InvalidOperation(String),
    /// 脚本层抛出的异常值
    #[error("Uncaught Exception: {0:?}")]
    Exception(Value),
    #[error("Execution terminated")]
    Terminated,
}

impl RuntimeError {
    /// 把错误转成可以拿来 reject promise 的脚本值。
    pub fn into_value(self) -> Value {
        match self {
            RuntimeError::Exception(value) => value,
            other => Value::from(other.to_string()),
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, RuntimeError::Terminated)
    }
}
