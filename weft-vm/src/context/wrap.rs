use std::sync::Arc;

use log::debug;

use crate::{error::RuntimeError, isolate::Isolate, types::value::Value};

use super::{frame::ContextFrame, stack::Scope};

/// 把函数绑定到上下文帧，返回一个新的包装函数。
///
/// 帧（缺省为当前帧）写入原函数的隐藏槽位。包装函数被调用时先让该帧成为当前帧，
/// 再用调用方的 receiver 和参数调用原函数，无论正常返回还是抛出都会出栈。
///
/// 同一个函数只能绑定一次，重复绑定多半是误用，返回 [`RuntimeError::UsageError`]。
pub fn wrap_function(
    isolate: &mut Isolate,
    function: &Value,
    frame: Option<Arc<ContextFrame>>,
) -> Result<Value, RuntimeError> {
    if !function.is_function() {
        return Err(RuntimeError::InvalidType(format!(
            "cannot bind {:?} to an async context: not a function",
            function
        )));
    }
    if function.context_frame().is_some() {
        return Err(RuntimeError::UsageError(format!(
            "{:?} is already bound to an async context",
            function
        )));
    }
    let frame = frame.unwrap_or_else(|| isolate.async_context().current());
    debug!("binding {:?} to async context frame #{}", function, frame.id());
    function.attach_context_frame(frame);

    Ok(isolate.new_function_capturing(
        "asyncContextBound",
        &[function.clone()],
        |isolate, captured, this, arguments| {
            let target = &captured[0];
            let frame = target.context_frame().ok_or_else(|| {
                RuntimeError::InvalidOperation(format!(
                    "{:?} lost its async context binding",
                    target
                ))
            })?;
            let _scope = Scope::new(isolate.async_context(), frame);
            isolate.call(target, this, arguments)
        },
    ))
}

/// 把 promise 绑定到上下文帧（缺省为当前帧）。已经有标记时什么也不做。
pub fn wrap_promise(
    isolate: &Isolate,
    promise: &Value,
    frame: Option<Arc<ContextFrame>>,
) -> Result<(), RuntimeError> {
    if !promise.is_promise() {
        return Err(RuntimeError::InvalidType(format!(
            "cannot bind {:?} to an async context: not a promise",
            promise
        )));
    }
    if promise.context_frame().is_some() {
        return Ok(());
    }
    let frame = frame.unwrap_or_else(|| isolate.async_context().current());
    promise.attach_context_frame(frame);
    Ok(())
}
