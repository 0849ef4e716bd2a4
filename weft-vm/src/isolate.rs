//! 宿主引擎实例（isolate）。
//!
//! isolate 持有 GC 堆、微任务/任务队列、未处理 rejection 列表以及本实例的异步上下文状态。
//! 它在 promise 的各个生命周期节点同步调用已安装的 [`PromiseHook`]，
//! 这是异步上下文传播唯一依赖的引擎能力。
use std::{collections::VecDeque, sync::Arc};

use arc_gc::gc::GC;
use log::{debug, trace, warn};

use crate::{
    config::IsolateConfig,
    context::{
        frame::ContextFrame,
        hooks::{AsyncContextHooks, PromiseHook, PromiseHookType},
        stack::{AsyncContextState, Scope},
    },
    error::RuntimeError,
    types::{
        function::{NativeBody, NativeFunction},
        object::{ObjectCell, ObjectKind},
        promise::{PromiseData, PromiseReaction, PromiseState, Settlement},
        value::Value,
    },
};

enum Microtask {
    Reaction {
        reaction: PromiseReaction,
        settlement: Settlement,
    },
    Callback(Value),
}

/// 一个被 reject 且在微任务检查点之后仍然没有处理者的 promise。
#[derive(Clone, Debug)]
pub struct UnhandledRejection {
    pub promise: Value,
    pub reason: Value,
}

impl UnhandledRejection {
    /// reject 时保留下来的上下文帧。
    pub fn context_frame(&self) -> Option<Arc<ContextFrame>> {
        self.promise.context_frame()
    }
}

pub struct Isolate {
    config: IsolateConfig,
    gc: GC<ObjectCell>,
    next_object_id: u64,
    context: Arc<AsyncContextState>,
    promise_hook: Option<Arc<dyn PromiseHook>>,
    microtasks: VecDeque<Microtask>,
    tasks: VecDeque<Value>,
    pending_rejections: Vec<Value>,
    uncaught_errors: Vec<RuntimeError>,
    global: Value,
    terminating: bool,
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new(IsolateConfig::default())
    }
}

fn expect_promise(promise: &Value) -> Result<&ObjectCell, RuntimeError> {
    match promise.as_object() {
        Some(obj) if obj.with_kind(|kind| matches!(kind, ObjectKind::Promise(_))) => Ok(obj),
        _ => Err(RuntimeError::InvalidType(format!(
            "{:?} is not a promise",
            promise
        ))),
    }
}

impl Isolate {
    pub fn new(config: IsolateConfig) -> Self {
        let gc = match config.gc_memory_threshold {
            Some(threshold) => GC::new_with_memory_threshold(threshold),
            None => GC::new(),
        };
        let promise_hook: Option<Arc<dyn PromiseHook>> = if config.track_async_context {
            Some(Arc::new(AsyncContextHooks::new()))
        } else {
            None
        };
        let mut isolate = Isolate {
            config,
            gc,
            next_object_id: 0,
            context: Arc::new(AsyncContextState::new()),
            promise_hook,
            microtasks: VecDeque::new(),
            tasks: VecDeque::new(),
            pending_rejections: Vec::new(),
            uncaught_errors: Vec::new(),
            global: Value::Undefined,
            terminating: false,
        };
        isolate.global = isolate.new_object();
        debug!("isolate created with {:?}", isolate.config);
        isolate
    }

    #[inline(always)]
    pub fn config(&self) -> &IsolateConfig {
        &self.config
    }

    #[inline(always)]
    pub fn async_context(&self) -> &Arc<AsyncContextState> {
        &self.context
    }

    pub fn current_context(&self) -> Arc<ContextFrame> {
        self.context.current()
    }

    pub fn enter_scope(&self, frame: Arc<ContextFrame>) -> Scope {
        Scope::new(&self.context, frame)
    }

    pub fn global(&self) -> &Value {
        &self.global
    }

    pub fn set_promise_hook(&mut self, hook: Option<Arc<dyn PromiseHook>>) {
        self.promise_hook = hook;
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// 请求终止执行。终止期间所有调用都失败，promise 钩子全部变成空操作。
    pub fn terminate_execution(&mut self) {
        warn!("isolate execution terminating");
        self.terminating = true;
    }

    pub fn cancel_terminate_execution(&mut self) {
        debug!(
            "isolate termination cancelled (async context depth {})",
            self.context.depth()
        );
        self.terminating = false;
    }

    pub fn collect_garbage(&mut self) {
        self.gc.collect();
    }

    fn allocate(&mut self, kind: ObjectKind) -> Value {
        self.next_object_id += 1;
        Value::Object(self.gc.create(ObjectCell::new(self.next_object_id, kind)))
    }

    fn fire_hook(&self, hook: PromiseHookType, promise: &Value, parent: Option<&Value>) {
        if let Some(promise_hook) = &self.promise_hook {
            promise_hook.on_hook(self, hook, promise, parent);
        }
    }

    pub fn new_object(&mut self) -> Value {
        self.allocate(ObjectKind::Ordinary)
    }

    pub fn new_function<F>(&mut self, name: &str, body: F) -> Value
    where
        F: Fn(&mut Isolate, &Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.new_function_capturing(name, &[], move |isolate, _captured, this, arguments| {
            body(isolate, this, arguments)
        })
    }

    /// 创建原生函数，并把它引用的引擎值登记给 GC。
    ///
    /// 闭包直接捕获的 [`Value`] 是强引用，会成为 GC 根；需要引用其他堆对象时通过 `captured` 传入，
    /// 调用时由第二个参数按相同顺序取回。
    pub fn new_function_capturing<F>(&mut self, name: &str, captured: &[Value], body: F) -> Value
    where
        F: Fn(&mut Isolate, &[Value], &Value, &[Value]) -> Result<Value, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        let body: NativeBody = Arc::new(body);
        self.allocate(ObjectKind::Function(NativeFunction::new(name, body, captured)))
    }

    /// GC 堆上当前登记的对象数量（包括尚未回收的垃圾）。
    pub fn heap_object_count(&self) -> usize {
        self.gc.object_count()
    }

    pub fn call(
        &mut self,
        function: &Value,
        this: &Value,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        if self.terminating {
            return Err(RuntimeError::Terminated);
        }
        let (body, captured) = function
            .as_object()
            .and_then(|obj| {
                obj.with_kind(|kind| match kind {
                    ObjectKind::Function(native) => Some((native.body(), native.captured())),
                    _ => None,
                })
            })
            .ok_or_else(|| RuntimeError::InvalidType(format!("{:?} is not a function", function)))?;
        let captured = captured.ok_or_else(|| {
            RuntimeError::InvalidOperation(format!(
                "a value captured by {:?} has been collected",
                function
            ))
        })?;
        body(self, &captured, this, arguments)
    }

    /// 创建一个 pending 的 promise，触发 `Init`。
    pub fn new_promise(&mut self) -> Value {
        let promise = self.allocate(ObjectKind::Promise(PromiseData::pending()));
        self.fire_hook(PromiseHookType::Init, &promise, None);
        promise
    }

    /// `Promise.resolve(value)`：创建时结果就已确定，只触发 `Resolve`。
    pub fn promise_resolved(&mut self, value: Value) -> Value {
        if value.is_promise() {
            return value;
        }
        let promise = self.allocate(ObjectKind::Promise(PromiseData::settled(
            Settlement::Fulfilled(value),
        )));
        self.fire_hook(PromiseHookType::Resolve, &promise, None);
        promise
    }

    /// `Promise.reject(reason)`：创建时结果就已确定，只触发 `Resolve`。
    pub fn promise_rejected(&mut self, reason: Value) -> Value {
        let promise = self.allocate(ObjectKind::Promise(PromiseData::settled(
            Settlement::Rejected(reason),
        )));
        self.fire_hook(PromiseHookType::Resolve, &promise, None);
        self.pending_rejections.push(promise.clone());
        promise
    }

    /// 以 `value` 解决 promise。`value` 本身是 promise 时跟随它的结果。
    pub fn resolve_promise(&mut self, promise: &Value, value: Value) -> Result<(), RuntimeError> {
        let pending = expect_promise(promise)?.with_kind(|kind| match kind {
            ObjectKind::Promise(data) => data.is_pending(),
            _ => false,
        });
        if !pending {
            return Ok(());
        }
        if value.same_value(promise) {
            return self.settle(
                promise,
                Settlement::Rejected(Value::from("TypeError: Chaining cycle detected for promise")),
            );
        }
        if value.is_promise() {
            return self.add_reaction(&value, PromiseReaction::new(None, None, promise.clone()));
        }
        self.settle(promise, Settlement::Fulfilled(value))
    }

    pub fn reject_promise(&mut self, promise: &Value, reason: Value) -> Result<(), RuntimeError> {
        self.settle(promise, Settlement::Rejected(reason))
    }

    fn settle(&mut self, promise: &Value, settlement: Settlement) -> Result<(), RuntimeError> {
        let settled = expect_promise(promise)?.with_kind_mut(|kind| match kind {
            ObjectKind::Promise(data) if data.is_pending() => Some(data.settle(&settlement)),
            _ => None,
        });
        let Some((reactions, handled)) = settled else {
            return Ok(());
        };
        trace!(
            "promise {:?} settled ({} reactions queued)",
            promise,
            reactions.len()
        );
        self.fire_hook(PromiseHookType::Resolve, promise, None);
        if settlement.is_rejected() && !handled {
            self.pending_rejections.push(promise.clone());
        }
        for reaction in reactions {
            self.microtasks.push_back(Microtask::Reaction {
                reaction,
                settlement: settlement.clone(),
            });
        }
        Ok(())
    }

    fn add_reaction(&mut self, promise: &Value, reaction: PromiseReaction) -> Result<(), RuntimeError> {
        let ready = expect_promise(promise)?.with_kind_mut(|kind| match kind {
            ObjectKind::Promise(data) => data.add_reaction(reaction),
            _ => None,
        });
        self.pending_rejections
            .retain(|pending| !pending.same_value(promise));
        if let Some((reaction, settlement)) = ready {
            self.microtasks.push_back(Microtask::Reaction {
                reaction,
                settlement,
            });
        }
        Ok(())
    }

    /// `promise.then(on_fulfilled, on_rejected)`，派生的 promise 以 `promise` 为父触发 `Init`。
    pub fn then(
        &mut self,
        promise: &Value,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        expect_promise(promise)?;
        let derived = self.allocate(ObjectKind::Promise(PromiseData::pending()));
        self.fire_hook(PromiseHookType::Init, &derived, Some(promise));
        let reaction = PromiseReaction::new(
            on_fulfilled.filter(Value::is_function),
            on_rejected.filter(Value::is_function),
            derived.clone(),
        );
        self.add_reaction(promise, reaction)?;
        Ok(derived)
    }

    pub fn catch(&mut self, promise: &Value, on_rejected: Value) -> Result<Value, RuntimeError> {
        self.then(promise, None, Some(on_rejected))
    }

    /// 排入一个普通回调。它不是 promise，不会触发任何钩子，需要上下文时由调用方先绑定。
    pub fn queue_microtask(&mut self, callback: Value) {
        self.microtasks.push_back(Microtask::Callback(callback));
    }

    /// 排入一个宏任务（类似定时器回调）。
    pub fn enqueue_task(&mut self, callback: Value) {
        self.tasks.push_back(callback);
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn perform_microtask_checkpoint(&mut self) -> Result<(), RuntimeError> {
        while let Some(job) = self.microtasks.pop_front() {
            if self.terminating {
                self.microtasks.clear();
                return Err(RuntimeError::Terminated);
            }
            match job {
                Microtask::Reaction {
                    reaction,
                    settlement,
                } => self.run_reaction_job(reaction, settlement)?,
                Microtask::Callback(callback) => self.run_callback(&callback)?,
            }
        }
        Ok(())
    }

    /// 依次执行任务，每个任务之后跑一次微任务检查点，直到两个队列都为空。
    pub fn run_until_idle(&mut self) -> Result<(), RuntimeError> {
        self.perform_microtask_checkpoint()?;
        while let Some(task) = self.tasks.pop_front() {
            if self.terminating {
                self.tasks.clear();
                return Err(RuntimeError::Terminated);
            }
            self.run_callback(&task)?;
            self.perform_microtask_checkpoint()?;
        }
        Ok(())
    }

    fn run_callback(&mut self, callback: &Value) -> Result<(), RuntimeError> {
        match self.call(callback, &Value::Undefined, &[]) {
            Ok(_) => Ok(()),
            Err(RuntimeError::Terminated) => Err(RuntimeError::Terminated),
            Err(error) => {
                warn!("uncaught error in {:?}: {}", callback, error);
                self.uncaught_errors.push(error);
                Ok(())
            }
        }
    }

    fn run_reaction_job(
        &mut self,
        reaction: PromiseReaction,
        settlement: Settlement,
    ) -> Result<(), RuntimeError> {
        let derived = reaction.derived().clone();
        let depth = self.context.depth();
        self.fire_hook(PromiseHookType::Before, &derived, None);
        let result = match (reaction.handler_for(&settlement), settlement) {
            (Some(handler), Settlement::Fulfilled(value) | Settlement::Rejected(value)) => {
                self.call(&handler, &Value::Undefined, &[value])
            }
            (None, Settlement::Fulfilled(value)) => Ok(value),
            (None, Settlement::Rejected(reason)) => Err(RuntimeError::Exception(reason)),
        };
        let outcome = match result {
            Ok(value) => self.resolve_promise(&derived, value),
            Err(RuntimeError::Terminated) => Err(RuntimeError::Terminated),
            Err(error) => self.reject_promise(&derived, error.into_value()),
        };
        self.fire_hook(PromiseHookType::After, &derived, None);
        if self.terminating {
            // 终止期间 After 不出栈，恢复 Before 之前的栈深度
            self.context.unwind_to(depth);
        }
        outcome
    }

    /// 非 promise 回调里未被捕获的错误。
    pub fn take_uncaught_errors(&mut self) -> Vec<RuntimeError> {
        std::mem::take(&mut self.uncaught_errors)
    }

    pub fn take_unhandled_rejections(&mut self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.pending_rejections)
            .into_iter()
            .filter_map(|promise| match promise.promise_state() {
                Some(PromiseState::Rejected(reason)) => Some(UnhandledRejection { promise, reason }),
                _ => None,
            })
            .collect()
    }

    /// 对每个未处理的 rejection 调用 `handler(reason, promise)`。
    ///
    /// handler 在 promise 被 reject 时保留下来的上下文帧里运行（没有则是根帧），
    /// 调用之后释放该标记。handler 抛出的错误记入 [`Isolate::take_uncaught_errors`]，
    /// 不影响其余 rejection 的处理；引擎终止时未处理的部分放回队列。返回处理的数量。
    pub fn process_unhandled_rejections(&mut self, handler: &Value) -> Result<usize, RuntimeError> {
        let mut rejections = self.take_unhandled_rejections().into_iter();
        let mut count = 0;
        while let Some(rejection) = rejections.next() {
            if self.terminating {
                self.pending_rejections.push(rejection.promise);
                self.pending_rejections
                    .extend(rejections.map(|rejection| rejection.promise));
                return Err(RuntimeError::Terminated);
            }
            let frame = rejection
                .promise
                .detach_context_frame()
                .unwrap_or_else(|| self.context.root());
            debug!(
                "reporting unhandled rejection of {:?} in frame #{}",
                rejection.promise,
                frame.id()
            );
            let _scope = Scope::new(&self.context, frame);
            match self.call(handler, &Value::Undefined, &[rejection.reason, rejection.promise]) {
                Ok(_) => {}
                Err(RuntimeError::Terminated) => {
                    self.pending_rejections
                        .extend(rejections.map(|rejection| rejection.promise));
                    return Err(RuntimeError::Terminated);
                }
                Err(error) => {
                    warn!("unhandled rejection handler {:?} failed: {}", handler, error);
                    self.uncaught_errors.push(error);
                }
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::key::StorageKey;
    use parking_lot::Mutex;

    /// 记录每次调用时当前帧里 `key` 的值。
    fn recorder(isolate: &mut Isolate, key: &Arc<StorageKey>, seen: &Arc<Mutex<Vec<Value>>>) -> Value {
        let key = key.clone();
        let seen = seen.clone();
        isolate.new_function("record", move |isolate, _this, args| {
            seen.lock()
                .push(isolate.current_context().get(&key).unwrap_or_default());
            Ok(args.first().cloned().unwrap_or_default())
        })
    }

    fn frame_with(isolate: &Isolate, key: &Arc<StorageKey>, value: Value) -> Arc<ContextFrame> {
        ContextFrame::create(isolate.async_context(), None, Some((key, value)))
    }

    #[test]
    fn test_then_runs_after_resolution() {
        let mut isolate = Isolate::default();
        let promise = isolate.new_promise();
        let double = isolate.new_function("double", |_isolate, _this, args| {
            Ok(Value::from(args[0].as_number().unwrap_or(0.0) * 2.0))
        });
        let derived = isolate.then(&promise, Some(double), None).unwrap();
        isolate.resolve_promise(&promise, Value::from(21)).unwrap();
        assert!(matches!(derived.promise_state(), Some(PromiseState::Pending)));

        isolate.perform_microtask_checkpoint().unwrap();
        assert!(matches!(derived.promise_state(), Some(PromiseState::Fulfilled(v)) if v == Value::from(42)));
    }

    #[test]
    fn test_resolving_with_a_promise_adopts_its_state() {
        let mut isolate = Isolate::default();
        let outer = isolate.new_promise();
        let inner = isolate.new_promise();
        isolate.resolve_promise(&outer, inner.clone()).unwrap();
        isolate.reject_promise(&inner, Value::from("inner failed")).unwrap();
        isolate.perform_microtask_checkpoint().unwrap();
        assert!(matches!(outer.promise_state(), Some(PromiseState::Rejected(v)) if v == Value::from("inner failed")));
    }

    #[test]
    fn test_settled_promises_ignore_later_settlement() {
        let mut isolate = Isolate::default();
        let promise = isolate.new_promise();
        isolate.resolve_promise(&promise, Value::from(1)).unwrap();
        isolate.reject_promise(&promise, Value::from(2)).unwrap();
        assert!(matches!(promise.promise_state(), Some(PromiseState::Fulfilled(v)) if v == Value::from(1)));
        assert!(isolate.take_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_continuation_observes_creation_context() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = recorder(&mut isolate, &key, &seen);

        let pending = isolate.new_promise();
        let frame_a = frame_with(&isolate, &key, Value::from("a"));
        {
            let _scope = isolate.enter_scope(frame_a);
            isolate.then(&pending, Some(record.clone()), None).unwrap();
        }

        // 另一条无关的续体在自己的帧里入栈出栈
        let ready = isolate.promise_resolved(Value::from(0));
        let frame_b = frame_with(&isolate, &key, Value::from("b"));
        {
            let _scope = isolate.enter_scope(frame_b);
            isolate.then(&ready, Some(record), None).unwrap();
        }

        isolate.resolve_promise(&pending, Value::from(1)).unwrap();
        isolate.perform_microtask_checkpoint().unwrap();

        assert_eq!(*seen.lock(), vec![Value::from("b"), Value::from("a")]);
        assert!(isolate.current_context().is_root());
        assert_eq!(isolate.async_context().depth(), 1);
    }

    #[test]
    fn test_context_flows_through_chained_continuations() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = recorder(&mut isolate, &key, &seen);

        let frame = frame_with(&isolate, &key, Value::from("request-1"));
        let root_promise = isolate.new_promise();
        {
            let _scope = isolate.enter_scope(frame);
            let first = isolate.then(&root_promise, Some(record.clone()), None).unwrap();
            let second = isolate.then(&first, Some(record.clone()), None).unwrap();
            isolate.then(&second, Some(record), None).unwrap();
        }
        isolate.resolve_promise(&root_promise, Value::Null).unwrap();
        isolate.perform_microtask_checkpoint().unwrap();

        assert_eq!(seen.lock().len(), 3);
        assert!(seen.lock().iter().all(|v| *v == Value::from("request-1")));
    }

    #[test]
    fn test_successful_continuation_releases_tag_rejected_keeps_it() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let identity = isolate.new_function("identity", |_isolate, _this, args| {
            Ok(args.first().cloned().unwrap_or_default())
        });
        let thrower = isolate.new_function("thrower", |_isolate, _this, _args| {
            Err(RuntimeError::Exception(Value::from("failed")))
        });

        let frame = frame_with(&isolate, &key, Value::from("ctx"));
        let source = isolate.new_promise();
        let (ok, failed) = {
            let _scope = isolate.enter_scope(frame);
            (
                isolate.then(&source, Some(identity), None).unwrap(),
                isolate.then(&source, Some(thrower), None).unwrap(),
            )
        };
        assert!(ok.context_frame().is_some());
        assert!(failed.context_frame().is_some());

        isolate.resolve_promise(&source, Value::from(1)).unwrap();
        isolate.perform_microtask_checkpoint().unwrap();

        assert!(ok.context_frame().is_none());
        let kept = failed.context_frame().unwrap();
        assert_eq!(kept.get(&key), Some(Value::from("ctx")));
    }

    #[test]
    fn test_unhandled_rejection_handler_runs_in_rejecting_context() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = recorder(&mut isolate, &key, &seen);

        let frame = frame_with(&isolate, &key, Value::from("origin"));
        {
            let _scope = isolate.enter_scope(frame);
            isolate.promise_rejected(Value::from("sync"));
        }
        let handled = isolate.promise_rejected(Value::from("handled"));
        let noop = isolate.new_function("noop", |_isolate, _this, _args| Ok(Value::Undefined));
        isolate.catch(&handled, noop).unwrap();
        isolate.perform_microtask_checkpoint().unwrap();

        let count = isolate.process_unhandled_rejections(&record).unwrap();
        assert_eq!(count, 1);
        assert_eq!(*seen.lock(), vec![Value::from("origin")]);
        assert!(isolate.current_context().is_root());
    }

    #[test]
    fn test_tasks_and_microtasks_interleave() {
        let mut isolate = Isolate::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |isolate: &mut Isolate, label: &'static str| {
            let order = order.clone();
            isolate.new_function(label, move |_isolate, _this, _args| {
                order.lock().push(label);
                Ok(Value::Undefined)
            })
        };
        let task = make(&mut isolate, "task");
        let micro = make(&mut isolate, "micro");
        isolate.enqueue_task(task);
        isolate.queue_microtask(micro);
        isolate.run_until_idle().unwrap();
        assert_eq!(*order.lock(), vec!["micro", "task"]);
        assert_eq!(isolate.pending_tasks(), 0);
        assert_eq!(isolate.pending_microtasks(), 0);
    }

    #[test]
    fn test_callback_errors_are_reported_not_propagated() {
        let mut isolate = Isolate::default();
        let thrower = isolate.new_function("thrower", |_isolate, _this, _args| {
            Err(RuntimeError::Exception(Value::from("oops")))
        });
        isolate.queue_microtask(thrower);
        isolate.perform_microtask_checkpoint().unwrap();
        let errors = isolate.take_uncaught_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], RuntimeError::Exception(v) if *v == Value::from("oops")));
    }

    #[test]
    fn test_termination_stops_execution() {
        let mut isolate = Isolate::default();
        let noop = isolate.new_function("noop", |_isolate, _this, _args| Ok(Value::Undefined));
        isolate.queue_microtask(noop.clone());
        isolate.terminate_execution();
        assert!(matches!(
            isolate.call(&noop, &Value::Undefined, &[]),
            Err(RuntimeError::Terminated)
        ));
        assert!(matches!(
            isolate.perform_microtask_checkpoint(),
            Err(RuntimeError::Terminated)
        ));
        assert_eq!(isolate.pending_microtasks(), 0);

        isolate.cancel_terminate_execution();
        assert!(isolate.call(&noop, &Value::Undefined, &[]).is_ok());
    }

    #[test]
    fn test_calling_non_function_fails() {
        let mut isolate = Isolate::default();
        let object = isolate.new_object();
        assert!(matches!(
            isolate.call(&object, &Value::Undefined, &[]),
            Err(RuntimeError::InvalidType(_))
        ));
        assert!(matches!(
            isolate.then(&object, None, None),
            Err(RuntimeError::InvalidType(_))
        ));
    }

    #[test]
    fn test_object_held_by_promise_tag_survives_collection() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let promise = isolate.new_promise();
        let object = isolate.new_object();
        let frame = frame_with(&isolate, &key, object.clone());
        assert!(promise.attach_context_frame(frame));
        let held = object.downgrade();
        drop(object);

        // 只剩 promise（根）→ 标记帧 → 对象 这一条路径
        isolate.collect_garbage();
        assert!(held.is_alive());
        let tag = promise.context_frame().unwrap();
        assert!(tag.get(&key).unwrap().same_value(&held.upgrade().unwrap()));
    }

    #[test]
    fn test_object_is_freed_after_tag_released() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let promise = isolate.new_promise();
        let object = isolate.new_object();
        let frame = frame_with(&isolate, &key, object.clone());
        assert!(promise.attach_context_frame(frame));
        let held = object.downgrade();
        drop(object);

        let released = promise.detach_context_frame().unwrap();
        isolate.collect_garbage();
        assert!(!held.is_alive());
        assert_eq!(released.get(&key), None);
    }

    #[test]
    fn test_object_held_by_current_frame_survives_collection() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let object = isolate.new_object();
        let held = object.downgrade();
        let frame = frame_with(&isolate, &key, object.clone());
        {
            let _scope = isolate.enter_scope(frame.clone());
            drop(object);
            isolate.collect_garbage();
            assert!(held.is_alive());
            assert!(isolate.current_context().get(&key).is_some());
        }
        isolate.collect_garbage();
        assert!(!held.is_alive());
        assert_eq!(frame.get(&key), None);
    }

    #[test]
    fn test_promise_function_cycle_is_collected() {
        let mut isolate = Isolate::default();
        let baseline = isolate.heap_object_count();
        {
            let promise = isolate.new_promise();
            let handler = isolate.new_function_capturing(
                "keepsPromise",
                &[promise.clone()],
                |_isolate, captured, _this, _args| Ok(captured[0].clone()),
            );
            let derived = isolate.then(&promise, Some(handler), None).unwrap();
            assert!(derived.is_promise());
        }
        isolate.collect_garbage();
        assert_eq!(isolate.heap_object_count(), baseline);
    }

    #[test]
    fn test_captured_values_reach_the_body() {
        let mut isolate = Isolate::default();
        let first = isolate.new_object();
        let function = isolate.new_function_capturing(
            "first",
            &[first.clone(), Value::from(2)],
            |_isolate, captured, _this, _args| {
                assert_eq!(captured[1], Value::from(2));
                Ok(captured[0].clone())
            },
        );
        isolate.collect_garbage();
        let result = isolate.call(&function, &Value::Undefined, &[]).unwrap();
        assert!(result.same_value(&first));
    }

    #[test]
    fn test_termination_inside_continuation_restores_stack() {
        let mut isolate = Isolate::default();
        let key = StorageKey::new("k");
        let stopper = isolate.new_function("stopper", |isolate, _this, _args| {
            isolate.terminate_execution();
            Ok(Value::Undefined)
        });
        let noop = isolate.new_function("noop", |_isolate, _this, _args| Ok(Value::Undefined));

        let pending = isolate.new_promise();
        let frame = frame_with(&isolate, &key, Value::from("leak"));
        {
            let _scope = isolate.enter_scope(frame);
            isolate.then(&pending, Some(stopper), None).unwrap();
        }
        isolate.resolve_promise(&pending, Value::Null).unwrap();
        isolate.queue_microtask(noop);

        assert!(matches!(
            isolate.perform_microtask_checkpoint(),
            Err(RuntimeError::Terminated)
        ));
        isolate.cancel_terminate_execution();
        assert_eq!(isolate.async_context().depth(), 1);
        assert!(isolate.current_context().is_root());
        assert_eq!(isolate.current_context().get(&key), None);
    }

    #[test]
    fn test_failing_rejection_handler_does_not_drop_others() {
        let mut isolate = Isolate::default();
        let calls = Arc::new(Mutex::new(0));
        let handler = {
            let calls = calls.clone();
            isolate.new_function("failingHandler", move |_isolate, _this, args| {
                *calls.lock() += 1;
                Err(RuntimeError::Exception(args[0].clone()))
            })
        };
        isolate.promise_rejected(Value::from("first"));
        isolate.promise_rejected(Value::from("second"));

        let count = isolate.process_unhandled_rejections(&handler).unwrap();
        assert_eq!(count, 2);
        assert_eq!(*calls.lock(), 2);
        let errors = isolate.take_uncaught_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[1], RuntimeError::Exception(v) if *v == Value::from("second")));
        assert!(isolate.take_unhandled_rejections().is_empty());
        assert!(isolate.current_context().is_root());
    }

    #[test]
    fn test_termination_in_rejection_handler_requeues_the_rest() {
        let mut isolate = Isolate::default();
        let stopper = isolate.new_function("stopper", |isolate, _this, _args| {
            isolate.terminate_execution();
            Ok(Value::Undefined)
        });
        isolate.promise_rejected(Value::from("first"));
        isolate.promise_rejected(Value::from("second"));

        assert!(matches!(
            isolate.process_unhandled_rejections(&stopper),
            Err(RuntimeError::Terminated)
        ));
        isolate.cancel_terminate_execution();
        let rest = isolate.take_unhandled_rejections();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].reason, Value::from("second"));
    }

    #[test]
    fn test_without_tracking_no_frames_are_attached() {
        let mut isolate = Isolate::new(IsolateConfig {
            track_async_context: false,
            ..IsolateConfig::default()
        });
        let key = StorageKey::new("k");
        let frame = frame_with(&isolate, &key, Value::from(1));
        let _scope = isolate.enter_scope(frame);
        let promise = isolate.new_promise();
        assert!(promise.context_frame().is_none());
    }
}
