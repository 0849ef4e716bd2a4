use std::collections::VecDeque;

use arc_gc::{arc::GCArcWeak, traceable::GCTraceable};

use super::{
    object::ObjectCell,
    value::{HeapValue, Value},
};

/// promise 状态的快照。
#[derive(Clone, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// 一个已经确定的结果，reaction job 携带它进入微任务队列。
#[derive(Clone, Debug)]
pub enum Settlement {
    Fulfilled(Value),
    Rejected(Value),
}

impl Settlement {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    fn downgrade(&self) -> SettledSlot {
        match self {
            Settlement::Fulfilled(value) => SettledSlot::Fulfilled(value.downgrade()),
            Settlement::Rejected(reason) => SettledSlot::Rejected(reason.downgrade()),
        }
    }
}

impl From<Settlement> for PromiseState {
    fn from(settlement: Settlement) -> Self {
        match settlement {
            Settlement::Fulfilled(value) => PromiseState::Fulfilled(value),
            Settlement::Rejected(reason) => PromiseState::Rejected(reason),
        }
    }
}

/// `then` 注册的一次 reaction。handler 为空时结果原样透传给 derived。
///
/// 这是堆外的形式（持有强引用），排队中的 job 靠它保持 handler 与 derived 存活。
#[derive(Clone, Debug)]
pub struct PromiseReaction {
    pub(crate) on_fulfilled: Option<Value>,
    pub(crate) on_rejected: Option<Value>,
    pub(crate) derived: Value,
}

impl PromiseReaction {
    pub fn new(on_fulfilled: Option<Value>, on_rejected: Option<Value>, derived: Value) -> Self {
        PromiseReaction {
            on_fulfilled,
            on_rejected,
            derived,
        }
    }

    pub fn handler_for(&self, settlement: &Settlement) -> Option<Value> {
        match settlement {
            Settlement::Fulfilled(_) => self.on_fulfilled.clone(),
            Settlement::Rejected(_) => self.on_rejected.clone(),
        }
    }

    pub fn derived(&self) -> &Value {
        &self.derived
    }

    fn downgrade(&self) -> StoredReaction {
        StoredReaction {
            on_fulfilled: self.on_fulfilled.as_ref().map(Value::downgrade),
            on_rejected: self.on_rejected.as_ref().map(Value::downgrade),
            derived: self.derived.downgrade(),
        }
    }
}

/// 挂在 pending promise 上的 reaction，只持有弱引用。
struct StoredReaction {
    on_fulfilled: Option<HeapValue>,
    on_rejected: Option<HeapValue>,
    derived: HeapValue,
}

impl StoredReaction {
    fn upgrade(&self) -> Option<PromiseReaction> {
        let upgrade_handler = |handler: &Option<HeapValue>| match handler {
            Some(handler) => handler.upgrade().map(Some),
            None => Some(None),
        };
        Some(PromiseReaction {
            on_fulfilled: upgrade_handler(&self.on_fulfilled)?,
            on_rejected: upgrade_handler(&self.on_rejected)?,
            derived: self.derived.upgrade()?,
        })
    }
}

impl GCTraceable<ObjectCell> for StoredReaction {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        if let Some(handler) = &self.on_fulfilled {
            handler.collect(queue);
        }
        if let Some(handler) = &self.on_rejected {
            handler.collect(queue);
        }
        self.derived.collect(queue);
    }
}

enum SettledSlot {
    Fulfilled(HeapValue),
    Rejected(HeapValue),
}

impl SettledSlot {
    fn upgrade(&self) -> Settlement {
        // promise 存活时结果一定可达，取不回只会发生在 promise 自身正在被回收时
        match self {
            SettledSlot::Fulfilled(value) => Settlement::Fulfilled(value.upgrade().unwrap_or_default()),
            SettledSlot::Rejected(reason) => Settlement::Rejected(reason.upgrade().unwrap_or_default()),
        }
    }
}

pub struct PromiseData {
    settled: Option<SettledSlot>,
    reactions: Vec<StoredReaction>,
    handled: bool,
}

impl PromiseData {
    pub fn pending() -> Self {
        PromiseData {
            settled: None,
            reactions: Vec::new(),
            handled: false,
        }
    }

    pub fn settled(settlement: Settlement) -> Self {
        PromiseData {
            settled: Some(settlement.downgrade()),
            reactions: Vec::new(),
            handled: false,
        }
    }

    pub fn state(&self) -> PromiseState {
        match self.settlement() {
            Some(settlement) => settlement.into(),
            None => PromiseState::Pending,
        }
    }

    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        self.settled.is_none()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.settled, Some(SettledSlot::Rejected(_)))
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn settlement(&self) -> Option<Settlement> {
        self.settled.as_ref().map(SettledSlot::upgrade)
    }

    /// 确定结果并取走所有等待中的 reaction，返回值为 (reactions, 是否已有处理者)。
    pub(crate) fn settle(&mut self, settlement: &Settlement) -> (Vec<PromiseReaction>, bool) {
        self.settled = Some(settlement.downgrade());
        let reactions = std::mem::take(&mut self.reactions)
            .iter()
            .filter_map(StoredReaction::upgrade)
            .collect();
        (reactions, self.handled)
    }

    /// 注册 reaction。已确定的 promise 直接返回结果，由调用方立即排队 job。
    pub(crate) fn add_reaction(&mut self, reaction: PromiseReaction) -> Option<(PromiseReaction, Settlement)> {
        self.handled = true;
        match self.settlement() {
            Some(settlement) => Some((reaction, settlement)),
            None => {
                self.reactions.push(reaction.downgrade());
                None
            }
        }
    }
}

impl GCTraceable<ObjectCell> for PromiseData {
    fn collect(&self, queue: &mut VecDeque<GCArcWeak<ObjectCell>>) {
        match &self.settled {
            None => {}
            Some(SettledSlot::Fulfilled(value) | SettledSlot::Rejected(value)) => value.collect(queue),
        }
        for reaction in &self.reactions {
            reaction.collect(queue);
        }
    }
}

impl std::fmt::Debug for PromiseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PromiseData({:?}, {} reactions, handled: {})",
            self.state(),
            self.reactions.len(),
            self.handled
        )
    }
}
