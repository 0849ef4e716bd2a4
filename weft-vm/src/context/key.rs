use std::{
    fmt::Debug,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use rustc_hash::FxHasher;

static NEXT_KEY_SERIAL: AtomicU64 = AtomicU64::new(1);

/// 标识上下文帧中一个存储单元的不透明键。
///
/// 键由创建它的设施持有（例如每个 `AsyncLocalStorage` 一个），帧通过 `Arc` 共享所有权。
/// 设施销毁时调用 [`StorageKey::mark_dead`]，之后所有帧都把这个键视为不存在，
/// 并在下一次读写时惰性清除对应的单元。
pub struct StorageKey {
    hash: u64,
    dead: AtomicBool,
}

impl StorageKey {
    pub fn new(label: &str) -> Arc<Self> {
        let serial = NEXT_KEY_SERIAL.fetch_add(1, Ordering::Relaxed);
        let mut hasher = FxHasher::default();
        label.hash(&mut hasher);
        serial.hash(&mut hasher);
        Arc::new(StorageKey {
            hash: hasher.finish(),
            dead: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }
}

impl Debug for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageKey({:#x}, dead: {})", self.hash, self.is_dead())
    }
}

/// 帧内表的索引键：哈希用键自带的哈希值，相等只看身份。
#[derive(Clone)]
pub(crate) struct CellKey(pub(crate) Arc<StorageKey>);

impl CellKey {
    #[inline(always)]
    pub(crate) fn is_dead(&self) -> bool {
        self.0.is_dead()
    }
}

impl Hash for CellKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_code());
    }
}

impl PartialEq for CellKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CellKey {}
