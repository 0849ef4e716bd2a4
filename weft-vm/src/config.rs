/// isolate 的构造参数。
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde_support",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct IsolateConfig {
    /// GC 触发阈值（字节），`None` 使用 GC 的默认策略
    pub gc_memory_threshold: Option<usize>,
    /// 是否安装异步上下文传播钩子
    pub track_async_context: bool,
    /// `After` 信号到达时检查栈顶是否与 promise 的标记一致，不一致直接 panic
    pub assert_scope_pairing: bool,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        IsolateConfig {
            gc_memory_threshold: None,
            track_async_context: true,
            assert_scope_pairing: cfg!(debug_assertions),
        }
    }
}

#[cfg(all(test, feature = "serde_support"))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: IsolateConfig =
            serde_json::from_str(r#"{ "gc_memory_threshold": 1048576 }"#).unwrap();
        assert_eq!(config.gc_memory_threshold, Some(1024 * 1024));
        assert!(config.track_async_context);
        assert_eq!(config.assert_scope_pairing, cfg!(debug_assertions));
    }
}
