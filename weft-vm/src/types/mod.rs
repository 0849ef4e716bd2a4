//! weft 运行时核心类型模块。
//!
//! # 子模块
//! - `value`：引擎值（原始值与堆对象句柄）
//! - `object`：GC 堆上的对象单元，带隐藏的上下文槽位
//! - `function`：原生函数
//! - `promise`：Promise 状态与 reaction

pub mod function;
pub mod object;
pub mod promise;
pub mod value;
