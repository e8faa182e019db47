#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供 KiTS 格式肾脏 CT 标注的结构化信息和肾窦区域提取算法.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 只处理 KiTS 格式 (每个病例一个目录) 的数据. 其他来源的旧格式标注需要先经过
//!   `annotation` 模块转换.
//! 2. 数据错误 (文件缺失, 连通域不足等) 以 `Result` 返回, 不会导致 panic.
//!
//! # 开发计划
//!
//! ### 三维形态学操作 ✅
//!
//! 连通域标记, 最大连通域, 十字结构元腐蚀, 二值凸包.
//!
//! 实现位于 `renal-sinus/src/morph_3d`.
//!
//! ### 肾窦区域提取 ✅
//!
//! 1. 按体素个数取两侧肾脏. 不区分解剖学左右; ✅
//! 2. 单侧: 扩展包围盒, 凸包, 腐蚀, 与允许的原标签求交, 最大连通域; ✅
//! 3. 合并两侧, 重新赋值. 肾脏优先于肾窦. ✅
//!
//! 实现位于 `renal-sinus/src/sinus.rs`.
//!
//! ### 旧格式标注转换 ✅
//!
//! 分层标注与编码标注. 不负责文件解码.
//!
//! 实现位于 `renal-sinus/src/annotation.rs`.
//!
//! ### 重采样 ✅
//!
//! 标注最近邻, 扫描三次卷积. header 中的体素分辨率和仿射变换同步更新.
//!
//! 实现位于 `renal-sinus/src/resample.rs`.
//!
//! ### 批处理 ✅
//!
//! 病例列表 + 固定线程数线程池, 结果按输入顺序汇总.
//!
//! 实现位于 `renal-sinus/src/batch.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量. 顺序为 (z, H, W).
pub type Idx3d = (usize, usize, usize);

/// 三维二值掩膜, 按 (z, H, W) 组织.
pub type Mask3d = ndarray::Array3<bool>;

/// 体素谓词.
pub type Predicate = fn(u8) -> bool;

/// 3D CT nii 文件基础数据结构.
mod data;

pub use data::{BoundingBox, CtData3d, CtLabel, CtScan, NiftiHeaderAttr};

pub mod annotation;
pub mod batch;
pub mod consts;
pub mod dataset;
pub mod error;
pub mod morph_3d;
pub mod prelude;
pub mod resample;
pub mod sinus;

pub use batch::Outcome;
pub use error::{AnnotationError, CaseError, SinusError, Stage};
