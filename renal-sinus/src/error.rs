//! 运行时错误.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::Idx3d;

/// 单个病例处理过程中的错误.
#[derive(Debug, Error)]
pub enum SinusError {
    /// 病例缺少必需的输入文件.
    #[error("missing input file `{}`", .0.display())]
    MissingInput(PathBuf),

    /// 肾脏连通域不足两个, 无法区分两侧肾脏.
    #[error("expected at least 2 kidney components, found {found}")]
    InsufficientComponents {
        /// 实际找到的连通域个数.
        found: usize,
    },

    /// 成对的扫描与标注形状不一致.
    #[error("scan shape {scan:?} does not match label shape {label:?}")]
    ShapeMismatch {
        /// 扫描形状 (z, H, W).
        scan: Idx3d,
        /// 标注形状 (z, H, W).
        label: Idx3d,
    },

    /// nii 文件读写错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 体数据维度不符合要求.
    #[error("unexpected volume layout: {0}")]
    Layout(#[from] ndarray::ShapeError),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 标注转换错误.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

/// 旧格式标注转换错误.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AnnotationError {
    /// 分层标注缺少参考图像偏移量.
    #[error("missing `{0}` entry")]
    MissingOffset(&'static str),

    /// 参考图像偏移量不是三个整数.
    #[error("malformed reference offset `{0}`")]
    BadOffset(String),

    /// 偏移后的子体数据超出参考图像范围.
    #[error("sub-volume {shape:?} at offset {offset:?} exceeds reference shape {reference:?}")]
    OutOfReference {
        /// 子体数据形状 (z, H, W).
        shape: Idx3d,
        /// 偏移量 (z, H, W).
        offset: Idx3d,
        /// 参考图像形状 (z, H, W).
        reference: Idx3d,
    },

    /// 标注数据维度既不是 3 也不是 4.
    #[error("unsupported annotation dimensionality {0}")]
    UnsupportedDims(usize),

    /// 分层标注的层数与 header 不符.
    #[error("layer {0} has no `Segment{0}_Name` entry")]
    UnnamedLayer(usize),
}

/// 病例处理流程的阶段. 用于定位错误.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    /// 读取输入.
    Load,

    /// 两侧肾脏分离.
    Separate,

    /// 写出结果.
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Load => "load",
            Stage::Separate => "separate",
            Stage::Save => "save",
        };
        f.write_str(s)
    }
}

/// 带有病例标识和阶段信息的错误. 批处理中单个病例的失败以该类型上报.
#[derive(Debug, Error)]
#[error("case `{case}` failed at {stage}: {source}")]
pub struct CaseError {
    /// 病例标识 (病例目录名).
    pub case: String,

    /// 出错阶段.
    pub stage: Stage,

    /// 底层错误.
    #[source]
    pub source: SinusError,
}

/// 为 `Result<T, E: Into<SinusError>>` 附加病例与阶段信息.
pub trait StageContext<T> {
    /// 出错时包装为 [`CaseError`].
    fn at(self, case: &str, stage: Stage) -> Result<T, CaseError>;
}

impl<T, E: Into<SinusError>> StageContext<T> for Result<T, E> {
    #[inline]
    fn at(self, case: &str, stage: Stage) -> Result<T, CaseError> {
        self.map_err(|e| CaseError {
            case: case.to_string(),
            stage,
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_error_message() {
        let r: Result<(), SinusError> = Err(SinusError::InsufficientComponents { found: 1 });
        let e = r.at("case_00007", Stage::Separate).unwrap_err();
        assert_eq!(
            e.to_string(),
            "case `case_00007` failed at separate: expected at least 2 kidney components, found 1"
        );
    }
}
