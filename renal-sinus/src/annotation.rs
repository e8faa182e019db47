//! 旧格式分割标注转换.
//!
//! 旧标注有两种组织方式, 数据均按 (x, y, z) 存储:
//!
//! 1. 分层标注: 4D 数据, 每个分割一层二值数据, 层名为 `Segment{i}_Name`.
//!   数据只覆盖参考图像的一个子区域, 偏移量由 `Segmentation_ReferenceImageExtentOffset` 给出;
//! 2. 编码标注: 3D 整数数据, 分割 `i` 的体素值为 `Segment{i}_LabelValue`.
//!
//! 转换结果为 (z, H, W) 组织的 KiTS 多标签数据, 沿用参考扫描的 header.
//! 文件解码不在本模块范围内; 调用方用 [`Converted::label`] 的 `save`
//! 写出 nii 文件, 例如 `converted.label.save(case.file(filename::SEGMENTATION))`.

use std::collections::BTreeMap;
use std::str::FromStr;

use log::{debug, warn};
use ndarray::{s, Array3, ArrayBase, ArrayView3, ArrayViewD, Axis, Data, Ix3, Ix4};
use thiserror::Error;

use crate::consts::gray::*;
use crate::error::{AnnotationError, SinusError};
use crate::{CtLabel, CtScan, Idx3d, NiftiHeaderAttr};

/// 参考图像偏移量的 header 键.
pub const REFERENCE_OFFSET_KEY: &str = "Segmentation_ReferenceImageExtentOffset";

/// 编码标注中最多检查的分割个数.
pub const MAX_CODED_SEGMENTS: usize = 100;

/// 分割类别.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SegmentClass {
    /// 肾脏.
    Kidney,

    /// 肿瘤.
    Mass,

    /// 囊肿.
    Cyst,
}

impl SegmentClass {
    /// 按匹配优先级排列的全部类别.
    pub const ALL: [SegmentClass; 3] = [Self::Kidney, Self::Mass, Self::Cyst];

    /// 该类别的完整名称表. 第一个为类别的基本名称.
    pub const fn names(&self) -> &'static [&'static str] {
        match self {
            Self::Kidney => &["kidney", "Rk", "Lk"],
            Self::Mass => &["mass", "Rsrm", "Lsrm"],
            Self::Cyst => &["cyst", "Rcyst", "Lcyst"],
        }
    }

    /// 对应的 KiTS 标签值.
    pub const fn label(&self) -> u8 {
        match self {
            Self::Kidney => KITS_KIDNEY,
            Self::Mass => KITS_TUMOR,
            Self::Cyst => KITS_CYST,
        }
    }

    /// 根据分割名识别类别 (忽略大小写).
    ///
    /// 先按完整名称表精确匹配, 再检查名字中是否含有类别的基本名称 (如 `"left kidney"`).
    /// 两轮匹配都按肾脏, 肿瘤, 囊肿的顺序进行.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let lower = name.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.names().iter().any(|n| n.eq_ignore_ascii_case(name)))
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|c| lower.contains(c.names()[0]))
            })
    }
}

/// 分割标注 header 中的键值对.
///
/// 接受 `key:=value` (自定义键值对) 和 `field: value` (标准字段) 两种行,
/// 忽略空行, 以 `#` 开头的注释行和没有分隔符的行 (如魔数行).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AnnotationHeader {
    entries: BTreeMap<String, String>,
}

impl FromStr for AnnotationHeader {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(":=").or_else(|| line.split_once(": ")))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Ok(Self { entries })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnnotationHeader {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl AnnotationHeader {
    /// 获取 `key` 对应的值.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 插入或覆盖键值对.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 键值对个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否不含任何键值对?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 第 `i` 个分割的名称.
    #[inline]
    pub fn segment_name(&self, i: usize) -> Option<&str> {
        self.get(&format!("Segment{i}_Name"))
    }

    /// 第 `i` 个分割的体素编码 (未解析).
    #[inline]
    pub fn segment_value(&self, i: usize) -> Option<&str> {
        self.get(&format!("Segment{i}_LabelValue"))
    }

    /// 解析参考图像偏移量, 并转换为 (z, H, W) 顺序.
    pub fn reference_offset(&self) -> Result<Idx3d, AnnotationError> {
        let raw = self
            .get(REFERENCE_OFFSET_KEY)
            .ok_or(AnnotationError::MissingOffset(REFERENCE_OFFSET_KEY))?;
        let parsed: Result<Vec<usize>, _> = raw.split_whitespace().map(str::parse).collect();
        match parsed.as_deref() {
            Ok(&[x, y, z]) => Ok((z, y, x)),
            _ => Err(AnnotationError::BadOffset(raw.to_string())),
        }
    }
}

/// 编码标注中被跳过的分割条目.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MalformedEntry {
    /// 有名称但缺少体素编码.
    #[error("segment {index} `{name}` has no label value")]
    MissingValue {
        /// 分割序号.
        index: usize,
        /// 分割名称.
        name: String,
    },

    /// 体素编码不是整数.
    #[error("segment {index} has malformed label value `{value}`")]
    BadValue {
        /// 分割序号.
        index: usize,
        /// 原始编码文本.
        value: String,
    },

    /// 名称无法识别.
    #[error("segment {index} has unrecognised name `{name}`")]
    UnknownName {
        /// 分割序号.
        index: usize,
        /// 分割名称.
        name: String,
    },
}

/// 将 (x, y, z) 组织的数据转换为 (z, H, W) 组织的标准布局数据.
fn reversed_axes(data: Array3<u8>) -> Array3<u8> {
    let data = data.reversed_axes();
    if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().into_owned()
    }
}

/// 转换分层标注.
///
/// `layers` 形状为 (层数, x, y, z), 每层中值为 1 的体素属于该层的分割.
/// 后出现的层覆盖先出现的层. 名称无法识别的层被忽略.
/// 结果按偏移量放入形状为 `reference` (z, H, W) 的全背景数据中.
pub fn convert_layered<S>(
    layers: &ArrayBase<S, Ix4>,
    header: &AnnotationHeader,
    reference: Idx3d,
) -> Result<Array3<u8>, AnnotationError>
where
    S: Data<Elem = i32>,
{
    let (_, x, y, z) = layers.dim();
    let mut raw = Array3::<u8>::zeros((x, y, z));
    for (i, layer) in layers.axis_iter(Axis(0)).enumerate() {
        let name = header
            .segment_name(i)
            .ok_or(AnnotationError::UnnamedLayer(i))?;
        let Some(class) = SegmentClass::from_name(name) else {
            debug!("layer {i} `{name}` ignored");
            continue;
        };
        raw.zip_mut_with(&layer, |r, &v| {
            if v == 1 {
                *r = class.label();
            }
        });
    }
    let raw = reversed_axes(raw);

    let offset = header.reference_offset()?;
    let shape = raw.dim();
    let fits = offset.0 + shape.0 <= reference.0
        && offset.1 + shape.1 <= reference.1
        && offset.2 + shape.2 <= reference.2;
    if !fits {
        return Err(AnnotationError::OutOfReference {
            shape,
            offset,
            reference,
        });
    }

    let mut ans = Array3::<u8>::zeros(reference);
    ans.slice_mut(s![
        offset.0..offset.0 + shape.0,
        offset.1..offset.1 + shape.1,
        offset.2..offset.2 + shape.2
    ])
    .assign(&raw);
    Ok(ans)
}

/// 转换编码标注. 返回 (z, H, W) 组织的结果和所有被跳过的条目.
///
/// 依次检查序号 `0..MAX_CODED_SEGMENTS` 的分割. 不存在名称的序号视为没有该分割;
/// 存在名称但编码缺失, 编码无法解析或名称无法识别的条目被跳过并记录.
pub fn convert_coded<S>(
    codes: &ArrayBase<S, Ix3>,
    header: &AnnotationHeader,
) -> (Array3<u8>, Vec<MalformedEntry>)
where
    S: Data<Elem = i32>,
{
    let mut raw = Array3::<u8>::zeros(codes.dim());
    let mut skipped = vec![];

    for index in 0..MAX_CODED_SEGMENTS {
        let Some(name) = header.segment_name(index) else {
            continue;
        };
        let entry = match (SegmentClass::from_name(name), header.segment_value(index)) {
            (_, None) => Err(MalformedEntry::MissingValue {
                index,
                name: name.to_string(),
            }),
            (None, Some(_)) => Err(MalformedEntry::UnknownName {
                index,
                name: name.to_string(),
            }),
            (Some(class), Some(value)) => value
                .trim()
                .parse::<i32>()
                .map(|code| (class, code))
                .map_err(|_| MalformedEntry::BadValue {
                    index,
                    value: value.to_string(),
                }),
        };

        match entry {
            Ok((class, code)) => raw.zip_mut_with(codes, |r, &c| {
                if c == code {
                    *r = class.label();
                }
            }),
            Err(e) => {
                warn!("{e}, skipped");
                skipped.push(e);
            }
        }
    }
    (reversed_axes(raw), skipped)
}

/// 标注转换结果.
#[derive(Clone, Debug)]
pub struct Converted {
    /// 与参考图像共享空间元信息的标注.
    pub label: CtLabel,

    /// 被跳过的编码条目. 分层标注没有该项.
    pub skipped: Vec<MalformedEntry>,
}

/// 将解码后的旧格式标注 `data` 转换为与参考扫描 `reference` 对齐的 KiTS 标注.
///
/// 4D 数据按分层标注处理, 3D 数据按编码标注处理. 编码标注转换后的形状必须与参考扫描一致.
pub fn convert_annotation(
    reference: &CtScan,
    data: ArrayViewD<'_, i32>,
    header: &AnnotationHeader,
) -> Result<Converted, SinusError> {
    let ndim = data.ndim();
    let (raw, skipped) = match ndim {
        4 => {
            let layers = data
                .into_dimensionality::<Ix4>()
                .map_err(|_| AnnotationError::UnsupportedDims(ndim))?;
            (convert_layered(&layers, header, reference.shape())?, vec![])
        }
        3 => {
            let codes: ArrayView3<'_, i32> = data
                .into_dimensionality::<Ix3>()
                .map_err(|_| AnnotationError::UnsupportedDims(ndim))?;
            let (raw, skipped) = convert_coded(&codes, header);
            if raw.dim() != reference.shape() {
                return Err(SinusError::ShapeMismatch {
                    scan: reference.shape(),
                    label: raw.dim(),
                });
            }
            (raw, skipped)
        }
        _ => return Err(AnnotationError::UnsupportedDims(ndim).into()),
    };

    Ok(Converted {
        label: CtLabel::with_header(reference.header(), raw),
        skipped,
    })
}
