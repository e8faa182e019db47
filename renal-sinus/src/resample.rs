//! 体数据重采样.
//!
//! 标注使用最近邻插值, 扫描使用可分离三次卷积插值 (Keys, `a = -0.5`).
//! 输出体素 `j` 的中心对应输入坐标 `(j + 0.5) * in / out - 0.5`, 越界采样取边缘值.

use log::{debug, info};
use ndarray::{Array3, ArrayBase, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Data, Ix3, Zip};
use nifti::NiftiHeader;

use crate::consts::filename;
use crate::dataset::Case;
use crate::error::{CaseError, SinusError, Stage, StageContext};
use crate::{CtData3d, CtLabel, CtScan, Idx3d, NiftiHeaderAttr, Outcome};

/// 三次卷积核参数.
const CUBIC_A: f64 = -0.5;

/// 按体素分辨率 `spacing` 和目标分辨率 `target` 计算新的数据形状.
/// 均为 (z, H, W) 顺序. 每个维度至少为 1.
pub fn resampled_shape(shape: Idx3d, spacing: [f64; 3], target: [f64; 3]) -> Idx3d {
    let f = |len: usize, sp: f64, t: f64| ((len as f64 * sp / t).round() as usize).max(1);
    (
        f(shape.0, spacing[0], target[0]),
        f(shape.1, spacing[1], target[1]),
        f(shape.2, spacing[2], target[2]),
    )
}

#[inline]
fn source_coord(dst: usize, in_len: usize, out_len: usize) -> f64 {
    (dst as f64 + 0.5) * in_len as f64 / out_len as f64 - 0.5
}

/// 输出索引到最近输入索引的映射表.
fn nearest_taps(in_len: usize, out_len: usize) -> Vec<usize> {
    let max = in_len.saturating_sub(1) as f64;
    (0..out_len)
        .map(|j| source_coord(j, in_len, out_len).round().clamp(0.0, max) as usize)
        .collect()
}

/// 以最近邻插值将标注 `data` 重采样到 `shape`. 输出只含输入中出现过的标签值.
pub fn resample_label<S: Data<Elem = u8>>(data: &ArrayBase<S, Ix3>, shape: Idx3d) -> Array3<u8> {
    let (z, h, w) = data.dim();
    let tz = nearest_taps(z, shape.0);
    let th = nearest_taps(h, shape.1);
    let tw = nearest_taps(w, shape.2);
    Array3::from_shape_fn(shape, |(i, j, k)| data[(tz[i], th[j], tw[k])])
}

fn cubic_weight(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// 单个输出体素的 4 个输入采样点及权重.
#[derive(Copy, Clone, Debug)]
struct Taps {
    index: [usize; 4],
    weight: [f32; 4],
}

fn cubic_taps(in_len: usize, out_len: usize) -> Vec<Taps> {
    let max = in_len as isize - 1;
    (0..out_len)
        .map(|j| {
            let x = source_coord(j, in_len, out_len);
            let base = x.floor();
            let t = x - base;
            let base = base as isize;

            let mut taps = Taps {
                index: [0; 4],
                weight: [0.0; 4],
            };
            for k in 0..4 {
                let off = k as isize - 1;
                taps.index[k] = (base + off).clamp(0, max) as usize;
                taps.weight[k] = cubic_weight(t - off as f64) as f32;
            }
            taps
        })
        .collect()
}

/// 沿 `axis` 方向将 `data` 重采样为 `out_len` 个体素.
fn resample_axis(data: ArrayView3<'_, f32>, axis: usize, out_len: usize) -> Array3<f32> {
    let taps = cubic_taps(data.len_of(Axis(axis)), out_len);
    let (z, h, w) = data.dim();
    let mut shape = [z, h, w];
    shape[axis] = out_len;
    let mut out = Array3::<f32>::zeros(shape);

    let interp = |mut dst: ArrayViewMut1<'_, f32>, src: ArrayView1<'_, f32>| {
        for (d, t) in dst.iter_mut().zip(taps.iter()) {
            *d = t
                .index
                .iter()
                .zip(t.weight.iter())
                .map(|(&i, &wt)| wt * src[i])
                .sum();
        }
    };
    let zip = Zip::from(out.lanes_mut(Axis(axis))).and(data.lanes(Axis(axis)));

    #[cfg(feature = "rayon")]
    zip.par_for_each(interp);
    #[cfg(not(feature = "rayon"))]
    zip.for_each(interp);
    out
}

/// 以三次卷积插值将扫描 `data` 重采样到 `shape`.
/// 输出被截断到输入值域内, 不会产生过冲.
pub fn resample_scan<S: Data<Elem = f32>>(data: &ArrayBase<S, Ix3>, shape: Idx3d) -> Array3<f32> {
    let mut cur = data.to_owned();
    for (axis, len) in [shape.0, shape.1, shape.2].into_iter().enumerate() {
        if cur.len_of(Axis(axis)) != len {
            cur = resample_axis(cur.view(), axis, len);
        }
    }

    let lo = data.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if lo <= hi {
        cur.mapv_inplace(|v| v.clamp(lo, hi));
    }
    cur
}

/// 按新旧形状 (z, H, W) 调整 header 的体素分辨率和仿射变换.
///
/// 每个方向的体素尺寸放大 `old / new` 倍, 原点移动到新的第一个体素中心.
pub fn rescaled_header(header: &NiftiHeader, old: Idx3d, new: Idx3d) -> NiftiHeader {
    let mut ans = header.clone();
    // nii 的 (i, j, k) 即 (W, H, z), 对应 pixdim[1..=3] 和 srow 的前三列.
    let ratio = [
        old.2 as f64 / new.2 as f64,
        old.1 as f64 / new.1 as f64,
        old.0 as f64 / new.0 as f64,
    ];
    let mut shift = [0.0f64; 3];

    for (c, r) in ratio.into_iter().enumerate() {
        ans.pixdim[c + 1] = (header.pixdim[c + 1] as f64 * r) as f32;
        let delta = 0.5 * r - 0.5;
        for (s, row) in shift
            .iter_mut()
            .zip([&mut ans.srow_x, &mut ans.srow_y, &mut ans.srow_z])
        {
            *s += row[c] as f64 * delta;
            row[c] = (row[c] as f64 * r) as f32;
        }
    }

    for (s, row) in shift
        .iter()
        .zip([&mut ans.srow_x, &mut ans.srow_y, &mut ans.srow_z])
    {
        row[3] += *s as f32;
    }
    ans.quatern_x += shift[0] as f32;
    ans.quatern_y += shift[1] as f32;
    ans.quatern_z += shift[2] as f32;
    ans
}

/// 将成对的扫描和标注重采样到目标体素分辨率 `target` (z, H, W).
///
/// 新形状由扫描的体素分辨率决定, 标注与扫描共用该形状.
pub fn resample_pair(data: &CtData3d, target: [f64; 3]) -> (CtScan, CtLabel) {
    let old = data.scan.shape();
    let new = resampled_shape(old, data.scan.pix_dim(), target);
    debug!("resample {old:?} -> {new:?}, spacing {:?}", data.scan.pix_dim());

    let scan = CtScan::with_header(
        &rescaled_header(data.scan.header(), old, new),
        resample_scan(&data.scan.data(), new),
    );
    let label = CtLabel::with_header(
        &rescaled_header(data.label.header(), old, new),
        resample_label(&data.label.data(), new),
    );
    (scan, label)
}

/// 处理单个病例: 读取 `imaging.nii.gz` 和 `segmentation_sinus.nii.gz`,
/// 重采样后写出 `imaging_r.nii.gz` 和 `segmentation_sinus_r.nii.gz`.
///
/// 两个输出文件都已存在时跳过.
pub fn resample_case(case: &Case, target: [f64; 3]) -> Result<Outcome, CaseError> {
    let id = case.id();
    let scan_dst = case.file(filename::IMAGING_RESAMPLED);
    let label_dst = case.file(filename::SEGMENTATION_SINUS_RESAMPLED);
    if scan_dst.exists() && label_dst.exists() {
        info!("[{id}] resampled files exist, skipped");
        return Ok(Outcome::Skipped(label_dst));
    }

    let scan_src = case.file(filename::IMAGING);
    let label_src = case.file(filename::SEGMENTATION_SINUS);
    for src in [&scan_src, &label_src] {
        if !src.is_file() {
            return Err(SinusError::MissingInput(src.clone())).at(id, Stage::Load);
        }
    }
    let data = CtData3d::open(&scan_src, &label_src).at(id, Stage::Load)?;

    let (scan, label) = resample_pair(&data, target);
    scan.save(&scan_dst).at(id, Stage::Save)?;
    label.save(&label_dst).at(id, Stage::Save)?;
    info!("[{id}] resampled to {:?}, saved", label.shape());
    Ok(Outcome::Saved(label_dst))
}
