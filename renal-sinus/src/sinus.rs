//! 肾窦区域提取.
//!
//! 从多标签标注出发: 标记肾脏 (标签 1) 的连通域, 取体素个数最多的两个作为两侧肾脏.
//! 每一侧在扩展后的包围盒内求 3D 凸包, 贴回全尺寸掩膜后腐蚀, 再与允许的原标签求交,
//! 保留最大连通域作为该侧肾窦. 最后合并两侧结果并重新赋值: 肾窦为 4, 两侧肾脏为 1.
//!
//! 两侧肾脏只按体素个数区分, 不判断解剖学上的左右.

use log::{debug, info};
use ndarray::Array3;

use crate::consts::gray::*;
use crate::consts::{filename, DEFAULT_CROP_MARGIN, DEFAULT_EROSION_ITERATIONS};
use crate::data::BoundingBox;
use crate::dataset::Case;
use crate::error::{CaseError, SinusError, Stage, StageContext};
use crate::morph_3d::{
    binary_erosion, convex_hull_3d, count_foreground, intersect_assign, label_components,
    largest_component, union_assign, Connectivity,
};
use crate::{CtLabel, Mask3d, NiftiHeaderAttr, Outcome};

/// 肾窦提取参数.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SinusParams {
    /// 肾脏包围盒向外扩展的体素数.
    pub margin: usize,

    /// 凸包腐蚀的迭代次数.
    pub erosion_iterations: usize,

    /// 肾窦允许占据的原标签. 默认只有背景和肾窦, 即肾窦只会扩展到这些区域.
    pub allowed_labels: Vec<u8>,

    /// 连通域标记规则. 同时用于两侧肾脏分离和肾窦最大连通域选取.
    pub connectivity: Connectivity,
}

impl Default for SinusParams {
    fn default() -> Self {
        Self {
            margin: DEFAULT_CROP_MARGIN,
            erosion_iterations: DEFAULT_EROSION_ITERATIONS,
            allowed_labels: vec![KITS_BACKGROUND, KITS_SINUS],
            connectivity: Connectivity::Full,
        }
    }
}

/// 分离得到的两侧肾脏掩膜.
#[derive(Clone, Debug)]
pub struct KidneySides {
    /// 体素个数最多的一侧.
    pub major: Mask3d,

    /// 体素个数第二多的一侧.
    pub minor: Mask3d,
}

impl KidneySides {
    /// 两侧掩膜的并集.
    pub fn union(&self) -> Mask3d {
        let mut ans = self.major.clone();
        union_assign(&mut ans, &self.minor);
        ans
    }
}

/// 将标签为肾脏的体素按连通域分离为两侧.
///
/// 连通域按体素个数升序 (稳定) 排列, 最后两个即为两侧肾脏.
/// 连通域不足两个时返回 [`SinusError::InsufficientComponents`].
pub fn separate_kidneys(label: &CtLabel, conn: Connectivity) -> Result<KidneySides, SinusError> {
    let kidney = label.mask(is_kidney);
    let components = label_components(&kidney, conn);
    let ranking = components.ranking();

    let &[.., minor, major] = ranking.as_slice() else {
        return Err(SinusError::InsufficientComponents {
            found: ranking.len(),
        });
    };
    debug!(
        "{} kidney components, two largest: {:?} / {:?} voxels",
        ranking.len(),
        components.size_of(major),
        components.size_of(minor),
    );
    Ok(KidneySides {
        major: components.mask_of(major),
        minor: components.mask_of(minor),
    })
}

/// 计算单侧肾脏 `side` 对应的肾窦掩膜. `label` 为原始标注, 用于限定肾窦可占据的区域.
///
/// `side` 为全背景时返回全背景掩膜.
pub fn refine_side(label: &CtLabel, side: &Mask3d, params: &SinusParams) -> Mask3d {
    let shape = side.dim();
    let Some(tight) = BoundingBox::of_mask(side) else {
        return Array3::from_elem(shape, false);
    };
    let roi = tight.expand_clamped(params.margin, shape);

    let hull = convex_hull_3d(&roi.crop(side));
    let mut sinus = Array3::from_elem(shape, false);
    roi.crop_mut(&mut sinus).assign(&hull);

    let mut sinus = binary_erosion(&sinus, params.erosion_iterations);
    intersect_assign(&mut sinus, &label.mask_of(&params.allowed_labels));
    let sinus = largest_component(&sinus, params.connectivity);

    debug!(
        "side roi {:?}..{:?}: hull {} voxels, sinus {} voxels",
        roi.lower(),
        roi.upper(),
        count_foreground(&hull),
        count_foreground(&sinus),
    );
    sinus
}

/// 由原始标注、两侧肾脏和合并后的肾窦掩膜拼装最终标注.
///
/// 1. 肾窦体素置为 4;
/// 2. 剩余的旧肾脏体素置为 0 (不属于两侧肾脏的小连通域随之消失);
/// 3. 两侧肾脏体素置为 1. 与肾窦重叠时肾脏优先.
///
/// 其他标签 (肿瘤, 囊肿) 保持不变, header 沿用原始标注.
pub fn assemble(label: &CtLabel, sides: &KidneySides, sinus: &Mask3d) -> CtLabel {
    let mut ans = label.clone();
    ans.paint(sinus, KITS_SINUS);
    ans.replace(KITS_KIDNEY, KITS_BACKGROUND);
    ans.paint(&sides.major, KITS_KIDNEY);
    ans.paint(&sides.minor, KITS_KIDNEY);
    ans
}

/// 对多标签标注 `label` 执行完整的肾窦提取, 返回新的标注.
pub fn extract_sinus(label: &CtLabel, params: &SinusParams) -> Result<CtLabel, SinusError> {
    let sides = separate_kidneys(label, params.connectivity)?;
    let sinus = merged_sinus(label, &sides, params);
    Ok(assemble(label, &sides, &sinus))
}

/// 两侧肾窦掩膜的并集.
fn merged_sinus(label: &CtLabel, sides: &KidneySides, params: &SinusParams) -> Mask3d {
    let mut sinus = refine_side(label, &sides.major, params);
    union_assign(&mut sinus, &refine_side(label, &sides.minor, params));
    sinus
}

/// 处理单个病例: 读取 `segmentation.nii.gz`, 提取肾窦, 写出 `segmentation_sinus.nii.gz`.
///
/// 输出文件已存在时直接跳过. 只有全部计算成功后才会写文件, 失败的病例不会留下输出.
pub fn process_case(case: &Case, params: &SinusParams) -> Result<Outcome, CaseError> {
    let id = case.id();
    let dst = case.file(filename::SEGMENTATION_SINUS);
    if dst.exists() {
        info!("[{id}] `{}` exists, skipped", dst.display());
        return Ok(Outcome::Skipped(dst));
    }

    let src = case.file(filename::SEGMENTATION);
    if !src.is_file() {
        return Err(SinusError::MissingInput(src)).at(id, Stage::Load);
    }
    let label = CtLabel::open(&src).at(id, Stage::Load)?;
    debug!("[{id}] shape {:?}, spacing {:?}", label.shape(), label.pix_dim());

    let sides = separate_kidneys(&label, params.connectivity).at(id, Stage::Separate)?;
    let sinus = merged_sinus(&label, &sides, params);
    let ans = assemble(&label, &sides, &sinus);

    ans.save(&dst).at(id, Stage::Save)?;
    let [_, kidney, _, _, sinus] = ans.numeric_statistics();
    info!(
        "[{id}] saved `{}`: kidney {kidney}, sinus {sinus} ({:.1} ml)",
        dst.display(),
        sinus as f64 * ans.voxel() / 1000.0
    );
    Ok(Outcome::Saved(dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use std::fs;

    /// 在 `data` 中画一个边长为 `outer` 的空心肾脏立方体, 壁厚 `wall`. 返回空腔体素数.
    fn hollow_kidney(data: &mut Array3<u8>, at: usize, outer: usize, wall: usize) -> usize {
        let (lo, hi) = (at, at + outer);
        data.slice_mut(s![lo..hi, lo..hi, lo..hi]).fill(KITS_KIDNEY);
        let (clo, chi) = (lo + wall, hi - wall);
        data.slice_mut(s![clo..chi, clo..chi, clo..chi])
            .fill(KITS_BACKGROUND);
        (chi - clo).pow(3)
    }

    fn two_hollow_kidneys() -> (CtLabel, usize, usize) {
        let mut data = Array3::<u8>::zeros((40, 40, 40));
        let big = hollow_kidney(&mut data, 5, 15, 3);
        let small = hollow_kidney(&mut data, 25, 11, 3);
        (CtLabel::fake(data, [1.0, 1.0, 1.0]), big, small)
    }

    #[test]
    fn test_default_params() {
        let p = SinusParams::default();
        assert_eq!(p.margin, 5);
        assert_eq!(p.erosion_iterations, 3);
        assert_eq!(p.allowed_labels, vec![0, 4]);
        assert!((0..=u8::MAX).all(|v| p.allowed_labels.contains(&v) == is_background_or_sinus(v)));
        assert_eq!(p.connectivity, Connectivity::Full);
    }

    #[test]
    fn test_separate_needs_two_components() {
        let mut data = Array3::<u8>::zeros((6, 6, 6));
        let label = CtLabel::fake(data.clone(), [1.0; 3]);
        assert!(matches!(
            separate_kidneys(&label, Connectivity::Full),
            Err(SinusError::InsufficientComponents { found: 0 })
        ));

        data.slice_mut(s![1..3, 1..3, 1..3]).fill(KITS_KIDNEY);
        let label = CtLabel::fake(data, [1.0; 3]);
        assert!(matches!(
            extract_sinus(&label, &SinusParams::default()),
            Err(SinusError::InsufficientComponents { found: 1 })
        ));
    }

    #[test]
    fn test_separate_picks_two_largest() {
        let mut data = Array3::<u8>::zeros((20, 20, 20));
        data.slice_mut(s![0..2, 0..2, 0..2]).fill(KITS_KIDNEY);
        data.slice_mut(s![5..9, 5..9, 5..9]).fill(KITS_KIDNEY);
        data.slice_mut(s![12..15, 12..15, 12..15]).fill(KITS_KIDNEY);
        let label = CtLabel::fake(data, [1.0; 3]);

        let sides = separate_kidneys(&label, Connectivity::Full).unwrap();
        assert_eq!(count_foreground(&sides.major), 64);
        assert_eq!(count_foreground(&sides.minor), 27);
        assert!(sides.major[(6, 6, 6)]);
        assert!(sides.minor[(13, 13, 13)]);
        assert_eq!(count_foreground(&sides.union()), 91);
    }

    #[test]
    fn test_two_hollow_kidneys() {
        let (mut label, big, small) = two_hollow_kidneys();
        // 肿瘤位于大肾脏空腔内, 囊肿远离肾脏.
        label[(12, 12, 12)] = KITS_TUMOR;
        label[(38, 0, 0)] = KITS_CYST;
        let kidney_before = label.mask(is_kidney);

        let out = extract_sinus(&label, &SinusParams::default()).unwrap();
        let [_, kidney, tumor, cyst, sinus] = out.numeric_statistics();
        assert_eq!(kidney, label.count(KITS_KIDNEY));
        assert_eq!(tumor, 1);
        assert_eq!(cyst, 1);
        assert_eq!(sinus, big - 1 + small);

        assert!(kidney_before
            .indexed_iter()
            .all(|(p, &k)| !k || out[p] == KITS_KIDNEY));
        assert_eq!(out[(12, 12, 12)], KITS_TUMOR);
        assert_eq!(out[(38, 0, 0)], KITS_CYST);
        assert_eq!(out[(10, 10, 10)], KITS_SINUS);
        assert_eq!(out[(30, 30, 30)], KITS_SINUS);
        // 两个肾脏之间的背景不属于肾窦.
        assert_eq!(out[(22, 22, 22)], KITS_BACKGROUND);
    }

    #[test]
    fn test_solid_cubes_have_no_sinus() {
        let mut data = Array3::<u8>::zeros((50, 50, 50));
        data.slice_mut(s![5..15, 5..15, 5..15]).fill(KITS_KIDNEY);
        data.slice_mut(s![35..45, 35..45, 35..45]).fill(KITS_KIDNEY);
        let label = CtLabel::fake(data, [1.0; 3]);

        let out = extract_sinus(&label, &SinusParams::default()).unwrap();
        assert_eq!(out.numeric_statistics(), [125_000 - 2000, 2000, 0, 0, 0]);
        assert_eq!(out[(10, 10, 10)], KITS_KIDNEY);
        assert_eq!(out[(40, 40, 40)], KITS_KIDNEY);
    }

    #[test]
    fn test_small_kidney_fragments_are_cleared() {
        let (mut label, big, small) = two_hollow_kidneys();
        label[(0, 39, 39)] = KITS_KIDNEY;
        let out = extract_sinus(&label, &SinusParams::default()).unwrap();
        assert_eq!(out[(0, 39, 39)], KITS_BACKGROUND);
        assert_eq!(out.count(KITS_SINUS), big + small);
    }

    #[test]
    fn test_kidney_wins_over_sinus() {
        let mut data = Array3::<u8>::zeros((10, 10, 10));
        data.slice_mut(s![1..3, 1..3, 1..3]).fill(KITS_KIDNEY);
        data.slice_mut(s![6..8, 6..8, 6..8]).fill(KITS_KIDNEY);
        let label = CtLabel::fake(data, [1.0; 3]);
        let sides = separate_kidneys(&label, Connectivity::Full).unwrap();

        let mut sinus = Array3::from_elem((10, 10, 10), false);
        sinus.slice_mut(s![0..4, 0..4, 0..4]).fill(true);
        let out = assemble(&label, &sides, &sinus);
        assert_eq!(out[(1, 1, 1)], KITS_KIDNEY);
        assert_eq!(out[(0, 0, 0)], KITS_SINUS);
        assert_eq!(out.count(KITS_SINUS), 64 - 8);
        assert_eq!(out.count(KITS_KIDNEY), 16);
    }

    #[test]
    fn test_kidney_touching_border() {
        let mut data = Array3::<u8>::zeros((20, 20, 20));
        let corner = hollow_kidney(&mut data, 0, 9, 3);
        let other = hollow_kidney(&mut data, 11, 9, 3);
        let label = CtLabel::fake(data, [1.0; 3]);

        let out = extract_sinus(&label, &SinusParams::default()).unwrap();
        assert_eq!(out.count(KITS_SINUS), corner + other);
        assert_eq!(out[(4, 4, 4)], KITS_SINUS);
        assert_eq!(out[(15, 15, 15)], KITS_SINUS);
    }

    #[test]
    fn test_process_case_skips_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let case_dir = dir.path().join("case_00000");
        fs::create_dir(&case_dir).unwrap();
        let (label, big, small) = two_hollow_kidneys();
        label.save(case_dir.join(filename::SEGMENTATION)).unwrap();

        let case = Case::new(&case_dir);
        let params = SinusParams::default();
        let dst = case_dir.join(filename::SEGMENTATION_SINUS);
        assert_eq!(process_case(&case, &params).unwrap(), Outcome::Saved(dst.clone()));
        let saved = CtLabel::open(&dst).unwrap();
        assert_eq!(saved.count(KITS_SINUS), big + small);

        let modified = fs::metadata(&dst).unwrap().modified().unwrap();
        let bytes = fs::read(&dst).unwrap();
        assert_eq!(process_case(&case, &params).unwrap(), Outcome::Skipped(dst.clone()));
        assert_eq!(fs::metadata(&dst).unwrap().modified().unwrap(), modified);
        assert_eq!(fs::read(&dst).unwrap(), bytes);
    }

    #[test]
    fn test_process_case_reports_stage() {
        let dir = tempfile::tempdir().unwrap();
        let case = Case::new(dir.path());
        let e = process_case(&case, &SinusParams::default()).unwrap_err();
        assert_eq!(e.stage, Stage::Load);
        assert!(matches!(e.source, SinusError::MissingInput(_)));

        let mut data = Array3::<u8>::zeros((6, 6, 6));
        data[(2, 2, 2)] = KITS_KIDNEY;
        CtLabel::fake(data, [1.0; 3])
            .save(dir.path().join(filename::SEGMENTATION))
            .unwrap();
        let e = process_case(&case, &SinusParams::default()).unwrap_err();
        assert_eq!(e.stage, Stage::Separate);
        assert!(!dir.path().join(filename::SEGMENTATION_SINUS).exists());
    }
}
