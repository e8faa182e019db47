use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::gray::*;
use crate::error::SinusError;
use crate::{Idx3d, Mask3d, Predicate};

mod bbox;

pub use bbox::BoundingBox;

/// 堆上的 `NiftiHeader`. 扫描和标注都只持有该指针.
type BoxedHeader = Box<NiftiHeader>;

/// 从 header 读出 (z, H, W) 形状. 文件内的维度顺序为 (W, H, z).
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // dim[1..4] 依次为 W, H, z.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 以 (z, H, W) 格式的数据形状改写 header 的维度信息.
#[inline]
fn set_header_shape(header: &mut NiftiHeader, (z, h, w): Idx3d) {
    header.dim[0] = 3;
    header.dim[1] = w as u16;
    header.dim[2] = h as u16;
    header.dim[3] = z as u16;
    header.dim[4..].fill(1);
}

/// 先由 `write` 写出 `path` 同目录下的临时文件, 成功后再改名为 `path`.
/// `write` 失败时临时文件被删除, `path` 保持原状.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), SinusError>
where
    F: FnOnce(&Path) -> Result<(), SinusError>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    // 保留 `.nii.gz` 等完整扩展名, nifti 据此决定是否压缩.
    let suffix = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.find('.').map(|i| &name[i..]))
        .unwrap_or_default();

    let tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(suffix)
        .tempfile_in(dir)?;
    write(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// 为具体体素类型生成 nii 读写函数.
///
/// 读取结果按 (z, H, W) 组织且为标准布局; 写入时转换回 (W, H, z).
macro_rules! impl_volume_io {
    ($read: ident, $write: ident, $elem: ty) => {
        fn $read(path: &Path) -> Result<(BoxedHeader, Array3<$elem>), SinusError> {
            let obj = ReaderOptions::new().read_file(path)?;
            let header = Box::new(obj.header().clone());

            // [W, H, z] -> [z, H, W].
            // 文件中 W 变化最快, 反转轴后即为 (z, H, W).
            let data = obj
                .into_volume()
                .into_ndarray::<$elem>()?
                .into_dimensionality::<Ix3>()?
                .permuted_axes([2, 1, 0]);

            let data = if data.is_standard_layout() {
                data
            } else {
                data.as_standard_layout().into_owned()
            };
            Ok((header, data))
        }

        fn $write(
            path: &Path,
            header: &NiftiHeader,
            data: &Array3<$elem>,
        ) -> Result<(), SinusError> {
            let mut header = header.clone();
            // 体素值按原样写入, 不做线性变换.
            header.scl_slope = 1.0;
            header.scl_inter = 0.0;
            set_header_shape(&mut header, data.dim());

            // [z, H, W] -> [W, H, z].
            write_atomically(path, |tmp| {
                WriterOptions::new(tmp)
                    .reference_header(&header)
                    .write_nifti(&data.view().permuted_axes([2, 1, 0]))?;
                Ok(())
            })
        }
    };
}

impl_volume_io!(read_label, write_label, u8);
impl_volume_io!(read_scan, write_scan, f32);

/// 扫描与标注共享的 nii header 查询接口. 所有维度均按 (z, H, W) 顺序给出.
pub trait NiftiHeaderAttr {
    /// 底层 nii header.
    fn header(&self) -> &NiftiHeader;

    /// 体数据形状.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 体素总数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 体素间距 (mm), 依次为切片方向, 图像行方向, 图像列方向.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 三个方向的体素间距是否完全相等?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 单个体素体积 (mm³).
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

/// 根据 (z, H, W) 体素分辨率构造一个最简 header. 仅用于内存中直接拼接的数据.
fn plain_header(shape: Idx3d, pix_dim: [f32; 3]) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    set_header_shape(&mut header, shape);
    let [z, h, w] = pix_dim;
    header.pixdim[1] = w;
    header.pixdim[2] = h;
    header.pixdim[3] = z;
    header.intent_name[..4].copy_from_slice(b"fake");
    header
}

/// 3D CT 扫描体, HU 强度以 `f32` 存储.
#[derive(Debug, Clone)]
pub struct CtScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for CtScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for CtScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl CtScan {
    /// 读取 `path` 处的 nii 扫描. 读取失败或数据不是三维时返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinusError> {
        let (header, data) = read_scan(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 以 `header` 的空间元信息和按 (z, H, W) 组织的 `data` 创建扫描.
    /// header 的维度信息会按 `data` 的形状改写.
    pub fn with_header(header: &NiftiHeader, data: Array3<f32>) -> Self {
        let mut header = Box::new(header.clone());
        set_header_shape(&mut header, data.dim());
        Self { header, data }
    }

    /// 直接由按 (z, H, W) 组织的数据和 (z, H, W) 体素分辨率创建扫描.
    ///
    /// # 注意
    ///
    /// 生成的 header 没有方向与原点信息, 只适合测试和内存中的中间结果.
    pub fn fake(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        Self {
            header: plain_header(data.dim(), pix_dim),
            data,
        }
    }

    /// 以 nii 格式保存到 `path`. 文件名以 `.gz` 结尾时会被压缩.
    /// 保存失败时 `path` 处不会留下不完整的文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SinusError> {
        write_scan(path.as_ref(), &self.header, &self.data)
    }

    /// 体数据只读视图.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 3D 分割标注体, 灰度值见 [`crate::consts::gray`].
#[derive(Debug, Clone)]
pub struct CtLabel {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for CtLabel {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for CtLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for CtLabel {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl CtLabel {
    /// 读取 `path` 处的 nii 标注. 任何整数体素类型都会转换成 `u8`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinusError> {
        let (header, data) = read_label(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 以 `header` 的空间元信息和按 (z, H, W) 组织的 `data` 创建标注.
    /// header 的维度信息会按 `data` 的形状改写.
    pub fn with_header(header: &NiftiHeader, data: Array3<u8>) -> Self {
        let mut header = Box::new(header.clone());
        set_header_shape(&mut header, data.dim());
        Self { header, data }
    }

    /// 直接由按 (z, H, W) 组织的标签数据和 (z, H, W) 体素分辨率创建标注.
    ///
    /// # 注意
    ///
    /// 生成的 header 没有方向与原点信息, 只适合测试和内存中的中间结果.
    pub fn fake(data: Array3<u8>, pix_dim: [f32; 3]) -> Self {
        Self {
            header: plain_header(data.dim(), pix_dim),
            data,
        }
    }

    /// header 是否来自 `fake`?
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 以 nii 格式保存到 `path`. 文件名以 `.gz` 结尾时会被压缩.
    /// 保存失败时 `path` 处不会留下不完整的文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SinusError> {
        write_label(path.as_ref(), &self.header, &self.data)
    }

    /// 体数据只读视图.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 体数据可写视图.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 值为 `label` 的体素数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取标签的基本统计信息.
    ///
    /// 统计信息格式为: \[背景, 肾脏, 肿瘤, 囊肿, 肾窦\] 体素数.
    /// 该操作不会统计任何其他体素信息.
    pub fn numeric_statistics(&self) -> [usize; 5] {
        let mut ans = [0; 5];
        for pixel in self.data.iter().filter(|p| **p <= KITS_SINUS) {
            ans[*pixel as usize] += 1;
        }
        ans
    }

    /// 将 3D 标注中值为 `old` 的体素全部替换为 `new`.
    ///
    /// 返回总共成功替换的个数.
    pub fn replace(&mut self, old: u8, new: u8) -> usize {
        let mut cnt = 0usize;
        self.data_mut()
            .iter_mut()
            .filter(|pix| **pix == old)
            .for_each(|p| {
                cnt += 1;
                *p = new;
            });
        cnt
    }

    /// 将 `mask` 中为 `true` 的体素全部设置为 `label`.
    ///
    /// 如果 `mask` 与标注形状不一致, 则程序 panic.
    pub fn paint(&mut self, mask: &Mask3d, label: u8) {
        Zip::from(&mut self.data).and(mask).for_each(|p, &m| {
            if m {
                *p = label;
            }
        });
    }

    /// 生成满足谓词 `pred` 的体素二值掩膜.
    pub fn mask(&self, pred: Predicate) -> Mask3d {
        self.data.map(|&p| pred(p))
    }

    /// 生成体素值属于 `labels` 的二值掩膜.
    pub fn mask_of(&self, labels: &[u8]) -> Mask3d {
        self.data.map(|p| labels.contains(p))
    }
}

/// 同一病例的扫描与标注, 二者形状一致.
#[derive(Debug, Clone)]
pub struct CtData3d {
    /// 3D CT 扫描.
    pub scan: CtScan,

    /// 3D CT 标注.
    pub label: CtLabel,
}

impl CtData3d {
    /// 同时读取扫描和标注, 并检查二者形状是否一致.
    pub fn open(
        scan_path: impl AsRef<Path>,
        label_path: impl AsRef<Path>,
    ) -> Result<Self, SinusError> {
        let scan = CtScan::open(scan_path.as_ref())?;
        let label = CtLabel::open(label_path.as_ref())?;
        if scan.shape() != label.shape() {
            return Err(SinusError::ShapeMismatch {
                scan: scan.shape(),
                label: label.shape(),
            });
        }
        Ok(Self { scan, label })
    }
}

#[cfg(test)]
mod tests {
    use super::{write_atomically, CtLabel, CtScan, NiftiHeaderAttr};
    use crate::consts::gray::*;
    use crate::error::SinusError;
    use ndarray::Array3;
    use std::fs;

    fn sample_label() -> CtLabel {
        let mut data = Array3::<u8>::zeros((4, 5, 6));
        data[(1, 2, 3)] = KITS_KIDNEY;
        data[(2, 2, 3)] = KITS_TUMOR;
        data[(3, 4, 5)] = KITS_CYST;
        CtLabel::fake(data, [2.5, 0.8, 0.8])
    }

    #[test]
    fn test_fake_label_attr() {
        let label = sample_label();
        assert!(label.is_faked());
        assert_eq!(label.shape(), (4, 5, 6));
        assert_eq!(label.size(), 120);
        assert_eq!(label.pix_dim(), [2.5, 0.8f32 as f64, 0.8f32 as f64]);
        assert!(!label.is_isotropic());
        assert_eq!(label.numeric_statistics(), [117, 1, 1, 1, 0]);
        assert_eq!(label.voxel(), 2.5 * 0.8f32 as f64 * 0.8f32 as f64);
    }

    #[test]
    fn test_label_paint_and_replace() {
        let mut label = sample_label();
        let mask = label.mask(is_tumor);
        label.paint(&mask, KITS_SINUS);
        assert_eq!(label[(2, 2, 3)], KITS_SINUS);
        assert_eq!(label.replace(KITS_SINUS, KITS_BACKGROUND), 1);
        assert_eq!(label.count(KITS_SINUS), 0);
        assert_eq!(label.mask_of(&[KITS_KIDNEY, KITS_CYST]).iter().filter(|m| **m).count(), 2);
    }

    #[test]
    fn test_nifti_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segmentation.nii.gz");

        let label = sample_label();
        label.save(&path).unwrap();
        let loaded = CtLabel::open(&path).unwrap();
        assert_eq!(loaded.shape(), label.shape());
        assert_eq!(loaded.data(), label.data());
        assert_eq!(loaded.pix_dim(), label.pix_dim());

        let scan_path = dir.path().join("imaging.nii.gz");
        let scan = CtScan::fake(label.data().mapv(|p| p as f32 * 10.0 - 5.0), [2.5, 0.8, 0.8]);
        scan.save(&scan_path).unwrap();
        let loaded = CtScan::open(&scan_path).unwrap();
        assert_eq!(loaded[(1, 2, 3)], 5.0);
        assert_eq!(loaded[(0, 0, 0)], -5.0);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("segmentation_sinus.nii.gz");

        let r = write_atomically(&dst, |tmp| {
            assert!(tmp.to_string_lossy().ends_with(".nii.gz"));
            fs::write(tmp, b"\x1f\x8b truncated")?;
            Err(SinusError::MissingInput(tmp.to_path_buf()))
        });
        assert!(r.is_err());
        assert!(!dst.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // 旧文件在写入失败后保持不变.
        fs::write(&dst, b"old").unwrap();
        let r = write_atomically(&dst, |_| Err(SinusError::InsufficientComponents { found: 0 }));
        assert!(r.is_err());
        assert_eq!(fs::read(&dst).unwrap(), b"old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("case_00000").join("segmentation_sinus.nii.gz");
        assert!(sample_label().save(&dst).is_err());
        assert!(!dst.exists());
    }
}
