//! 通用常量.

/// 单通道标签值.
pub mod gray {
    /// KiTS 格式标注中, 背景的体素值.
    pub const KITS_BACKGROUND: u8 = 0;

    /// KiTS 格式标注中, 肾脏的体素值.
    pub const KITS_KIDNEY: u8 = 1;

    /// KiTS 格式标注中, 肿瘤 (mass) 的体素值.
    pub const KITS_TUMOR: u8 = 2;

    /// KiTS 格式标注中, 囊肿的体素值.
    pub const KITS_CYST: u8 = 3;

    /// 肾窦体素值. 仅出现在肾窦提取的输出中.
    pub const KITS_SINUS: u8 = 4;

    /// 体素是否是肾脏?
    #[inline]
    pub const fn is_kidney(p: u8) -> bool {
        matches!(p, KITS_KIDNEY)
    }

    /// 体素是否是肿瘤?
    #[inline]
    pub const fn is_tumor(p: u8) -> bool {
        matches!(p, KITS_TUMOR)
    }

    /// 体素是否是背景或肾窦?
    #[inline]
    pub const fn is_background_or_sinus(p: u8) -> bool {
        matches!(p, KITS_BACKGROUND | KITS_SINUS)
    }
}

/// 病例目录下的文件名.
pub mod filename {
    /// 原始 CT 扫描.
    pub const IMAGING: &str = "imaging.nii.gz";

    /// 原始多标签标注.
    pub const SEGMENTATION: &str = "segmentation.nii.gz";

    /// 肾窦提取后的标注.
    pub const SEGMENTATION_SINUS: &str = "segmentation_sinus.nii.gz";

    /// 重采样后的 CT 扫描.
    pub const IMAGING_RESAMPLED: &str = "imaging_r.nii.gz";

    /// 重采样后的肾窦标注.
    pub const SEGMENTATION_SINUS_RESAMPLED: &str = "segmentation_sinus_r.nii.gz";
}

/// 肾脏包围盒向外扩展的默认体素数.
pub const DEFAULT_CROP_MARGIN: usize = 5;

/// 凸包腐蚀的默认迭代次数.
pub const DEFAULT_EROSION_ITERATIONS: usize = 3;

/// 重采样的默认目标体素分辨率, 以毫米为单位.
pub const DEFAULT_TARGET_SPACING: f64 = 1.0;
