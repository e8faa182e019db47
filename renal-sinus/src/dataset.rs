//! 数据集操作.
//!
//! KiTS 格式数据集的根目录下每个子目录即为一个病例, 病例目录下保存
//! `imaging.nii.gz`, `segmentation.nii.gz` 及各处理阶段的输出.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 单个病例的描述. 创建后不可修改, 可在线程间自由共享.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Case {
    id: String,
    dir: PathBuf,
}

impl Case {
    /// 以病例目录 `dir` 创建描述. 病例标识为目录名.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_owned();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self { id, dir }
    }

    /// 病例标识.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 病例目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 病例目录下名为 `name` 的文件路径.
    #[inline]
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// 列出数据集根目录 `root` 下的所有病例, 按病例标识升序排列.
///
/// 只有子目录会被视为病例, 普通文件被忽略. `root` 不可读时返回 `Err`.
pub fn discover_cases<P: AsRef<Path>>(root: P) -> io::Result<Vec<Case>> {
    let mut cases = vec![];
    for entry in fs::read_dir(root.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            cases.push(Case::new(entry.path()));
        }
    }
    cases.sort_unstable();
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_dataset_dir_with() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                home_dataset_dir_with(["kits", "case_00000"]),
                Some(home.join("dataset").join("kits").join("case_00000"))
            );
        }
    }

    #[test]
    fn test_case_paths() {
        let case = Case::new("/data/kits/case_00042");
        assert_eq!(case.id(), "case_00042");
        assert_eq!(case.dir(), Path::new("/data/kits/case_00042"));
        assert_eq!(
            case.file("segmentation.nii.gz"),
            PathBuf::from("/data/kits/case_00042/segmentation.nii.gz")
        );
    }

    #[test]
    fn test_discover_cases() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["case_00002", "case_00000", "case_00001"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("README.txt"), b"kits").unwrap();

        let cases = discover_cases(dir.path()).unwrap();
        let ids: Vec<&str> = cases.iter().map(Case::id).collect();
        assert_eq!(ids, ["case_00000", "case_00001", "case_00002"]);
        assert_eq!(cases[1].dir(), dir.path().join("case_00001"));

        assert!(discover_cases(dir.path().join("missing")).is_err());
    }
}
