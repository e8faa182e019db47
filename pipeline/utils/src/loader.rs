//! 对 `renal-sinus::dataset` 的更一层封装. 从环境变量读取流水线配置.

use std::env;
use std::io;
use std::path::PathBuf;

use log::warn;
use renal_sinus::consts::DEFAULT_TARGET_SPACING;
use renal_sinus::dataset::{self, Case};

/// 数据集根目录的环境变量.
pub const DATA_DIR_VAR: &str = "KITS_DATA_DIR";

/// 并行线程数的环境变量.
pub const WORKERS_VAR: &str = "KITS_WORKERS";

/// 重采样目标体素分辨率的环境变量.
pub const TARGET_SPACING_VAR: &str = "KITS_TARGET_SPACING";

/// 获取 KiTS 数据集基本路径.
///
/// 1. 若环境变量 `$KITS_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/kits`. 无法确定用户主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_VAR) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["kits"]),
    }
}

/// 从 `$KITS_DATA_DIR` 或者 `$HOME/dataset/kits` 下列出全部病例.
pub fn cases_from_env_or_home() -> io::Result<Vec<Case>> {
    let root = data_dir_from_env_or_home().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "cannot locate home directory")
    })?;
    dataset::discover_cases(root)
}

/// 解析正整数线程数.
fn parse_workers(s: &str) -> Option<usize> {
    s.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

/// 获取并行线程数.
///
/// 1. 若环境变量 `$KITS_WORKERS` 为正整数, 则返回其值;
/// 2. 否则, 返回可并行核心数.
pub fn workers_from_env() -> usize {
    match env::var(WORKERS_VAR) {
        Ok(s) => parse_workers(&s).unwrap_or_else(|| {
            warn!("invalid ${WORKERS_VAR} `{s}`, fallback to cpu count");
            crate::cpus()
        }),
        Err(_) => crate::cpus(),
    }
}

/// 解析目标体素分辨率. 接受一个 (各向同性) 或三个 (z, H, W) 正数, 以空白或逗号分隔.
fn parse_spacing(s: &str) -> Option<[f64; 3]> {
    let v: Vec<f64> = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if !v.iter().all(|x| x.is_finite() && *x > 0.0) {
        return None;
    }
    match v[..] {
        [x] => Some([x; 3]),
        [z, h, w] => Some([z, h, w]),
        _ => None,
    }
}

/// 获取重采样目标体素分辨率 (z, H, W), 以毫米为单位.
///
/// 1. 若环境变量 `$KITS_TARGET_SPACING` 合法, 则返回其值;
/// 2. 否则, 返回各向同性的默认值.
pub fn target_spacing_from_env() -> [f64; 3] {
    let default = [DEFAULT_TARGET_SPACING; 3];
    match env::var(TARGET_SPACING_VAR) {
        Ok(s) => parse_spacing(&s).unwrap_or_else(|| {
            warn!("invalid ${TARGET_SPACING_VAR} `{s}`, fallback to {default:?}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workers() {
        assert_eq!(parse_workers("4"), Some(4));
        assert_eq!(parse_workers(" 12 "), Some(12));
        assert_eq!(parse_workers("0"), None);
        assert_eq!(parse_workers("many"), None);
    }

    #[test]
    fn test_parse_spacing() {
        assert_eq!(parse_spacing("1.5"), Some([1.5; 3]));
        assert_eq!(parse_spacing("3, 0.8, 0.8"), Some([3.0, 0.8, 0.8]));
        assert_eq!(parse_spacing("3 0.8 0.8"), Some([3.0, 0.8, 0.8]));
        assert_eq!(parse_spacing("1 2"), None);
        assert_eq!(parse_spacing("-1"), None);
        assert_eq!(parse_spacing(""), None);
    }
}
