//! 批量病例处理.
//!
//! 每个病例是一个独立任务, 任务之间不共享可变状态. 启用 `rayon` feature 时,
//! 任务在固定线程数的专用线程池中并行执行; 否则顺序执行.
//! 无论完成顺序如何, 结果总是按输入顺序返回.

use std::fmt;
use std::path::PathBuf;

use log::{info, warn};

use crate::dataset::Case;
use crate::error::{CaseError, Stage};

/// 单个病例的处理结果.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// 已写出输出文件.
    Saved(PathBuf),

    /// 输出文件已存在, 跳过.
    Skipped(PathBuf),
}

/// 对 `cases` 中的每个病例执行 `task`, 按输入顺序返回全部结果.
///
/// `workers` 为最大并行线程数, 为 0 时按 1 处理. 未启用 `rayon` feature 时该参数被忽略.
pub fn run_batch<F>(cases: &[Case], workers: usize, task: F) -> Vec<Result<Outcome, CaseError>>
where
    F: Fn(&Case) -> Result<Outcome, CaseError> + Sync + Send,
{
    let workers = workers.max(1);
    info!("{} cases, {workers} workers", cases.len());
    execute(cases, workers, &task)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        fn execute<F>(cases: &[Case], workers: usize, task: &F) -> Vec<Result<Outcome, CaseError>>
        where
            F: Fn(&Case) -> Result<Outcome, CaseError> + Sync + Send,
        {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| cases.par_iter().map(task).collect()),
                Err(e) => {
                    warn!("cannot build thread pool ({e}), running sequentially");
                    cases.iter().map(task).collect()
                }
            }
        }
    } else {
        fn execute<F>(cases: &[Case], _workers: usize, task: &F) -> Vec<Result<Outcome, CaseError>>
        where
            F: Fn(&Case) -> Result<Outcome, CaseError>,
        {
            cases.iter().map(task).collect()
        }
    }
}

/// 一次批处理的统计信息.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchSummary {
    /// 成功写出结果的病例数.
    pub processed: usize,

    /// 因输出已存在而跳过的病例数.
    pub skipped: usize,

    /// 失败病例的标识及出错阶段, 按输入顺序排列.
    pub failed: Vec<(String, Stage)>,
}

impl BatchSummary {
    /// 汇总批处理结果, 并为每个失败病例输出一条警告日志.
    pub fn collect<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a Result<Outcome, CaseError>>,
    {
        let mut ans = Self::default();
        for r in results {
            match r {
                Ok(Outcome::Saved(_)) => ans.processed += 1,
                Ok(Outcome::Skipped(_)) => ans.skipped += 1,
                Err(e) => {
                    warn!("{e}");
                    ans.failed.push((e.case.clone(), e.stage));
                }
            }
        }
        ans
    }

    /// 病例总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed.len()
    }

    /// 是否存在失败病例?
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cases: {} processed, {} skipped, {} failed",
            self.total(),
            self.processed,
            self.skipped,
            self.failed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinusError, StageContext};
    use std::thread;
    use std::time::Duration;

    fn cases(n: usize) -> Vec<Case> {
        (0..n)
            .map(|i| Case::new(format!("/kits/case_{i:05}")))
            .collect()
    }

    fn fake_task(case: &Case) -> Result<Outcome, CaseError> {
        let i: usize = case.id()[5..].parse().unwrap();
        // 让靠前的任务更晚完成.
        thread::sleep(Duration::from_millis((20 - i as u64 % 20) * 2));
        match i % 3 {
            0 => Ok(Outcome::Saved(case.file("out"))),
            1 => Ok(Outcome::Skipped(case.file("out"))),
            _ => Err(SinusError::InsufficientComponents { found: 1 })
                .at(case.id(), Stage::Separate),
        }
    }

    #[test]
    fn test_results_in_input_order() {
        let cases = cases(12);
        let results = run_batch(&cases, 4, fake_task);
        assert_eq!(results.len(), 12);
        for (case, r) in cases.iter().zip(results.iter()) {
            match r {
                Ok(Outcome::Saved(p)) | Ok(Outcome::Skipped(p)) => assert_eq!(p, &case.file("out")),
                Err(e) => assert_eq!(e.case, case.id()),
            }
        }
    }

    #[test]
    fn test_summary() {
        let cases = cases(7);
        let results = run_batch(&cases, 0, fake_task);
        let summary = BatchSummary::collect(&results);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            summary.failed,
            vec![
                ("case_00002".to_string(), Stage::Separate),
                ("case_00005".to_string(), Stage::Separate)
            ]
        );
        assert!(summary.has_failures());
        assert_eq!(summary.to_string(), "7 cases: 3 processed, 2 skipped, 2 failed");

        assert!(!BatchSummary::collect(&results[..2]).has_failures());
    }
}
