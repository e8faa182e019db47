//! 将每个病例的扫描与肾窦标注重采样到目标体素分辨率,
//! 写出 `imaging_r.nii.gz` 和 `segmentation_sinus_r.nii.gz`.
//!
//! 任一病例失败时以非零状态退出.

use std::process::ExitCode;

use log::{error, info};
use renal_sinus::prelude::*;
use utils::loader;

fn main() -> ExitCode {
    utils::init_logger();

    let cases = match loader::cases_from_env_or_home() {
        Ok(cases) => cases,
        Err(e) => {
            error!("cannot list cases: {e}");
            return ExitCode::FAILURE;
        }
    };

    let target = loader::target_spacing_from_env();
    info!("resampling to {target:?} mm");
    let results = run_batch(&cases, loader::workers_from_env(), |case| {
        resample_case(case, target)
    });

    let summary = BatchSummary::collect(&results);
    utils::sep();
    info!("{summary}");
    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
