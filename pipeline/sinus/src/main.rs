//! 对数据集中的每个病例提取肾窦区域, 写出 `segmentation_sinus.nii.gz`.
//!
//! 数据集位置与线程数见 `utils::loader`. 任一病例失败时以非零状态退出.

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

    let params = SinusParams::default();
    info!("sinus extraction with {params:?}");
    let results = run_batch(&cases, loader::workers_from_env(), |case| {
        process_case(case, &params)
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
