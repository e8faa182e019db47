//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Mask3d};

pub use crate::data::{BoundingBox, CtData3d, CtLabel, CtScan, NiftiHeaderAttr};

pub use crate::consts::gray::{KITS_BACKGROUND, KITS_CYST, KITS_KIDNEY, KITS_SINUS, KITS_TUMOR};

pub use crate::dataset::{self, discover_cases, home_dataset_dir_with, Case};

pub use crate::batch::{run_batch, BatchSummary, Outcome};
pub use crate::error::{CaseError, SinusError, Stage};
pub use crate::morph_3d::Connectivity;
pub use crate::resample::resample_case;
pub use crate::sinus::{extract_sinus, process_case, SinusParams};
