//! Region pipeline: per-region state machine, workspace layout and the
//! multi-region driver

pub mod workspace;
pub mod cancel;
pub mod region;
pub mod cleanup_run;
pub mod driver;

pub use workspace::{RegionWorkspace, ScratchSpace, STAGE_DIRS, MAP_STAGES};
pub use cancel::CancelToken;
pub use region::{RegionState, RegionPipeline, RegionInputs, RegionOutcome, ZonalSummary};
pub use cleanup_run::RegionCleanup;
pub use driver::{RegionDriver, RegionReport, DriverReport};
