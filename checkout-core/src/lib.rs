// Public modules so downstream tools can drive checkouts directly
pub mod cache;
pub mod check;
pub mod config;
pub mod error;
pub mod find_replace;
pub mod prepare;
pub mod settings;
pub mod signal;
pub mod template;
pub mod tree;
pub mod utils;

pub use cache::{
    DataCache, DataKey, EndpointCache, default_cache, init_default_cache, reset_default_cache,
};
pub use check::{
    CheckContext, ConfigurationReport, FileReport, check_device, check_pvs, run, run_file, run_path,
};
pub use config::{
    Configuration, ConfigurationFile, ConfigurationGroup, DeviceConfiguration,
    IdentifierAndComparison, PVConfiguration,
};
pub use error::{
    DirectoryError, EditError, FindReplaceError, PathResolutionError, PrepareFailure,
    PreparedComparisonError, ReplaceConversionError, SignalError,
};
pub use find_replace::{
    FindReplaceAction, RegexFindReplace, apply_all, find, get_deepest_composite,
    get_default_match_fn, get_default_replace_fn,
};
pub use prepare::{PrepareOutcome, PreparedComparison, prepare};
pub use settings::Settings;
pub use signal::{Device, DeviceDirectory, Signal, SignalFactory};
pub use template::{TemplateOutcome, TemplateSpec};
pub use tree::{PathAddress, Scalar, SimplifiedPath, TreeWalker, Walk, walk};

pub use comparisons;
