//! Riddle registry, path resolution, and page trees.

pub mod data;
pub mod levels;
pub mod registry;
pub mod snapshot;
pub mod tree;

pub use data::BlacklistedPage;
pub use data::LevelData;
pub use data::PagesData;
pub use data::RiddleData;
pub use levels::LevelIndex;
pub use registry::ResolvedPath;
pub use registry::RiddleEntry;
pub use registry::RiddleRegistry;
pub use registry::RootPattern;
pub use registry::SensitivePathRules;
pub use snapshot::RiddleProgress;
pub use snapshot::RiddleSnapshot;
pub use tree::PageNode;
pub use tree::PageTree;
pub use tree::find_containing_path;
