#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod format;
pub mod gpu;
pub mod lod;
pub mod settings;
pub mod sorting;
pub mod splats;
pub mod utils;

pub use cache::SplatPageCache;
pub use driver::{FrameActions, FrameInputs, ObjectBacking, RenderDriver, SceneObject, ViewState};
pub use engine::SplatEngine;
pub use errors::{EngineError, Result};
pub use format::ChunkSource;
pub use lod::{Foveation, TreeId, TreeRegistry, build_lod_tree, traverse};
pub use settings::{DeviceClass, EngineSettings, PAGE_SIZE};
pub use splats::{Splat, SplatContainer};
pub use utils::Timer;
