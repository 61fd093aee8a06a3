//! Ports - 抽象化レイヤー
//!
//! Each trait is the seam to one external system. The orchestration code only
//! talks to these traits; concrete adapters live in `impls`.

pub mod clock;
pub mod enhancer;
pub mod id_generator;
pub mod media;
pub mod task_store;
pub mod vision;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::enhancer::{EnhanceError, ImageEnhancer, corrected_path_for};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::media::{MediaPublisher, PublishError, UploadedMedia};
pub use self::task_store::{ChangeStream, TaskStore};
pub use self::vision::{COLOR_CRITIQUE_INSTRUCTION, VisionAnalysis, VisionClient, VisionError};
