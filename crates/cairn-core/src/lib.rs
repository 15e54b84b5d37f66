//! cairn-core: the content generation pipeline behind cairn.
//!
//! The pieces, roughly in the order a generation run touches them:
//!
//! - [`outline`]: the TOML roadmap outline authors write, and its validation
//! - [`gateway`]: the completion provider boundary
//! - [`singleflight`]: one live run per owner
//! - [`orchestrator`]: the serial per-sub-item run itself
//! - [`material`]: turning completions into persistable records
//! - [`quiz`]: the synthesis chain that always produces a quiz
//! - [`progress`]: the gate deciding when a learner may advance
//! - [`error`]: the taxonomy every surface maps onto status codes

pub mod error;
pub mod gateway;
pub mod material;
pub mod orchestrator;
pub mod outline;
pub mod progress;
pub mod prompt;
pub mod quiz;
pub mod singleflight;
