// Extraction engines and the dispatcher that orders them

pub mod api;
pub mod http;
pub mod markup;
pub mod orchestrator;
pub mod traits;
pub mod ytdlp;

pub use api::ApiEngine;
pub use markup::MarkupEngine;
pub use orchestrator::{AttemptRecord, DispatchOutcome, Dispatcher};
pub use traits::{Engine, EngineInput, EngineKind};
pub use ytdlp::YtDlpEngine;
