// Resolver module - social-media URL to ranked media formats

pub mod collaborators;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod errors;
pub mod extractors;
pub mod fetch;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod service;
pub mod utils;

pub use collaborators::{MemoryCache, MemoryStats, ResultCache, StatsEvent, StatsSink};
pub use config::ResolverConfig;
pub use credentials::{CredentialPool, HealthState, JsonFilePoolStore, MemoryPoolStore, PoolStore};
pub use errors::{ErrorCode, ExtractError, ValidationError};
pub use extractors::{DispatchOutcome, Dispatcher, Engine, EngineInput, EngineKind};
pub use models::{
    CacheKey, ContentDescriptor, ContentType, ExtractedMedia, ExtractionResult, FormatSet, MediaFormat, MediaKind,
    Platform, ResolutionResult, Tier,
};
pub use service::{BuildError, MediaResolver, MediaResolverBuilder, PreparedRequest, Resolution};
