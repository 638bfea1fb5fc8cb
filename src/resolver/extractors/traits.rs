// Engine trait and the per-call input contract

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::resolver::errors::ExtractError;
use crate::resolver::models::{ContentDescriptor, ExtractedMedia, Platform};

/// Broad engine category, used for timeouts and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Public platform endpoints, no session
    NativeApi,
    /// Endpoints that only answer a logged-in session
    AuthenticatedApi,
    /// Page fetch plus markup patterns
    Markup,
    /// External tool run as a child process
    Subprocess,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeApi => write!(f, "native-api"),
            Self::AuthenticatedApi => write!(f, "authenticated-api"),
            Self::Markup => write!(f, "markup"),
            Self::Subprocess => write!(f, "subprocess"),
        }
    }
}

/// What an engine gets for one attempt
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub resolved_url: &'a str,
    pub platform: Platform,
    pub descriptor: &'a ContentDescriptor,
    /// Raw cookie string, present only on the credentialed retry
    pub credential: Option<&'a str>,
    pub timeout: Duration,
}

impl<'a> EngineInput<'a> {
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }
}

/// One extraction strategy.
///
/// Implementations must map every internal fault to an `ExtractError`; the
/// dispatcher additionally enforces `input.timeout` around `extract`.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Name of the engine (for logging and dispatch diagnostics)
    fn name(&self) -> &'static str;

    fn kind(&self) -> EngineKind;

    /// Check if this engine can run at all (binary present, etc.)
    fn is_available(&self) -> bool {
        true
    }

    /// Whether a credential changes what this engine can see
    fn accepts_credentials(&self) -> bool;

    /// Extract media for one resolved URL
    async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError>;
}
