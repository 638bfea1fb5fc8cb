// Markup engine - fetches the post page and runs the markup patterns
//
// Last resort for most platforms: works without any API, but only sees what
// the page embeds for crawlers (OpenGraph, JSON-LD, inline JSON blobs).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use super::http::get_page;
use super::traits::{Engine, EngineInput, EngineKind};
use crate::resolver::config::ResolverConfig;
use crate::resolver::errors::ExtractError;
use crate::resolver::models::ExtractedMedia;
use crate::resolver::parser;
use crate::resolver::utils::build_http_client;

pub struct MarkupEngine {
    client: reqwest::Client,
}

impl MarkupEngine {
    pub fn new(config: &ResolverConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            client: build_http_client(config, true, config.engine_timeout())?,
        })
    }
}

#[async_trait]
impl Engine for MarkupEngine {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Markup
    }

    fn accepts_credentials(&self) -> bool {
        true
    }

    async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );

        let page = get_page(&self.client, input.resolved_url, headers, input.credential).await?;
        page.check(input.has_credential())?;
        tracing::debug!(url = %page.final_url, bytes = page.body.len(), "page fetched");

        parser::parse_markup(&page.body, input.has_credential())
    }
}
