// yt-dlp engine - runs the `yt-dlp` binary and parses its JSON dump
//
// Covers every platform yt-dlp has an extractor for, at the cost of a child
// process per request. Credentials are handed over in a temporary
// Netscape cookie file that is removed when the attempt ends.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::traits::{Engine, EngineInput, EngineKind};
use crate::resolver::config::ResolverConfig;
use crate::resolver::errors::{ErrorCode, ExtractError};
use crate::resolver::models::{ExtractedMedia, Platform};
use crate::resolver::parser;
use crate::resolver::utils::run_output_with_timeout;

/// Upper bound for `which` and `--version` at startup
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct YtDlpEngine {
    ytdlp_path: String,
    proxy: Option<String>,
    user_agent: String,
    available: bool,
}

impl YtDlpEngine {
    /// Locate the binary and check it runs. Done once, when routes are built.
    pub async fn detect(config: &ResolverConfig) -> Self {
        let ytdlp_path = match &config.ytdlp_path {
            Some(path) => path.clone(),
            None => Self::find_ytdlp().await,
        };
        let available = Self::reports_version(&ytdlp_path).await;
        if available {
            tracing::debug!(path = %ytdlp_path, "yt-dlp found");
        } else {
            tracing::info!(path = %ytdlp_path, "yt-dlp not usable, subprocess engine disabled");
        }

        Self {
            ytdlp_path,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            available,
        }
    }

    /// Find yt-dlp binary
    async fn find_ytdlp() -> String {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
            "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac, pip --user installs
            "/usr/bin/yt-dlp",          // System installation
        ];

        for path in common_paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return path.to_string();
            }
        }

        if let Ok(output) = run_output_with_timeout("which", vec!["yt-dlp".to_string()], VERSION_TIMEOUT).await {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return path;
                }
            }
        }

        "yt-dlp".to_string()
    }

    async fn reports_version(path: &str) -> bool {
        match run_output_with_timeout(path, vec!["--version".to_string()], VERSION_TIMEOUT).await {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    fn build_args(&self, url: &str, socket_timeout: u64, cookie_file: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--socket-timeout".to_string(),
            socket_timeout.max(1).to_string(),
            "--retries".to_string(),
            "1".to_string(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
        ];

        if let Some(path) = cookie_file {
            args.push("--cookies".to_string());
            args.push(path.to_string());
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        // Keep URLs that start with '-' from being read as options
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }
}

/// Netscape cookie jar for one platform session.
///
/// The file is deleted when the returned handle drops, which covers success,
/// failure, timeout and cancellation of the attempt alike.
pub fn write_cookie_file(platform: Platform, credential: &str) -> Result<NamedTempFile, ExtractError> {
    let io_err = |e: std::io::Error| ExtractError::new(ErrorCode::Unknown, format!("cookie file: {}", e));

    let mut file = tempfile::Builder::new()
        .prefix("media-resolver-cookies-")
        .suffix(".txt")
        .tempfile()
        .map_err(io_err)?;

    let mut jar = String::from("# Netscape HTTP Cookie File\n");
    for (name, value) in credential
        .split(|c| c == ';' || c == '\n')
        .filter_map(|pair| pair.trim().split_once('='))
    {
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            continue;
        }
        jar.push_str(&format!(
            "{}\tTRUE\t/\tTRUE\t0\t{}\t{}\n",
            platform.cookie_domain(),
            name,
            value
        ));
    }

    file.write_all(jar.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
}

#[async_trait]
impl Engine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Subprocess
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn accepts_credentials(&self) -> bool {
        true
    }

    async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
        let cookie_file = match input.credential {
            Some(credential) => Some(write_cookie_file(input.platform, credential)?),
            None => None,
        };
        let cookie_path = cookie_file.as_ref().map(|f| f.path().to_string_lossy().into_owned());

        let args = self.build_args(input.resolved_url, input.timeout.as_secs(), cookie_path.as_deref());
        tracing::debug!(
            engine = self.name(),
            credentialed = input.has_credential(),
            "running {} {}",
            self.ytdlp_path,
            input.resolved_url
        );

        let output = run_output_with_timeout(&self.ytdlp_path, args, input.timeout).await?;
        drop(cookie_file);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| l.contains("ERROR"))
                .unwrap_or_else(|| stderr.trim())
                .to_string();
            tracing::debug!(engine = self.name(), error = %message, "yt-dlp failed");
            let mut error = ExtractError::from(message);
            // A rejected session reads like a login wall from the outside
            if input.has_credential() && error.code == ErrorCode::CookieRequired {
                error.code = ErrorCode::CookieExpired;
            }
            return Err(error);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ExtractError::parse("yt-dlp produced no output"));
        }
        parser::parse_json_str(&stdout, input.has_credential())
    }
}
