// Shared helpers for engines and the redirect resolver

use std::process::Stdio;
use std::time::Duration;

use reqwest::redirect::Policy;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::config::ResolverConfig;
use super::errors::{ErrorCode, ExtractError};
use super::pipeline::validator;

const MAX_FOLLOWED_REDIRECTS: usize = 10;

/// Run a command with a deadline, killing it when the deadline passes
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    limit: Duration,
) -> Result<std::process::Output, ExtractError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("Failed to start {}: {}", program, e)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| ExtractError::new(ErrorCode::Unknown, format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| ExtractError::new(ErrorCode::Unknown, format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status) => {
            let status = status
                .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("Failed to wait for {}: {}", program, e)))?;
            let stdout = join_pipe(stdout_task, "stdout").await?;
            let stderr = join_pipe(stderr_task, "stderr").await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(ExtractError::timeout(program, limit.as_secs()))
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    task.await
        .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("{} task failed: {}", name, e)))?
        .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("Failed to read {}: {}", name, e)))
}

/// Redirect policy that re-validates every hop against the SSRF rules
fn guarded_redirects(allow_private_networks: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_FOLLOWED_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match validator::validate(attempt.url().as_str(), allow_private_networks) {
            Ok(_) => attempt.follow(),
            Err(e) => attempt.error(e),
        }
    })
}

/// Build an HTTP client from resolver config.
///
/// `follow_redirects = false` is used by the redirect resolver, which walks
/// hops itself to record the chain.
pub fn build_http_client(
    config: &ResolverConfig,
    follow_redirects: bool,
    request_timeout: Duration,
) -> Result<reqwest::Client, ExtractError> {
    let policy = if follow_redirects {
        guarded_redirects(config.allow_private_networks)
    } else {
        Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(request_timeout)
        .connect_timeout(request_timeout.min(Duration::from_secs(10)))
        .redirect(policy);

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("Failed to build HTTP client: {}", e)))
}

/// Cookie header value for a stored credential (`name=value; name2=value2`)
pub fn cookie_header(credential: &str) -> String {
    credential
        .split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extract one cookie's value from a credential string
pub fn cookie_value<'a>(credential: &'a str, name: &str) -> Option<&'a str> {
    credential
        .split(|c| c == ';' || c == '\n')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
}
