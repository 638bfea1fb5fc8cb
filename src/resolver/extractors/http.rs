// HTTP plumbing shared by the API and markup engines

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, COOKIE};

use crate::resolver::diagnostics::diagnose_response;
use crate::resolver::errors::{ErrorCode, ExtractError};
use crate::resolver::utils::cookie_header;

/// Responses larger than this are cut off; media pages fit well within it
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// A fetched response, body decoded lossily
#[derive(Debug)]
pub struct Page {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl Page {
    /// Map login walls, checkpoints and error statuses onto the taxonomy
    pub fn check(&self, had_credential: bool) -> Result<(), ExtractError> {
        match diagnose_response(self.status, &self.final_url, &self.body, had_credential) {
            Some(code) => Err(ExtractError::new(
                code,
                format!("{} (HTTP {} from {})", code.description(), self.status, self.final_url),
            )),
            None => Ok(()),
        }
    }
}

/// GET `url` with optional extra headers and session cookie
pub async fn get_page(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    credential: Option<&str>,
) -> Result<Page, ExtractError> {
    let mut request = client
        .get(url)
        .header(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"))
        .headers(headers);

    if let Some(credential) = credential {
        let value = HeaderValue::from_str(&cookie_header(credential))
            .map_err(|_| ExtractError::new(ErrorCode::CookieExpired, "credential is not a valid cookie header"))?;
        request = request.header(COOKIE, value);
    }

    let mut response = request.send().await?;
    let status = response.status().as_u16();
    let final_url = response.url().to_string();

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        bytes.extend_from_slice(&chunk);
        if bytes.len() >= MAX_BODY_BYTES {
            tracing::debug!(url, "response body truncated");
            break;
        }
    }

    Ok(Page {
        status,
        final_url,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}
