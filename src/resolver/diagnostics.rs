// Failure diagnostics - maps raw engine output onto the error taxonomy
//
// Engines see failures in three shapes:
// - free text (subprocess stderr, exception messages)
// - HTTP status codes
// - HTTP responses that "succeed" but land on a login wall or checkpoint page
//
// All three are classified here so every engine agrees on what a failure means.

use lazy_static::lazy_static;
use regex::Regex;

use super::errors::ErrorCode;

lazy_static! {
    /// Status numbers as whole tokens. Post ids are long digit runs that
    /// often contain "403"/"404"/"429", so a bare substring test is not enough.
    static ref STATUS_TOKEN: Regex = Regex::new(r"\b(403|404|429)\b").unwrap();
    static ref DRM_TOKEN: Regex = Regex::new(r"\bdrm\b").unwrap();
}

fn has_status(lower: &str, status: &str) -> bool {
    STATUS_TOKEN.captures_iter(lower).any(|caps| &caps[1] == status)
}

/// Analyze an error message and return the closest taxonomy entry
pub fn diagnose_error(error: &str) -> ErrorCode {
    let lower = error.to_lowercase();

    // Check patterns in order of specificity

    // Security checkpoint (must win over generic login wording)
    if lower.contains("checkpoint_required")
        || lower.contains("checkpoint required")
        || lower.contains("/challenge/")
        || lower.contains("challenge_required")
    {
        return ErrorCode::CheckpointRequired;
    }

    // Rejected session
    if lower.contains("session expired")
        || lower.contains("session has expired")
        || lower.contains("invalid session")
        || lower.contains("cookies are no longer valid")
        || lower.contains("login_required") && lower.contains("cookie")
    {
        return ErrorCode::CookieExpired;
    }

    // Age gate
    if lower.contains("age-restricted")
        || lower.contains("age restricted")
        || lower.contains("confirm your age")
        || lower.contains("age_verification")
        || lower.contains("inappropriate for some users")
    {
        return ErrorCode::AgeRestricted;
    }

    // Private content
    if lower.contains("private account")
        || lower.contains("account is private")
        || lower.contains("this content is private")
        || lower.contains("private video")
        || lower.contains("only available to followers")
    {
        return ErrorCode::PrivateContent;
    }

    // Login walls
    if lower.contains("login required")
        || lower.contains("login_required")
        || lower.contains("requires login")
        || lower.contains("log in to")
        || lower.contains("sign in to")
        || lower.contains("--cookies")
        || lower.contains("use --cookies-from-browser")
        || lower.contains("authentication")
    {
        return ErrorCode::CookieRequired;
    }

    // The extractor could not read the page; another engine may
    if lower.contains("unable to extract") || lower.contains("unexpected response") {
        return ErrorCode::ParseError;
    }

    // Removed or missing content
    if has_status(&lower, "404")
        || lower.contains("not found")
        || lower.contains("no longer available")
        || lower.contains("has been removed")
        || lower.contains("does not exist")
        || lower.contains("video unavailable")
        || lower.contains("post unavailable")
    {
        return ErrorCode::NotFound;
    }

    // Content we cannot extract by nature
    if DRM_TOKEN.is_match(&lower)
        || lower.contains("live event")
        || lower.contains("is live")
        || lower.contains("unsupported url")
        || lower.contains("unsupported content")
    {
        return ErrorCode::UnsupportedContent;
    }

    // Rate limiting
    if has_status(&lower, "429")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("too many requests")
        || lower.contains("please wait a few minutes")
    {
        return ErrorCode::RateLimited;
    }

    // Bot walls and refusals
    if has_status(&lower, "403")
        || lower.contains("forbidden")
        || lower.contains("captcha")
        || lower.contains("unusual traffic")
        || lower.contains("blocked")
    {
        return ErrorCode::Blocked;
    }

    // Network timeout
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorCode::Timeout;
    }

    // Malformed payloads
    if lower.contains("json") || lower.contains("parse") {
        return ErrorCode::ParseError;
    }

    if lower.contains("no video") || lower.contains("no media") || lower.contains("no formats") {
        return ErrorCode::NoMedia;
    }

    ErrorCode::Unknown
}

/// Map an HTTP status onto the taxonomy.
///
/// `had_credential` distinguishes "needs a session" (401 without cookies)
/// from "session rejected" (401 with cookies).
pub fn status_to_code(status: u16, had_credential: bool) -> ErrorCode {
    match status {
        401 if had_credential => ErrorCode::CookieExpired,
        401 => ErrorCode::CookieRequired,
        403 => ErrorCode::Blocked,
        404 | 410 => ErrorCode::NotFound,
        429 => ErrorCode::RateLimited,
        408 | 504 => ErrorCode::Timeout,
        s if (500..600).contains(&s) => ErrorCode::Unknown,
        _ => ErrorCode::Unknown,
    }
}

/// Classify an HTTP response that returned normally.
///
/// Platforms answer unauthenticated requests for restricted content with a
/// 200 redirect to a login or checkpoint page, so the final URL and the first
/// bytes of the body are as informative as the status.
pub fn diagnose_response(
    status: u16,
    final_url: &str,
    body: &str,
    had_credential: bool,
) -> Option<ErrorCode> {
    let url = final_url.to_lowercase();

    if url.contains("/challenge") || url.contains("checkpoint") {
        return Some(ErrorCode::CheckpointRequired);
    }

    if url.contains("/accounts/login") || url.contains("/login") || url.contains("/i/flow/login") {
        return Some(if had_credential {
            ErrorCode::CookieExpired
        } else {
            ErrorCode::CookieRequired
        });
    }

    if !(200..300).contains(&status) {
        return Some(status_to_code(status, had_credential));
    }

    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();

    if head.contains("\"checkpoint_required\"") || head.contains("\"challenge_required\"") {
        return Some(ErrorCode::CheckpointRequired);
    }

    if head.contains("\"require_login\":true") || head.contains("\"login_required\"") {
        return Some(if had_credential {
            ErrorCode::CookieExpired
        } else {
            ErrorCode::CookieRequired
        });
    }

    if head.contains("\"spam\":true") || head.contains("please wait a few minutes") {
        return Some(ErrorCode::RateLimited);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_detection() {
        let error = "ERROR: [Instagram] Cq1: Requested content is not available, login required";
        assert_eq!(diagnose_error(error), ErrorCode::CookieRequired);
    }

    #[test]
    fn test_cookies_hint_detection() {
        let error = "Use --cookies-from-browser or --cookies for the authentication";
        assert_eq!(diagnose_error(error), ErrorCode::CookieRequired);
    }

    #[test]
    fn test_checkpoint_detection() {
        let error = "{\"message\":\"checkpoint_required\",\"checkpoint_url\":\"/challenge/\"}";
        assert_eq!(diagnose_error(error), ErrorCode::CheckpointRequired);
    }

    #[test]
    fn test_age_restricted_detection() {
        let error = "Sign in to confirm your age. This video may be inappropriate for some users.";
        assert_eq!(diagnose_error(error), ErrorCode::AgeRestricted);
    }

    #[test]
    fn test_private_detection() {
        let error = "This account is private";
        assert_eq!(diagnose_error(error), ErrorCode::PrivateContent);
    }

    #[test]
    fn test_not_found_detection() {
        let error = "ERROR: HTTP Error 404: Not Found";
        assert_eq!(diagnose_error(error), ErrorCode::NotFound);
    }

    #[test]
    fn test_rate_limit_detection() {
        let error = "HTTP Error 429: Too Many Requests";
        assert_eq!(diagnose_error(error), ErrorCode::RateLimited);
    }

    #[test]
    fn test_timeout_detection() {
        let error = "Timed out after 55s";
        assert_eq!(diagnose_error(error), ErrorCode::Timeout);
    }

    #[test]
    fn test_blocked_detection() {
        let error = "HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), ErrorCode::Blocked);
    }

    #[test]
    fn test_numeric_ids_are_not_status_codes() {
        let tiktok = "ERROR: [TikTok] 7304041234567890123: Unable to extract universal data for rehydration";
        assert_eq!(diagnose_error(tiktok), ErrorCode::ParseError);

        let tweet = "ERROR: [twitter] 1842942912345678901: Unexpected response from API";
        assert_eq!(diagnose_error(tweet), ErrorCode::ParseError);

        let tweet = "ERROR: [twitter] 1729404291234567890: Something went wrong";
        assert_eq!(diagnose_error(tweet), ErrorCode::Unknown);

        let instagram = "ERROR: [Instagram] 3240317403281935162: No video formats found!";
        assert_eq!(diagnose_error(instagram), ErrorCode::NoMedia);
    }

    #[test]
    fn test_shortcode_is_not_drm() {
        let error = "ERROR: [Instagram] CxDRMa1b: No video formats found!";
        assert_eq!(diagnose_error(error), ErrorCode::NoMedia);
        assert_eq!(diagnose_error("This video is DRM protected"), ErrorCode::UnsupportedContent);
    }

    #[test]
    fn test_status_next_to_numeric_id() {
        let error = "ERROR: [TikTok] 7304041234567890123: Unable to download webpage: HTTP Error 404: Not Found";
        assert_eq!(diagnose_error(error), ErrorCode::NotFound);

        let error = "ERROR: [twitter] 1842942912345678901: HTTP Error 429: Too Many Requests";
        assert_eq!(diagnose_error(error), ErrorCode::RateLimited);

        let error = "ERROR: [Instagram] 3240317403281935162: HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), ErrorCode::Blocked);
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(diagnose_error("something odd happened"), ErrorCode::Unknown);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_to_code(401, false), ErrorCode::CookieRequired);
        assert_eq!(status_to_code(401, true), ErrorCode::CookieExpired);
        assert_eq!(status_to_code(404, false), ErrorCode::NotFound);
        assert_eq!(status_to_code(429, true), ErrorCode::RateLimited);
    }

    #[test]
    fn test_login_redirect_response() {
        let code = diagnose_response(
            200,
            "https://www.instagram.com/accounts/login/?next=/p/abc/",
            "<html>",
            false,
        );
        assert_eq!(code, Some(ErrorCode::CookieRequired));

        let code = diagnose_response(
            200,
            "https://www.instagram.com/accounts/login/?next=/p/abc/",
            "<html>",
            true,
        );
        assert_eq!(code, Some(ErrorCode::CookieExpired));
    }

    #[test]
    fn test_checkpoint_body() {
        let body = r#"{"message":"checkpoint_required","status":"fail"}"#;
        let code = diagnose_response(200, "https://www.instagram.com/api/v1/x", body, true);
        assert_eq!(code, Some(ErrorCode::CheckpointRequired));
    }

    #[test]
    fn test_clean_response() {
        let code = diagnose_response(200, "https://www.tiktok.com/@a/video/1", "{\"ok\":1}", false);
        assert_eq!(code, None);
    }
}
