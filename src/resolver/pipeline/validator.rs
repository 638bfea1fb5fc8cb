// URL extraction, validation and normalization
//
// Every URL the resolver fetches passes through `validate`, including each
// redirect hop. Hosts are checked after WHATWG parsing, so decimal, hex and
// short-form IPv4 literals ("2130706433", "0x7f.1") are caught as the
// addresses they resolve to.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::resolver::errors::ValidationError;

const MAX_URL_LEN: usize = 2048;
const MAX_DECODE_ROUNDS: usize = 4;

/// Query parameters that never identify content
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "twclid", "ttclid", "igshid", "igsh", "si",
    "ref", "ref_src", "ref_url", "referrer", "mibextid", "is_from_webapp", "sender_device",
    "sender_web_id", "is_copy_url", "_t", "_r", "feature", "pp", "s", "rdid", "hss_channel",
    "__cft__", "__tn__", "_rdr",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "share_", "mc_"];

const BLOCKED_HOST_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".localdomain", ".home.arpa"];

/// A validated, tracking-stripped http(s) URL.
///
/// Only `normalize` builds one, so holding a `CanonicalUrl` means the URL
/// passed `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Locate the first http(s) link in free text.
///
/// The scheme must start the text or follow whitespace, so
/// `garbage.https://evil.com` is not read as a link.
pub fn extract_url(text: &str) -> Result<&str, ValidationError> {
    let lower = text.to_ascii_lowercase();
    let mut from = 0;

    while let Some(offset) = find_scheme(&lower[from..]) {
        let start = from + offset;
        let at_boundary = start == 0
            || text[..start]
                .chars()
                .next_back()
                .map_or(false, char::is_whitespace);

        if at_boundary {
            let rest = &text[start..];
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let token = rest[..end].trim_end_matches(|c: char| ".,;:!?)]}>'\"".contains(c));
            if token.len() > "https://".len() {
                return Ok(token);
            }
        }
        from = start + 1;
    }

    Err(ValidationError::NoUrlFound)
}

fn find_scheme(lower: &str) -> Option<usize> {
    match (lower.find("http://"), lower.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Check a URL is safe to fetch and return it parsed
pub fn validate(raw: &str, allow_private_networks: bool) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::Malformed("empty URL".to_string()));
    }
    if raw.len() > MAX_URL_LEN {
        return Err(ValidationError::Malformed(format!("URL longer than {} bytes", MAX_URL_LEN)));
    }
    if hides_dangerous_scheme(raw) {
        return Err(ValidationError::EncodedScheme);
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ValidationError::EmbeddedCredentials);
    }

    let host = url
        .host()
        .ok_or_else(|| ValidationError::Malformed("missing host".to_string()))?;

    if !allow_private_networks {
        check_host(&host)?;
    }

    Ok(url)
}

fn check_host(host: &Host<&str>) -> Result<(), ValidationError> {
    match host {
        Host::Ipv4(ip) => {
            if is_blocked_ip(IpAddr::V4(*ip)) {
                return Err(ValidationError::BlockedHost(ip.to_string()));
            }
        }
        Host::Ipv6(ip) => {
            if is_blocked_ip(IpAddr::V6(*ip)) {
                return Err(ValidationError::BlockedHost(ip.to_string()));
            }
        }
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            if domain == "localhost"
                || domain == "ip6-localhost"
                || BLOCKED_HOST_SUFFIXES.iter().any(|s| domain.ends_with(s))
            {
                return Err(ValidationError::BlockedHost(domain));
            }
        }
    }
    Ok(())
}

/// Private, loopback, link-local, unspecified and similar non-public ranges
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let segments = ip.segments();
    // Deprecated IPv4-compatible form ::a.b.c.d
    if segments[..6] == [0; 6] && !ip.is_loopback() && !ip.is_unspecified() {
        let o = ip.octets();
        return is_blocked_v4(Ipv4Addr::new(o[12], o[13], o[14], o[15]));
    }
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
}

/// javascript:/vbscript:/data:/file: hidden behind (possibly repeated)
/// percent-encoding anywhere in the URL
fn hides_dangerous_scheme(raw: &str) -> bool {
    let mut current = raw.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        let compact: String = current
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect::<String>()
            .to_lowercase();
        if compact.contains("javascript:")
            || compact.contains("vbscript:")
            || compact.contains("data:text/html")
            || compact.starts_with("data:")
            || compact.starts_with("file:")
        {
            return true;
        }

        let decoded = String::from_utf8_lossy(&urlencoding::decode_binary(current.as_bytes())).into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    false
}

/// Resolve a hostname and reject it when any address is non-public
pub async fn check_resolved_host(url: &Url, allow_private_networks: bool) -> Result<(), ValidationError> {
    if allow_private_networks {
        return Ok(());
    }
    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| ValidationError::Malformed(format!("DNS lookup failed for {}: {}", domain, e)))?;

    for addr in addrs {
        if is_blocked_ip(addr.ip()) {
            return Err(ValidationError::BlockedHost(format!("{} ({})", domain, addr.ip())));
        }
    }
    Ok(())
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str()) || TRACKING_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Remove tracking parameters and the fragment in place
pub fn strip_tracking(url: &mut Url) {
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter())
            .finish();
        url.set_query(Some(&query));
    }
}

/// Canonical form of a validated URL.
///
/// Lower-cases scheme and host (the parser already does), drops trailing
/// host dots, strips tracking parameters and the fragment, and collapses
/// repeated path separators. Idempotent.
pub fn normalize(url: &Url) -> CanonicalUrl {
    let mut url = url.clone();

    if let Some(domain) = url.domain().map(|d| d.trim_end_matches('.').to_lowercase()) {
        if !domain.is_empty() && Some(domain.as_str()) != url.domain() {
            // Domain names that passed validation always re-parse as hosts
            let _ = url.set_host(Some(&domain));
        }
    }

    let path = url.path().to_string();
    if path.contains("//") {
        let mut collapsed = String::with_capacity(path.len());
        let mut previous_slash = false;
        for c in path.chars() {
            if c == '/' && previous_slash {
                continue;
            }
            previous_slash = c == '/';
            collapsed.push(c);
        }
        url.set_path(&collapsed);
    }

    strip_tracking(&mut url);
    CanonicalUrl(url.to_string())
}

/// extract + validate + normalize
pub fn canonicalize(text: &str, allow_private_networks: bool) -> Result<CanonicalUrl, ValidationError> {
    let raw = extract_url(text)?;
    let url = validate(raw, allow_private_networks)?;
    Ok(normalize(&url))
}
