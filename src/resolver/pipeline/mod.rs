// URL pipeline: raw text -> canonical URL -> platform, descriptor, cache key

pub mod detector;
pub mod redirect;
pub mod validator;

pub use detector::{
    describe, detect_content_type, extract_content_id, generate_cache_key, PlatformDetector,
};
pub use redirect::RedirectResolver;
pub use validator::{canonicalize, extract_url, normalize, validate, CanonicalUrl};
