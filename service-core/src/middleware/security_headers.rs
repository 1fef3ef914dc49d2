use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Extra sources appended after `'self'` in each Content-Security-Policy directive.
#[derive(Debug, Clone, Default)]
pub struct CspSources {
    pub default_src: Vec<String>,
    pub child_src: Vec<String>,
    pub img_src: Vec<String>,
}

/// Precomputed header values, built once at startup.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: HeaderValue,
}

fn directive(name: &str, extra: &[String]) -> String {
    let mut out = format!("{} 'self'", name);
    for src in extra.iter().filter(|s| !s.trim().is_empty()) {
        out.push(' ');
        out.push_str(src.trim());
    }
    out
}

impl SecurityHeaders {
    pub fn new(sources: &CspSources) -> Result<Self, http::header::InvalidHeaderValue> {
        let policy = [
            directive("default-src", &sources.default_src),
            directive("child-src", &sources.child_src),
            directive("img-src", &sources.img_src),
            "style-src 'self' 'unsafe-inline'".to_string(),
        ]
        .join("; ");

        Ok(Self {
            csp: HeaderValue::from_str(&policy)?,
        })
    }

    pub fn content_security_policy(&self) -> &HeaderValue {
        &self.csp
    }
}

pub async fn security_headers_middleware(
    State(config): State<Arc<SecurityHeaders>>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS),
    );
    headers.insert(header::CONTENT_SECURITY_POLICY, config.csp.clone());

    response
}
