use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use crate::error::AppError;

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::MIN.saturating_add(attempts.saturating_sub(1));
    let period = Duration::from_millis((window_seconds * 1000) / u64::from(burst.get()));

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Create a keyed rate limiter allowing `attempts` per `window_seconds` per IP
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Where the client address is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientIpSource {
    /// The socket peer. `X-Forwarded-For` is ignored.
    #[default]
    Peer,
    /// The last `X-Forwarded-For` hop, which the trusted reverse proxy in
    /// front of the service appends, falling back to the socket peer.
    TrustedProxy,
}

impl ClientIpSource {
    pub fn from_trust_proxy(trust_proxy: bool) -> Self {
        if trust_proxy {
            ClientIpSource::TrustedProxy
        } else {
            ClientIpSource::Peer
        }
    }
}

/// Middleware state: the limiter plus how requests are keyed.
#[derive(Clone)]
pub struct IpRateLimit {
    pub limiter: IpRateLimiter,
    pub source: ClientIpSource,
}

impl IpRateLimit {
    pub fn new(attempts: u32, window_seconds: u64, source: ClientIpSource) -> Self {
        IpRateLimit {
            limiter: create_ip_rate_limiter(attempts, window_seconds),
            source,
        }
    }
}

/// Client IP for `request` under `source`.
pub fn client_ip(request: &Request, source: ClientIpSource) -> Option<IpAddr> {
    client_ip_from(request.headers(), request.extensions(), source)
}

/// [`client_ip`] over already-split request parts.
pub fn client_ip_from(
    headers: &HeaderMap,
    extensions: &Extensions,
    source: ClientIpSource,
) -> Option<IpAddr> {
    let forwarded = match source {
        ClientIpSource::Peer => None,
        // Earlier hops are whatever the client sent and cannot be trusted.
        ClientIpSource::TrustedProxy => headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.rsplit(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok()),
    };

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request, limit.source) {
        Some(ip) => match limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(%ip, "Rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs()),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::post};
    use tower::ServiceExt;

    fn app(attempts: u32, source: ClientIpSource) -> Router {
        Router::new()
            .route("/sign-in", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                IpRateLimit::new(attempts, 60, source),
                ip_rate_limit_middleware,
            ))
    }

    fn request(peer: [u8; 4], forwarded_for: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/sign-in");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        req
    }

    #[tokio::test]
    async fn test_blocks_after_burst() {
        let app = app(2, ClientIpSource::Peer);

        for _ in 0..2 {
            let res = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_does_not_reset_peer_budget() {
        let app = app(1, ClientIpSource::Peer);

        let res = app
            .clone()
            .oneshot(request([10, 0, 0, 1], Some("198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request([10, 0, 0, 1], Some("198.51.100.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_peers_are_independent() {
        let app = app(1, ClientIpSource::Peer);

        let res = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.clone().oneshot(request([10, 0, 0, 2], None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trusted_proxy_keys_on_last_hop() {
        let app = app(1, ClientIpSource::TrustedProxy);

        // Same proxy peer, different real clients.
        let res = app
            .clone()
            .oneshot(request([10, 0, 0, 1], Some("198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request([10, 0, 0, 1], Some("198.51.100.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        // A client-supplied prefix does not change the key.
        let res = app
            .clone()
            .oneshot(request([10, 0, 0, 1], Some("203.0.113.7, 198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let req = request([10, 0, 0, 3], Some("not-an-ip"));
        let peer = Some(IpAddr::from([10, 0, 0, 3]));
        assert_eq!(client_ip(&req, ClientIpSource::TrustedProxy), peer);
        assert_eq!(client_ip(&req, ClientIpSource::Peer), peer);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_allows_one() {
        let app = app(0, ClientIpSource::Peer);

        let res = app.clone().oneshot(request([10, 0, 0, 9], None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
