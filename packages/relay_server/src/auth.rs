//! Origin filtering for WebSocket upgrade requests.
//!
//! The relay can be told to only accept browser connections originating from
//! one host (and its subdomains). The policy is carried in app data and
//! enforced by a request guard on the upgrade route, so a rejected upgrade
//! never reaches the relay server task.

use actix_web::dev::Payload;
use actix_web::error::{ErrorBadRequest, ErrorForbidden};
use actix_web::http::{header, Uri};
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::{err, ok, Ready};

/// Origin host whitelist for WebSocket upgrades.
///
/// An `Origin` host is accepted when it equals the configured host or ends
/// with `"." + host`. An empty configuration accepts any origin, including
/// requests with no `Origin` header at all (non-browser clients).
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    host: Option<String>,
}

impl OriginPolicy {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();

        Self {
            host: if host.is_empty() { None } else { Some(host) },
        }
    }

    /// Whether `origin_host` is the configured host or one of its subdomains.
    fn allows(&self, origin_host: &str) -> bool {
        self.host.as_ref().map_or(true, |host| {
            origin_host == host || origin_host.ends_with(&format!(".{host}"))
        })
    }

    const fn is_open(&self) -> bool {
        self.host.is_none()
    }
}

/// Request guard that enforces the origin whitelist on the upgrade route.
///
/// With a whitelist configured, a request whose `Origin` header is missing or
/// yields no parseable host is a bad request; a parseable host outside the
/// whitelist is forbidden.
pub struct OriginAllowed;

impl FromRequest for OriginAllowed {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, actix_web::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        log::trace!("OriginAllowed from_request {}", req.path());

        let Some(policy) = req.app_data::<web::Data<OriginPolicy>>() else {
            log::error!("OriginPolicy app data is not configured");
            return err(ErrorForbidden("Forbidden"));
        };

        if policy.is_open() {
            return ok(Self);
        }

        let Some(origin_host) = origin_host(req) else {
            log::warn!("Rejected upgrade without a parseable Origin header");
            return err(ErrorBadRequest("Invalid Origin header"));
        };

        if policy.allows(&origin_host) {
            ok(Self)
        } else {
            log::warn!("Rejected upgrade from disallowed origin host '{origin_host}'");
            err(ErrorForbidden("Forbidden"))
        }
    }
}

fn origin_host(req: &HttpRequest) -> Option<String> {
    let origin = req.headers().get(header::ORIGIN)?.to_str().ok()?;
    let uri = origin.parse::<Uri>().ok()?;

    uri.host().map(ToString::to_string)
}
