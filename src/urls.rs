//! Service, login and logout URL construction.
//!
//! The service URL is the string a ticket is bound to on the CAS server. It must come
//! out identical when the login redirect is built and when the ticket is validated, so
//! it depends only on the scheme, host, path and redirect target of the request.

use url::form_urlencoded;

use crate::config::Settings;
use crate::context::RequestContext;
use crate::error::CasResult;

/// Query parameter carrying the post-login destination.
pub const REDIRECT_FIELD_NAME: &str = "next";

pub fn service_url(ctx: &RequestContext, redirect_to: Option<&str>) -> String {
    let mut service = format!("{}{}", ctx.origin(), ctx.path);
    if let Some(target) = redirect_to.filter(|target| !target.is_empty()) {
        service.push(if service.contains('?') { '&' } else { '?' });
        let encoded = form_urlencoded::Serializer::new(String::new())
            .append_pair(REDIRECT_FIELD_NAME, target)
            .finish();
        service.push_str(&encoded);
    }
    service
}

pub fn login_url(settings: &Settings, service: &str) -> CasResult<String> {
    let mut url = settings.server_url.join("login")?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("service", service);
        for (key, value) in &settings.extra_login_params {
            if key == "service" {
                tracing::warn!("ignoring extra login parameter `service`, it would override the ticket binding");
                continue;
            }
            pairs.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// CAS logout URL. The CAS server needs an absolute return URL, so `next_page` is
/// prefixed with this application's origin.
pub fn logout_url(settings: &Settings, ctx: &RequestContext, next_page: Option<&str>) -> CasResult<String> {
    let mut url = settings.server_url.join("logout")?;
    if let Some(next_page) = next_page.filter(|page| !page.is_empty()) {
        url.query_pairs_mut()
            .append_pair("url", &format!("{}{}", ctx.origin(), next_page));
    }
    Ok(url.into())
}

/// Where to send the browser once login or logout is done.
///
/// An explicit `next` parameter wins and is used as given. Otherwise the referrer
/// (unless ignored) or the configured default is used, with this application's own
/// origin stripped so the result stays a local path.
pub fn redirect_target(settings: &Settings, ctx: &RequestContext) -> String {
    if let Some(next) = ctx.query_param(REDIRECT_FIELD_NAME).filter(|next| !next.is_empty()) {
        return next.to_string();
    }

    let next = if settings.ignore_referer {
        settings.redirect_url.as_str()
    } else {
        ctx.referer
            .as_deref()
            .filter(|referer| !referer.is_empty())
            .unwrap_or(&settings.redirect_url)
    };

    match strip_origin(next, &ctx.origin()) {
        Some("") => "/".to_string(),
        Some(local) => local.to_string(),
        None => next.to_string(),
    }
}

// Only strip on a boundary, `https://app.example.com.evil` is not our origin.
fn strip_origin<'a>(url: &'a str, origin: &str) -> Option<&'a str> {
    let rest = url.strip_prefix(origin)?;
    match rest.chars().next() {
        None | Some('/') | Some('?') | Some('#') => Some(rest),
        Some(_) => None,
    }
}
