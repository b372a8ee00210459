//! Rocket bindings: request guards, responders and the CAS endpoints.

use std::io::Cursor;
use std::sync::Arc;

use rocket::http::{Header, Status};
use rocket::request::{self, FromRequest, Request};
use rocket::response::{self, Responder, Response};
use rocket::{get, FromForm, State};
use url::form_urlencoded;

use crate::config::Settings;
use crate::context::{RequestContext, Scheme};
use crate::flow::{CasFlow, FlowResponse};
use crate::identity::Identity;
use crate::registry::{self, PgtRegistry};
use crate::session::{JwtSession, Session, SessionKeys};

const FORBIDDEN_BODY: &str = "<h1>Forbidden</h1><p>Login failed.</p>";

impl<'r, 'o: 'r> Responder<'r, 'o> for FlowResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'o> {
        let mut response = Response::build();
        match self {
            FlowResponse::Redirect(location) => {
                response.status(Status::Found)
                    .header(Header::new("Location", location));
            }
            FlowResponse::Forbidden => {
                response.status(Status::Forbidden)
                    .header(Header::new("Content-Type", "text/html; charset=utf-8"))
                    .sized_body(FORBIDDEN_BODY.len(), Cursor::new(FORBIDDEN_BODY));
            }
        }
        Ok(response.finalize())
    }
}

pub struct SessionResponse(Option<Identity>);

impl<'r, 'o: 'r> Responder<'r, 'o> for SessionResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'o> {
        let mut response = Response::build();
        match self.0 {
            Some(identity) => {
                let body = serde_json::to_string(&identity).unwrap_or_default();
                response.status(Status::Ok)
                    .header(Header::new("Content-Type", "application/json"))
                    .sized_body(body.len(), Cursor::new(body));
            }
            None => {
                let body = "Not authenticated";
                response.status(Status::Unauthorized)
                    .header(Header::new("Content-Type", "text/plain"))
                    .sized_body(body.len(), Cursor::new(body));
            }
        }
        Ok(response.finalize())
    }
}

fn request_scheme(req: &Request<'_>, settings: &Settings) -> Scheme {
    if req.rocket().config().tls_enabled() {
        return Scheme::Https;
    }
    let forwarded_https = settings.trust_forwarded_headers
        && req
            .headers()
            .get_one("X-Forwarded-Proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    Scheme::from_secure(forwarded_https)
}

fn request_host(req: &Request<'_>, settings: &Settings) -> String {
    let forwarded = settings
        .trust_forwarded_headers
        .then(|| req.headers().get_one("X-Forwarded-Host"))
        .flatten();
    forwarded
        .or_else(|| req.headers().get_one("Host"))
        .unwrap_or(&settings.server_name)
        .to_string()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestContext {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(flow) = req.rocket().state::<CasFlow>() else {
            return request::Outcome::Error((Status::InternalServerError, ()));
        };
        let settings = flow.settings();
        let query = req
            .uri()
            .query()
            .map(|query| form_urlencoded::parse(query.as_str().as_bytes()).into_owned().collect())
            .unwrap_or_default();

        request::Outcome::Success(RequestContext {
            scheme: request_scheme(req, settings),
            host: request_host(req, settings),
            path: req.uri().path().as_str().to_string(),
            query,
            referer: req.headers().get_one("Referer").map(str::to_string),
        })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for JwtSession<'r> {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let rocket = req.rocket();
        let (Some(flow), Some(keys)) = (rocket.state::<CasFlow>(), rocket.state::<SessionKeys>()) else {
            return request::Outcome::Error((Status::InternalServerError, ()));
        };
        let secure = request_scheme(req, flow.settings()) == Scheme::Https;
        request::Outcome::Success(JwtSession::new(req.cookies(), keys, secure))
    }
}

#[get("/login")]
pub async fn login(flow: &State<CasFlow>, ctx: RequestContext, session: JwtSession<'_>) -> FlowResponse {
    flow.login(&ctx, &session, None, flow.settings().login_required).await
}

#[get("/logout")]
pub fn logout(flow: &State<CasFlow>, ctx: RequestContext, session: JwtSession<'_>) -> FlowResponse {
    flow.logout(&ctx, &session, None)
}

/// Query string of a proxy callback. Either field may be missing when the CAS
/// server only checks that the callback URL answers.
#[derive(FromForm)]
pub struct ProxyCallback<'r> {
    #[field(name = "pgtIou")]
    pgt_iou: Option<&'r str>,
    #[field(name = "pgtId")]
    pgt_id: Option<&'r str>,
}

/// CAS server-to-server PGT delivery. Always answers 200 with an empty body.
#[get("/proxy-callback?<callback..>")]
pub async fn proxy_callback(pgt_registry: &State<Arc<dyn PgtRegistry>>, callback: ProxyCallback<'_>) {
    registry::record_callback(pgt_registry.inner().as_ref(), callback.pgt_iou, callback.pgt_id).await;
}

#[get("/session")]
pub fn session(session: JwtSession<'_>) -> SessionResponse {
    SessionResponse(session.current())
}
