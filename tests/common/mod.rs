#![allow(dead_code)]

use std::collections::BTreeMap;

use cas_gate::CasConfig;
use rocket::figment::Figment;
use rocket::http::Header;
use rocket::local::asynchronous::{Client, LocalRequest};
use url::Url;

pub const APP_HOST: &str = "app.example.com";
pub const SESSION_SECRET: &str = "0123456789abcdef0123456789abcdef";

pub const SUCCESS_XML: &str = r#"<cas:serviceResponse xmlns:cas='http://www.yale.edu/tp/cas'>
    <cas:authenticationSuccess>
        <cas:user>jdoe</cas:user>
        <cas:attributes>
            <cas:mail>jdoe@example.com</cas:mail>
        </cas:attributes>
        <cas:proxyGrantingTicket>PGTIOU-1</cas:proxyGrantingTicket>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#;

pub const FAILURE_XML: &str = r#"<cas:serviceResponse xmlns:cas='http://www.yale.edu/tp/cas'>
    <cas:authenticationFailure code="INVALID_TICKET">Ticket ST-1 not recognized</cas:authenticationFailure>
</cas:serviceResponse>"#;

/// Figment pointing the client at a mock CAS server.
pub fn figment(cas_uri: &str) -> Figment {
    rocket::Config::figment()
        .merge(("log_level", "off"))
        .merge(("cas.server_url", format!("{cas_uri}/cas/")))
        .merge(("cas.session_secret", SESSION_SECRET))
        .merge(("cas.retry_login", false))
        .merge(("cas.login_required", false))
        .merge(("cas.logout_completely", true))
}

pub async fn client(figment: Figment) -> Client {
    Client::tracked(cas_gate::rocket_from(figment))
        .await
        .expect("valid rocket instance")
}

/// GET with the Host header a browser would send.
pub fn get<'c>(client: &'c Client, uri: &'c str) -> LocalRequest<'c> {
    client.get(uri).header(Header::new("Host", APP_HOST))
}

pub fn query_value(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub fn config(server_url: &str) -> CasConfig {
    CasConfig {
        server_url: server_url.to_string(),
        version: 2,
        retry_login: false,
        redirect_url: "/".to_string(),
        ignore_referer: false,
        extra_login_params: BTreeMap::new(),
        logout_completely: true,
        login_required: false,
        proxy_callback: None,
        validation_timeout_secs: 5,
        session_secret: SESSION_SECRET.to_string(),
        session_max_age_secs: 3600,
        session_cookie: "cas_session".to_string(),
        trust_forwarded_headers: false,
        server_name: "localhost".to_string(),
        pgt_store_path: None,
        mount_path: "/accounts".to_string(),
    }
}
