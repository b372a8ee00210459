//! Local session handling.
//!
//! The shipped session keeps the identity in a signed JWT cookie, so no server-side
//! session store is needed.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use rocket::http::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::error::SessionError;
use crate::identity::Identity;

/// Request-scoped view of the local session.
pub trait Session: Send + Sync {
    fn current(&self) -> Option<Identity>;

    fn establish(&self, identity: &Identity) -> Result<(), SessionError>;

    /// Ends the session. Never fails: a session that cannot be read is already gone.
    fn teardown(&self);
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: usize, // Expiration time (as UTC timestamp)
    iat: usize, // Issued at (as UTC timestamp)

    sub: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pgt_iou: Option<String>,
}

pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie: String,
    max_age: usize,
}

impl SessionKeys {
    pub fn new(settings: &Settings) -> Self {
        SessionKeys {
            encoding: EncodingKey::from_secret(&settings.session_secret),
            decoding: DecodingKey::from_secret(&settings.session_secret),
            cookie: settings.session_cookie.clone(),
            max_age: settings.session_max_age.as_secs() as usize,
        }
    }
}

pub struct JwtSession<'r> {
    cookies: &'r CookieJar<'r>,
    keys: &'r SessionKeys,
    secure: bool,
}

impl<'r> JwtSession<'r> {
    pub fn new(cookies: &'r CookieJar<'r>, keys: &'r SessionKeys, secure: bool) -> Self {
        JwtSession { cookies, keys, secure }
    }
}

impl Session for JwtSession<'_> {
    fn current(&self) -> Option<Identity> {
        let token = self.cookies.get(&self.keys.cookie)?;
        match jsonwebtoken::decode::<Claims>(token.value(), &self.keys.decoding, &Validation::new(Algorithm::HS256)) {
            Ok(data) => Some(Identity {
                username: data.claims.sub,
                attributes: data.claims.attributes,
                pgt_iou: data.claims.pgt_iou,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring invalid session cookie");
                None
            }
        }
    }

    fn establish(&self, identity: &Identity) -> Result<(), SessionError> {
        let utc_now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            exp: utc_now + self.keys.max_age,
            iat: utc_now,
            sub: identity.username.clone(),
            attributes: identity.attributes.clone(),
            pgt_iou: identity.pgt_iou.clone(),
        };
        let token = jsonwebtoken::encode(&jsonwebtoken::Header::new(Algorithm::HS256), &claims, &self.keys.encoding)?;

        let cookie = Cookie::build((self.keys.cookie.clone(), token))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(rocket::time::Duration::seconds(self.keys.max_age as i64));
        self.cookies.add(cookie);
        Ok(())
    }

    fn teardown(&self) {
        self.cookies
            .remove(Cookie::build((self.keys.cookie.clone(), "")).path("/"));
    }
}
