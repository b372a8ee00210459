//! Typed configuration, read from the `cas` table of the Rocket figment and
//! validated once at ignite.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const MIN_SESSION_SECRET_LEN: usize = 32;

/// CAS protocol generation used for ticket validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasVersion {
    /// Plain-text `yes`/`no` protocol on `/validate`.
    V1,
    /// XML protocol on `/proxyValidate`, with proxy support.
    V2,
}

/// Raw configuration as deserialized from `Rocket.toml` / `ROCKET_CAS_*`.
#[derive(Debug, Clone, Deserialize)]
pub struct CasConfig {
    pub server_url: String,
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
    pub retry_login: bool,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    #[serde(default)]
    pub ignore_referer: bool,
    #[serde(default)]
    pub extra_login_params: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub logout_completely: bool,
    #[serde(default)]
    pub login_required: bool,
    #[serde(default)]
    pub proxy_callback: Option<String>,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    pub session_secret: String,
    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: u64,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub pgt_store_path: Option<PathBuf>,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

fn default_version() -> u8 {
    2
}

fn default_redirect_url() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_validation_timeout() -> u64 {
    10
}

fn default_session_max_age() -> u64 {
    8 * 60 * 60
}

fn default_session_cookie() -> String {
    "cas_session".to_string()
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_mount_path() -> String {
    "/accounts".to_string()
}

/// Validated settings shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: Url,
    pub version: CasVersion,
    pub retry_login: bool,
    pub redirect_url: String,
    pub ignore_referer: bool,
    pub extra_login_params: BTreeMap<String, String>,
    pub logout_completely: bool,
    pub login_required: bool,
    pub proxy_callback: Option<Url>,
    pub validation_timeout: Duration,
    pub session_secret: Vec<u8>,
    pub session_max_age: Duration,
    pub session_cookie: String,
    pub trust_forwarded_headers: bool,
    pub server_name: String,
    pub pgt_store_path: Option<PathBuf>,
    pub mount_path: String,
}

impl CasConfig {
    /// Checks every option and produces the settings used at runtime.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let server_url = Url::parse(&self.server_url).map_err(ConfigError::InvalidServerUrl)?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedServerScheme(server_url.scheme().to_string()));
        }

        let version = match self.version {
            1 => CasVersion::V1,
            2 => CasVersion::V2,
            other => return Err(ConfigError::UnsupportedVersion(other)),
        };

        let proxy_callback = match self.proxy_callback {
            Some(raw) => {
                let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidProxyCallback(raw.clone()))?;
                if url.scheme() != "https" {
                    return Err(ConfigError::InvalidProxyCallback(raw));
                }
                Some(url)
            }
            None => None,
        };

        // curl reads a zero timeout as "wait forever".
        if self.validation_timeout_secs == 0 {
            return Err(ConfigError::ZeroValidationTimeout);
        }

        if self.session_secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::WeakSessionSecret { min: MIN_SESSION_SECRET_LEN });
        }

        if !self.mount_path.starts_with('/') {
            return Err(ConfigError::InvalidMountPath(self.mount_path));
        }

        Ok(Settings {
            server_url,
            version,
            retry_login: self.retry_login,
            redirect_url: self.redirect_url,
            ignore_referer: self.ignore_referer,
            extra_login_params: self.extra_login_params,
            logout_completely: self.logout_completely,
            login_required: self.login_required,
            proxy_callback,
            validation_timeout: Duration::from_secs(self.validation_timeout_secs),
            session_secret: self.session_secret.into_bytes(),
            session_max_age: Duration::from_secs(self.session_max_age_secs),
            session_cookie: self.session_cookie,
            trust_forwarded_headers: self.trust_forwarded_headers,
            server_name: self.server_name,
            pgt_store_path: self.pgt_store_path,
            mount_path: self.mount_path,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    CasConfig {
        server_url: "https://cas.example.com/cas/".to_string(),
        version: 2,
        retry_login: false,
        redirect_url: "/".to_string(),
        ignore_referer: false,
        extra_login_params: BTreeMap::new(),
        logout_completely: true,
        login_required: false,
        proxy_callback: None,
        validation_timeout_secs: 10,
        session_secret: "0123456789abcdef0123456789abcdef".to_string(),
        session_max_age_secs: 3600,
        session_cookie: "cas_session".to_string(),
        trust_forwarded_headers: false,
        server_name: "localhost".to_string(),
        pgt_store_path: None,
        mount_path: "/accounts".to_string(),
    }
    .validate()
    .unwrap()
}
