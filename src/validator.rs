//! Out-of-band ticket validation against the CAS server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use isahc::{config::Configurable, AsyncReadResponseExt, HttpClient};
use string_tools::{get_all_after, get_all_between_strict};
use url::Url;

use crate::config::{CasVersion, Settings};
use crate::error::{CasError, CasResult};
use crate::identity::Identity;

/// Result of one validation exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The ticket was valid for this service. The identity carries the PGT IOU
    /// when the server issued one.
    Authenticated(Identity),
    /// The CAS server definitively refused the ticket.
    Rejected(String),
    /// No usable answer: network error, timeout, unexpected status or body.
    TransportFailure(String),
}

#[async_trait]
pub trait TicketValidator: Send + Sync {
    /// Validates `ticket` for exactly `service`. The service string is sent as is.
    async fn validate(&self, ticket: &str, service: &str) -> ValidationOutcome;
}

/// Validator talking to a real CAS server over HTTP.
pub struct CasValidator {
    client: HttpClient,
    server_url: Url,
    version: CasVersion,
    proxy_callback: Option<Url>,
}

impl CasValidator {
    pub fn new(settings: &Settings) -> CasResult<Self> {
        let client = HttpClient::builder()
            .timeout(settings.validation_timeout)
            .build()?;
        Ok(CasValidator {
            client,
            server_url: settings.server_url.clone(),
            version: settings.version,
            proxy_callback: settings.proxy_callback.clone(),
        })
    }

    /// Exchanges a proxy-granting ticket for a proxy ticket valid for `target_service`.
    pub async fn proxy_ticket(&self, pgt: &str, target_service: &str) -> CasResult<String> {
        let (status, body) = self
            .fetch("proxy", &[("targetService", target_service), ("pgt", pgt)])
            .await?;
        match parse_proxy_response(&body) {
            Err(CasError::ValidationTransport(_)) if status != 200 => Err(CasError::ValidationTransport(
                format!("CAS server answered {status}"),
            )),
            other => other,
        }
    }

    async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> CasResult<(u16, String)> {
        let mut url = self.server_url.join(endpoint)?;
        url.query_pairs_mut().extend_pairs(params.iter());

        let mut response = self.client.get_async(url.as_str()).await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CasError::ValidationTransport(format!("unreadable response body: {e}")))?;
        Ok((status, body))
    }
}

#[async_trait]
impl TicketValidator for CasValidator {
    async fn validate(&self, ticket: &str, service: &str) -> ValidationOutcome {
        let mut params = vec![("ticket", ticket), ("service", service)];
        let endpoint = match self.version {
            CasVersion::V1 => "validate",
            CasVersion::V2 => {
                if let Some(callback) = &self.proxy_callback {
                    params.push(("pgtUrl", callback.as_str()));
                }
                "proxyValidate"
            }
        };

        let (status, body) = match self.fetch(endpoint, &params).await {
            Ok(answer) => answer,
            Err(e) => return ValidationOutcome::TransportFailure(e.to_string()),
        };

        let outcome = match self.version {
            CasVersion::V1 => parse_cas1_response(&body),
            CasVersion::V2 => parse_cas2_response(&body),
        };

        // Some servers send failures with a 4xx status. A readable rejection is
        // still definitive, anything else from a non-200 answer is not.
        match outcome {
            ValidationOutcome::Rejected(_) => outcome,
            _ if status != 200 => ValidationOutcome::TransportFailure(format!("CAS server answered {status}")),
            _ => outcome,
        }
    }
}

/// CAS 1.0: `yes\n<user>\n` or `no\n\n`.
pub fn parse_cas1_response(body: &str) -> ValidationOutcome {
    let mut lines = body.lines();
    match lines.next().map(str::trim) {
        Some("yes") => match lines.next().map(str::trim).filter(|user| !user.is_empty()) {
            Some(user) => ValidationOutcome::Authenticated(Identity::new(user)),
            None => ValidationOutcome::TransportFailure("CAS 1.0 success without a username".into()),
        },
        Some("no") => ValidationOutcome::Rejected("INVALID_TICKET".into()),
        _ => ValidationOutcome::TransportFailure("malformed CAS 1.0 response".into()),
    }
}

/// CAS 2.0 `<cas:serviceResponse>` envelope.
pub fn parse_cas2_response(xml: &str) -> ValidationOutcome {
    if xml.contains("<cas:authenticationFailure") {
        let code = failure_code(xml, "<cas:authenticationFailure");
        return ValidationOutcome::Rejected(code);
    }

    let Some(success) = get_all_between_strict(xml, "<cas:authenticationSuccess>", "</cas:authenticationSuccess>") else {
        return ValidationOutcome::TransportFailure("malformed CAS 2.0 response".into());
    };
    let Some(user) = get_all_between_strict(success, "<cas:user>", "</cas:user>").map(xml_text) else {
        return ValidationOutcome::TransportFailure("CAS 2.0 success without a user".into());
    };
    if user.is_empty() {
        return ValidationOutcome::TransportFailure("CAS 2.0 success without a user".into());
    }

    let pgt_iou = get_all_between_strict(success, "<cas:proxyGrantingTicket>", "</cas:proxyGrantingTicket>")
        .map(xml_text)
        .filter(|iou| !iou.is_empty());

    ValidationOutcome::Authenticated(Identity {
        username: user,
        attributes: parse_attributes(success),
        pgt_iou,
    })
}

/// `/proxy` answer: the proxy ticket, or why it was refused.
pub fn parse_proxy_response(xml: &str) -> CasResult<String> {
    if xml.contains("<cas:proxyFailure") {
        return Err(CasError::ProxyRejected(failure_code(xml, "<cas:proxyFailure")));
    }
    get_all_between_strict(xml, "<cas:proxyTicket>", "</cas:proxyTicket>")
        .map(xml_text)
        .filter(|ticket| !ticket.is_empty())
        .ok_or_else(|| CasError::ValidationTransport("malformed CAS proxy response".into()))
}

fn failure_code(xml: &str, element: &str) -> String {
    let failure = get_all_after(xml, element);
    let tag = failure.split('>').next().unwrap_or_default();
    get_all_between_strict(tag, "code=\"", "\"")
        .or_else(|| get_all_between_strict(tag, "code='", "'"))
        .map(str::to_string)
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn parse_attributes(success: &str) -> BTreeMap<String, Vec<String>> {
    let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(mut block) = get_all_between_strict(success, "<cas:attributes>", "</cas:attributes>") else {
        return attributes;
    };

    while let Some(name) = get_all_between_strict(block, "<cas:", ">") {
        let open = format!("<cas:{name}>");
        let close = format!("</cas:{name}>");
        match get_all_between_strict(block, &open, &close) {
            Some(value) if !name.contains(['/', ' ']) => {
                attributes.entry(name.to_string()).or_default().push(xml_text(value));
                block = get_all_after(block, &close);
            }
            // Self-closing or attribute-carrying element: skip past its tag.
            _ => block = get_all_after(block, &open),
        }
    }
    attributes
}

fn xml_text(raw: &str) -> String {
    raw.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
