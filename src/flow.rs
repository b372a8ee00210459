//! Login/logout state machine.
//!
//! Each request is classified into one of the [`LoginState`]s and answered with a
//! redirect or a forbidden page. Nothing here touches the web framework directly:
//! the request, the session and the user directory are passed in.

use std::sync::Arc;

use crate::config::Settings;
use crate::context::RequestContext;
use crate::directory::UserDirectory;
use crate::session::Session;
use crate::urls;

/// Query parameter carrying the service ticket.
pub const TICKET_FIELD_NAME: &str = "ticket";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    TicketPresented,
    Authenticated,
    ValidationFailed,
}

/// What the browser gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResponse {
    /// `302 Found` to the given location.
    Redirect(String),
    /// `403 Forbidden` with a generic body.
    Forbidden,
}

pub struct CasFlow {
    settings: Arc<Settings>,
    directory: Arc<dyn UserDirectory>,
}

impl CasFlow {
    pub fn new(settings: Arc<Settings>, directory: Arc<dyn UserDirectory>) -> Self {
        CasFlow { settings, directory }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Handles the login endpoint.
    ///
    /// `required` marks a login the user asked for, as opposed to an opportunistic
    /// one. A failed required login always goes back to the CAS server.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        session: &dyn Session,
        next_page: Option<&str>,
        required: bool,
    ) -> FlowResponse {
        let next_page = self.next_page(ctx, next_page);

        if let Some(identity) = session.current() {
            tracing::debug!(state = ?LoginState::Authenticated, user = %identity.username, "already logged in");
            return FlowResponse::Redirect(next_page);
        }

        let service = urls::service_url(ctx, Some(&next_page));
        let Some(ticket) = ctx.query_param(TICKET_FIELD_NAME).filter(|ticket| !ticket.is_empty()) else {
            tracing::debug!(state = ?LoginState::Unauthenticated, service = %service, "redirecting to CAS login");
            return self.login_redirect(&service);
        };

        tracing::debug!(state = ?LoginState::TicketPresented, service = %service, "validating service ticket");
        match self.directory.authenticate(ticket, &service).await {
            Ok(Some(identity)) => match session.establish(&identity) {
                Ok(()) => {
                    tracing::info!(
                        state = ?LoginState::Authenticated,
                        user = %identity.username,
                        service = %service,
                        "CAS login succeeded"
                    );
                    return FlowResponse::Redirect(next_page);
                }
                Err(e) => {
                    tracing::error!(state = ?LoginState::ValidationFailed, error = %e, "could not establish session");
                }
            },
            Ok(None) => {
                tracing::warn!(state = ?LoginState::ValidationFailed, service = %service, "service ticket rejected");
            }
            Err(e) => {
                tracing::error!(state = ?LoginState::ValidationFailed, service = %service, error = %e, "service ticket could not be validated");
            }
        }

        if self.settings.retry_login || required {
            self.login_redirect(&service)
        } else {
            FlowResponse::Forbidden
        }
    }

    /// Handles the logout endpoint. The local session is always torn down first.
    pub fn logout(&self, ctx: &RequestContext, session: &dyn Session, next_page: Option<&str>) -> FlowResponse {
        session.teardown();

        let next_page = self.next_page(ctx, next_page);
        if self.settings.logout_completely {
            match urls::logout_url(&self.settings, ctx, Some(&next_page)) {
                Ok(url) => return FlowResponse::Redirect(url),
                Err(e) => tracing::error!(error = %e, "could not build CAS logout URL, logging out locally"),
            }
        }
        FlowResponse::Redirect(next_page)
    }

    fn next_page(&self, ctx: &RequestContext, next_page: Option<&str>) -> String {
        match next_page.filter(|page| !page.is_empty()) {
            Some(page) => page.to_string(),
            None => urls::redirect_target(&self.settings, ctx),
        }
    }

    fn login_redirect(&self, service: &str) -> FlowResponse {
        match urls::login_url(&self.settings, service) {
            Ok(url) => FlowResponse::Redirect(url),
            Err(e) => {
                tracing::error!(error = %e, "could not build CAS login URL");
                FlowResponse::Forbidden
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::config::test_settings;
    use crate::context::test_context;
    use crate::error::{CasError, CasResult, SessionError};
    use crate::identity::Identity;

    enum Answer {
        Accept,
        Reject,
        Unreachable,
    }

    struct StubDirectory {
        answer: Answer,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl StubDirectory {
        fn new(answer: Answer) -> Arc<Self> {
            Arc::new(StubDirectory {
                answer,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl UserDirectory for StubDirectory {
        async fn authenticate(&self, ticket: &str, service: &str) -> CasResult<Option<Identity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((ticket.to_string(), service.to_string()));
            match self.answer {
                Answer::Accept => Ok(Some(Identity::new("jdoe"))),
                Answer::Reject => Ok(None),
                Answer::Unreachable => Err(CasError::ValidationTransport("connection refused".into())),
            }
        }
    }

    #[derive(Default)]
    struct MemorySession {
        identity: Mutex<Option<Identity>>,
        established: AtomicUsize,
        events: Mutex<Vec<&'static str>>,
    }

    impl MemorySession {
        fn logged_in() -> Self {
            let session = MemorySession::default();
            *session.identity.lock().unwrap() = Some(Identity::new("jdoe"));
            session
        }
    }

    impl Session for MemorySession {
        fn current(&self) -> Option<Identity> {
            self.identity.lock().unwrap().clone()
        }

        fn establish(&self, identity: &Identity) -> Result<(), SessionError> {
            self.established.fetch_add(1, Ordering::SeqCst);
            *self.identity.lock().unwrap() = Some(identity.clone());
            Ok(())
        }

        fn teardown(&self) {
            self.events.lock().unwrap().push("teardown");
            *self.identity.lock().unwrap() = None;
        }
    }

    fn flow(settings: Settings, directory: Arc<StubDirectory>) -> CasFlow {
        CasFlow::new(Arc::new(settings), directory)
    }

    fn service_param(location: &str) -> String {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .find(|(key, _)| key == "service")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[rocket::async_test]
    async fn active_session_short_circuits() {
        let directory = StubDirectory::new(Answer::Accept);
        let flow = flow(test_settings(), directory.clone());
        let ctx = test_context("/accounts/login", &[("ticket", "ST-1"), ("next", "/inbox")]);

        let response = flow.login(&ctx, &MemorySession::logged_in(), None, false).await;

        assert_eq!(response, FlowResponse::Redirect("/inbox".into()));
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn no_ticket_redirects_to_login_with_matching_service() {
        let directory = StubDirectory::new(Answer::Accept);
        let flow = flow(test_settings(), directory.clone());
        let mut ctx = test_context("/accounts/login", &[]);
        ctx.referer = Some("https://app.example.com/app/page".into());

        let FlowResponse::Redirect(location) = flow.login(&ctx, &MemorySession::default(), None, false).await else {
            panic!("expected a redirect");
        };

        assert!(location.starts_with("https://cas.example.com/cas/login?"));
        assert_eq!(service_param(&location), urls::service_url(&ctx, Some("/app/page")));
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn valid_ticket_establishes_session_once() {
        let directory = StubDirectory::new(Answer::Accept);
        let flow = flow(test_settings(), directory.clone());
        let ctx = test_context("/accounts/login", &[("ticket", "ST-1"), ("next", "/inbox")]);
        let session = MemorySession::default();

        let response = flow.login(&ctx, &session, None, false).await;

        assert_eq!(response, FlowResponse::Redirect("/inbox".into()));
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.established.load(Ordering::SeqCst), 1);
        assert_eq!(
            directory.seen.lock().unwrap()[0],
            ("ST-1".to_string(), "https://app.example.com/accounts/login?next=%2Finbox".to_string())
        );
    }

    #[rocket::async_test]
    async fn rejected_optional_login_is_forbidden() {
        let directory = StubDirectory::new(Answer::Reject);
        let flow = flow(test_settings(), directory.clone());
        let ctx = test_context("/accounts/login", &[("ticket", "ST-1")]);
        let session = MemorySession::default();

        assert_eq!(flow.login(&ctx, &session, None, false).await, FlowResponse::Forbidden);
        assert_eq!(session.established.load(Ordering::SeqCst), 0);
    }

    #[rocket::async_test]
    async fn rejected_login_retries_when_configured_or_required() {
        let ctx = test_context("/accounts/login", &[("ticket", "ST-1")]);

        let mut settings = test_settings();
        settings.retry_login = true;
        let retrying = flow(settings, StubDirectory::new(Answer::Reject));
        let FlowResponse::Redirect(location) = retrying.login(&ctx, &MemorySession::default(), None, false).await else {
            panic!("expected a redirect");
        };
        assert!(!service_param(&location).contains("ST-1"));

        let required = flow(test_settings(), StubDirectory::new(Answer::Reject));
        assert!(matches!(
            required.login(&ctx, &MemorySession::default(), None, true).await,
            FlowResponse::Redirect(location) if location.starts_with("https://cas.example.com/cas/login?")
        ));
    }

    #[rocket::async_test]
    async fn transport_failure_follows_rejection_policy() {
        let ctx = test_context("/accounts/login", &[("ticket", "ST-1")]);
        let directory = StubDirectory::new(Answer::Unreachable);
        let flow = flow(test_settings(), directory.clone());

        assert_eq!(flow.login(&ctx, &MemorySession::default(), None, false).await, FlowResponse::Forbidden);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    }

    #[rocket::async_test]
    async fn explicit_next_page_overrides_resolution() {
        let flow = flow(test_settings(), StubDirectory::new(Answer::Accept));
        let ctx = test_context("/accounts/login", &[("next", "/ignored")]);
        let response = flow.login(&ctx, &MemorySession::logged_in(), Some("/chosen"), false).await;
        assert_eq!(response, FlowResponse::Redirect("/chosen".into()));
    }

    #[test]
    fn complete_logout_goes_through_cas() {
        let flow = flow(test_settings(), StubDirectory::new(Answer::Accept));
        let ctx = test_context("/accounts/logout", &[("next", "/bye")]);
        let session = MemorySession::logged_in();

        let FlowResponse::Redirect(location) = flow.logout(&ctx, &session, None) else {
            panic!("expected a redirect");
        };

        assert!(session.current().is_none());
        let url = Url::parse(&location).unwrap();
        assert_eq!(url.path(), "/cas/logout");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "url").map(|(_, v)| v.into_owned()).as_deref(),
            Some("https://app.example.com/bye")
        );
    }

    #[test]
    fn local_logout_redirects_to_target() {
        let mut settings = test_settings();
        settings.logout_completely = false;
        let flow = flow(settings, StubDirectory::new(Answer::Accept));
        let mut ctx = test_context("/accounts/logout", &[]);
        ctx.referer = Some("https://app.example.com/app/page".into());
        let session = MemorySession::logged_in();

        assert_eq!(flow.logout(&ctx, &session, None), FlowResponse::Redirect("/app/page".into()));
        assert_eq!(*session.events.lock().unwrap(), vec!["teardown"]);
    }

    #[test]
    fn logout_tears_down_even_when_logout_url_cannot_be_built() {
        let mut settings = test_settings();
        settings.server_url = Url::parse("data:text/plain,cas").unwrap();
        let flow = flow(settings, StubDirectory::new(Answer::Accept));
        let ctx = test_context("/accounts/logout", &[("next", "/bye")]);
        let session = MemorySession::logged_in();

        assert_eq!(flow.logout(&ctx, &session, None), FlowResponse::Redirect("/bye".into()));
        assert!(session.current().is_none());
        assert_eq!(*session.events.lock().unwrap(), vec!["teardown"]);
    }
}
