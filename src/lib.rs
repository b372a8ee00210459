//! Service-side CAS client for Rocket applications.
//!
//! Mount it with [`rocket`] (configuration from `Rocket.toml`/`ROCKET_*`) or
//! [`rocket_from`] (explicit figment). The `cas` table configures the client; see
//! [`config::CasConfig`].

pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod flow;
pub mod identity;
pub mod registry;
pub mod routes;
pub mod session;
pub mod urls;
pub mod validator;

use std::sync::Arc;

use rocket::fairing::{self, AdHoc};
use rocket::figment::Figment;
use rocket::{routes, Build, Rocket};

pub use config::{CasConfig, CasVersion, Settings};
pub use context::{RequestContext, Scheme};
pub use directory::{CasDirectory, UserDirectory};
pub use error::{CasError, CasResult, ConfigError, RegistryError, SessionError};
pub use flow::{CasFlow, FlowResponse, LoginState};
pub use identity::Identity;
pub use registry::{FilePgtRegistry, InMemoryPgtRegistry, PgtIouRecord, PgtRegistry};
pub use session::{JwtSession, Session, SessionKeys};
pub use validator::{CasValidator, TicketValidator, ValidationOutcome};

pub fn rocket() -> Rocket<Build> {
    rocket_from(rocket::Config::figment())
}

pub fn rocket_from(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment).attach(AdHoc::try_on_ignite("CAS client", ignite))
}

async fn ignite(rocket: Rocket<Build>) -> fairing::Result {
    let config: CasConfig = match rocket.figment().extract_inner("cas") {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "missing or unreadable `cas` configuration");
            return Err(rocket);
        }
    };
    let settings = match config.validate() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid CAS configuration");
            return Err(rocket);
        }
    };
    let validator = match CasValidator::new(&settings) {
        Ok(validator) => Arc::new(validator),
        Err(e) => {
            tracing::error!(error = %e, "could not build CAS HTTP client");
            return Err(rocket);
        }
    };
    let registry: Arc<dyn PgtRegistry> = match &settings.pgt_store_path {
        Some(path) => match FilePgtRegistry::open(path).await {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "could not open PGT registry");
                return Err(rocket);
            }
        },
        None => Arc::new(InMemoryPgtRegistry::new()),
    };

    tracing::info!(
        server_url = %settings.server_url,
        version = ?settings.version,
        mount_path = %settings.mount_path,
        "CAS client configured"
    );

    let keys = SessionKeys::new(&settings);
    let mount_path = settings.mount_path.clone();
    let directory = Arc::new(CasDirectory::new(validator.clone()));
    let flow = CasFlow::new(Arc::new(settings), directory);

    // The validator is managed for host routes that call
    // `registry::proxy_ticket_for` with `&State<Arc<CasValidator>>`.
    Ok(rocket
        .manage(flow)
        .manage(keys)
        .manage(registry)
        .manage(validator)
        .mount(
            mount_path,
            routes![routes::login, routes::logout, routes::proxy_callback, routes::session],
        ))
}
