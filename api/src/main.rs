use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod catalog;
mod config;
mod emails;
mod error;
mod extract;
mod identity;
mod lifecycle;
mod mail;
mod middleware;
mod routes;
mod state;
mod store;

use config::{Config, StoreKind};
use identity::{IdentityProvider, StoreIdentityProvider};
use mail::{LogMailSender, MailSender, PostmarkMailSender};
use store::{DocumentStore, MemoryStore, PgDocumentStore};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trax Events API",
        version = "0.1.0",
        description = "Organisation onboarding, host and sales account provisioning, guest invitations and event analytics."
    ),
    paths(
        routes::health::health_check,
        routes::auth::signup_admin,
        routes::auth::issue_token,
        routes::organisation::check_organisation_info,
        routes::organisation::save_company_info,
        routes::hosts::create_host_user,
        routes::hosts::delete_host_user,
        routes::hosts::resend_host_verification_email,
        routes::sales::create_sales_person_account,
        routes::invitations::send_invitations,
        routes::guest::get_selected_menu_items,
        routes::guest::submit_demographics_handler,
        routes::guest::submit_menu_selection_handler,
        routes::analytics::get_event_analytics,
    ),
    components(schemas(
        HealthResponse,
        trax_core::error::ApiError,
        trax_core::validation::Credentials,
        trax_core::validation::CompanyAddress,
        trax_core::validation::CompanyInfo,
        trax_core::menu::CategoryKey,
        trax_core::menu::MenuItem,
        trax_core::invitations::DemographicAnswer,
        trax_core::invitations::SendStatus,
        trax_core::invitations::InvitationResult,
        trax_core::analytics::InvitationFunnel,
        trax_core::analytics::QuestionStats,
        trax_core::analytics::DemographicsSummary,
        trax_core::analytics::MenuItemPopularity,
        trax_core::analytics::MenuSummary,
        routes::auth::SignupResponse,
        routes::auth::TokenResponse,
        routes::organisation::OrganisationInfoResponse,
        routes::organisation::SaveCompanyInfoResponse,
        routes::hosts::CreateHostRequest,
        routes::hosts::CreateHostResponse,
        routes::hosts::DeleteHostRequest,
        routes::hosts::DeleteHostResponse,
        routes::hosts::ResendHostEmailRequest,
        routes::hosts::ResendHostEmailResponse,
        routes::sales::CreateSalesPersonRequest,
        routes::sales::CreateSalesPersonResponse,
        routes::invitations::GuestEntry,
        routes::invitations::SendInvitationsRequest,
        routes::invitations::SendInvitationsResponse,
        routes::guest::InvitationAccessRequest,
        routes::guest::MenuGroupView,
        routes::guest::SelectedMenuResponse,
        routes::guest::SubmitDemographicsRequest,
        routes::guest::SubmitMenuSelectionRequest,
        routes::guest::SubmissionResponse,
        routes::analytics::EventAnalyticsRequest,
        routes::analytics::EventAnalyticsResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn build_store(config: &Config) -> Result<Arc<dyn DocumentStore>, Box<dyn std::error::Error>> {
    match config.store {
        StoreKind::Memory => {
            tracing::warn!("using in-memory document store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set unless TRAX_STORE=memory")?;
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(database_url)
                .await?;
            sqlx::migrate!("../migrations").run(&pool).await?;
            Ok(Arc::new(PgDocumentStore::new(pool)))
        }
    }
}

fn build_mail(config: &Config) -> Arc<dyn MailSender> {
    match &config.postmark {
        Some(postmark) => Arc::new(PostmarkMailSender::new(
            postmark.server_token.clone(),
            postmark.message_stream.clone(),
            postmark.from.clone(),
        )),
        None => {
            tracing::warn!("POSTMARK_SERVER_TOKEN not set; outbound mail is only logged");
            Arc::new(LogMailSender)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trax_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();
    let store = build_store(&config).await?;
    let mail = build_mail(&config);
    let identity: Arc<dyn IdentityProvider> = Arc::new(StoreIdentityProvider::new(
        store.clone(),
        config.retry,
        config.app_base_url.clone(),
    ));

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let app_state = state::AppState {
        store,
        mail,
        identity: identity.clone(),
        config: Arc::new(config),
    };

    // Per-IP rate limiting on the unauthenticated entry points
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::signup_router().layer(middleware::rate_limit::signup_layer()?))
        .merge(routes::auth::token_router().layer(middleware::rate_limit::token_layer()?))
        .merge(routes::organisation::router())
        .merge(routes::hosts::router())
        .merge(routes::sales::router())
        .merge(routes::invitations::router())
        .merge(routes::analytics::router())
        .merge(routes::guest::router().layer(middleware::rate_limit::guest_layer()?))
        .fallback(routes::unknown_operation)
        .layer(auth::InjectAuthLayer::new(identity))
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    tracing::info!("Trax API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
