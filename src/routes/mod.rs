use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod appointments;
pub mod auth;
pub mod booking;
pub mod clients;
pub mod envelopes;
pub mod galleries;
pub mod health;
pub mod inquiries;
pub mod invoices;
pub mod oauth;
pub mod proposals;
pub mod settings;
pub mod signing;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let clients_routes = Router::new()
        .route("/", get(clients::list_clients).post(clients::create_client))
        .route(
            "/:id",
            get(clients::get_client)
                .patch(clients::update_client)
                .delete(clients::archive_client),
        )
        .route("/:id/restore", post(clients::restore_client));

    let inquiries_routes = Router::new()
        .route(
            "/",
            get(inquiries::list_inquiries).post(inquiries::create_inquiry),
        )
        .route(
            "/:id",
            get(inquiries::get_inquiry)
                .patch(inquiries::update_inquiry)
                .delete(inquiries::delete_inquiry),
        )
        .route("/:id/convert", post(inquiries::convert_inquiry));

    let appointments_routes = Router::new()
        .route(
            "/",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route("/availability", get(appointments::availability))
        .route(
            "/:id",
            get(appointments::get_appointment).patch(appointments::update_appointment),
        )
        .route("/:id/send-invite", post(appointments::send_invite))
        .route("/:id/book", post(appointments::book_appointment))
        .route("/:id/reschedule", post(appointments::reschedule_appointment))
        .route("/:id/complete", post(appointments::complete_appointment))
        .route("/:id/no-show", post(appointments::mark_no_show))
        .route("/:id/cancel", post(appointments::cancel_appointment));

    let settings_routes = Router::new()
        .route(
            "/appointments",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route(
            "/blocked-times",
            get(settings::list_blocked_times).post(settings::create_blocked_time),
        )
        .route("/blocked-times/:id", delete(settings::delete_blocked_time));

    let proposals_routes = Router::new()
        .route(
            "/",
            get(proposals::list_proposals).post(proposals::create_proposal),
        )
        .route(
            "/:id",
            get(proposals::get_proposal).patch(proposals::update_proposal),
        )
        .route("/:id/send", post(proposals::send_proposal))
        .route("/:id/accept", post(proposals::accept_proposal))
        .route("/:id/decline", post(proposals::decline_proposal))
        .route("/:id/archive", post(proposals::archive_proposal));

    let invoices_routes = Router::new()
        .route(
            "/",
            get(invoices::list_invoices).post(invoices::create_invoice),
        )
        .route(
            "/:id",
            get(invoices::get_invoice).patch(invoices::update_invoice),
        )
        .route("/:id/send", post(invoices::send_invoice))
        .route("/:id/mark-paid", post(invoices::mark_invoice_paid))
        .route("/:id/void", post(invoices::void_invoice));

    let galleries_routes = Router::new()
        .route(
            "/",
            get(galleries::list_galleries).post(galleries::create_gallery),
        )
        .route(
            "/:id",
            get(galleries::get_gallery)
                .patch(galleries::update_gallery)
                .delete(galleries::archive_gallery),
        )
        .route(
            "/:id/assets",
            get(galleries::list_assets).post(galleries::upload_asset),
        )
        .route(
            "/:id/assets/:asset_id/download",
            get(galleries::download_asset),
        )
        .route("/:id/assets/:asset_id", delete(galleries::delete_asset));

    let envelopes_routes = Router::new()
        .route(
            "/",
            get(envelopes::list_envelopes).post(envelopes::create_envelope),
        )
        .route(
            "/:id",
            get(envelopes::get_envelope).patch(envelopes::update_envelope),
        )
        .route("/:id/documents", post(envelopes::upload_document))
        .route("/:id/signers", post(envelopes::add_signer))
        .route("/:id/signers/:signer_id", delete(envelopes::remove_signer))
        .route("/:id/send", post(envelopes::send_envelope))
        .route("/:id/void", post(envelopes::void_envelope))
        .route("/:id/audit", get(envelopes::list_audit_trail));

    let calendar_routes = Router::new()
        .route("/", get(oauth::list_accounts))
        .route("/:id", delete(oauth::disconnect_account));

    let contract_routes = Router::new()
        .route("/validate/:token", get(signing::validate_token))
        .route("/request-otp", post(signing::request_otp))
        .route("/verify-otp", post(signing::verify_otp))
        .route("/extend-session", post(signing::extend_session))
        .route("/sign/:signer_id", post(signing::sign_contract))
        .route("/decline/:signer_id", post(signing::decline_contract));

    let booking_routes = Router::new()
        .route("/:token", get(booking::booking_details))
        .route("/:token/book", post(booking::book_slot));

    let oauth_routes = Router::new()
        .route("/:provider/authorize", get(oauth::authorize))
        .route("/:provider/callback", get(oauth::callback));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/admin/clients", clients_routes)
        .nest("/api/admin/inquiries", inquiries_routes)
        .nest("/api/admin/appointments", appointments_routes)
        .nest("/api/admin/settings", settings_routes)
        .nest("/api/admin/proposals", proposals_routes)
        .nest("/api/admin/invoices", invoices_routes)
        .nest("/api/admin/galleries", galleries_routes)
        .nest("/api/admin/envelopes", envelopes_routes)
        .nest("/api/admin/calendar-accounts", calendar_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/contract", contract_routes)
        .nest("/booking", booking_routes)
        .nest("/auth/oauth", oauth_routes)
        .route("/public/inquiries", post(inquiries::create_public_inquiry))
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
