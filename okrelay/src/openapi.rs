//! OpenAPI document for the relay endpoints, served at `/docs`.

use utoipa::OpenApi;

use crate::api::handlers::webhooks;
use crate::models::WebhookPayload;
use crate::response::{Envelope, EnvelopeStatus, ProcessingResult};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "okrelay",
        description = "Verifies signed webhooks, filters them and forwards them to the OKX REST API."
    ),
    paths(webhooks::receive_webhook, webhooks::healthz),
    components(schemas(WebhookPayload, Envelope, EnvelopeStatus, ProcessingResult)),
    tags(
        (name = "webhooks", description = "Inbound webhook relay"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
