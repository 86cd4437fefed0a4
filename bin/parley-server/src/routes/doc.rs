use utoipa::OpenApi;

use crate::routes::{chat, health, messages};

#[derive(OpenApi)]
#[openapi(info(
    title = "parley-server",
    description = "Encrypted chat relay API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root.merge(messages::MessagesApi::openapi());
    root
}
