//! OpenAPI document assembly

use serde_json::Value;
use utoipa::{Modify, OpenApi};

use crate::auth::Principal;
use crate::docs::descriptor::SecuritySchemeDescriptor;

#[derive(OpenApi)]
#[openapi(
    paths(crate::routes::current_principal),
    components(schemas(Principal)),
    tags((name = "identity", description = "Caller identity as seen by the API"))
)]
struct ApiDoc;

/// Registers the OAuth2 scheme and requires it on every operation
impl Modify for SecuritySchemeDescriptor {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi
            .components
            .get_or_insert_with(Default::default)
            .add_security_scheme(self.scheme_name.clone(), self.security_scheme());
        openapi.security = Some(vec![self.requirement()]);
    }
}

/// Documented API surface with the OAuth2 scheme applied to every operation
pub fn openapi(title: &str, descriptor: &SecuritySchemeDescriptor) -> utoipa::openapi::OpenApi {
    let mut openapi = ApiDoc::openapi();
    openapi.info.title = title.to_string();
    openapi.info.version = env!("CARGO_PKG_VERSION").to_string();
    descriptor.modify(&mut openapi);
    openapi
}

/// Serialized document, as served to documentation clients
pub fn document_json(
    title: &str,
    descriptor: &SecuritySchemeDescriptor,
) -> Result<Value, serde_json::Error> {
    let mut document = serde_json::to_value(openapi(title, descriptor))?;

    // OpenAPI's implicit flow has no tokenUrl field; clients of this API read it anyway
    let pointer = format!(
        "/components/securitySchemes/{}/flows/implicit",
        descriptor.scheme_name
    );
    if let Some(flow) = document.pointer_mut(&pointer).and_then(Value::as_object_mut) {
        flow.insert(
            "tokenUrl".to_string(),
            Value::String(descriptor.token_url.clone()),
        );
    }

    Ok(document)
}
