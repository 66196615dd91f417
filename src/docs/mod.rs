//! Interactive API documentation with OAuth2 metadata

pub mod descriptor;
pub mod openapi;
pub mod ui;

pub use descriptor::{DescriptorMismatch, FlowType, SecuritySchemeDescriptor, SCHEME_NAME};

use serde_json::Value;

use crate::auth::IdentityEndpoints;
use crate::config::IdentityConfig;

/// Pre-rendered documentation assets, built once at startup
#[derive(Debug, Clone)]
pub struct ApiDocumentation {
    descriptor: SecuritySchemeDescriptor,
    document: Value,
    ui_html: String,
}

impl ApiDocumentation {
    pub fn build(
        title: &str,
        identity: &IdentityConfig,
        descriptor: SecuritySchemeDescriptor,
    ) -> Result<Self, serde_json::Error> {
        let document = openapi::document_json(title, &descriptor)?;
        let ui_html = ui::render_ui(
            title,
            &identity.client_id,
            identity.domain.as_deref(),
            &descriptor.scope_names(),
        );

        Ok(Self {
            descriptor,
            document,
            ui_html,
        })
    }

    pub fn descriptor(&self) -> &SecuritySchemeDescriptor {
        &self.descriptor
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn ui_html(&self) -> &str {
        &self.ui_html
    }

    pub fn verify_against(&self, endpoints: &IdentityEndpoints) -> Result<(), DescriptorMismatch> {
        self.descriptor.verify_against(endpoints)
    }
}
