use std::collections::HashMap;

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    clients::caller::{ResolvingCaller, ServiceRequest, response_data},
    error::{PipelineError, Result},
    models::template::{RenderedTemplate, Template},
};

#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_template(&self, template_code: &str) -> Result<Template>;
}

pub struct TemplateServiceClient {
    caller: ResolvingCaller,
    service_name: String,
}

impl TemplateServiceClient {
    pub fn new(caller: ResolvingCaller, service_name: impl Into<String>) -> Self {
        Self {
            caller,
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl TemplateSource for TemplateServiceClient {
    async fn fetch_template(&self, template_code: &str) -> Result<Template> {
        debug!(template_code, "Fetching template from service");

        let request = ServiceRequest::get(format!("/api/v1/templates/{}", template_code));
        let body = response_data(self.caller.call(&self.service_name, request).await?);

        if body.is_null() {
            return Err(PipelineError::not_found(format!("Template '{}'", template_code)));
        }

        serde_json::from_value(body).map_err(|e| {
            PipelineError::Internal(format!("Unexpected template payload for '{}': {}", template_code, e))
        })
    }
}

/// Renders subject, body and action url. Pure: the output depends only on
/// the arguments. A template that fails to parse is a validation error.
pub fn render_template(
    template: &Template,
    variables: &HashMap<String, JsonValue>,
) -> Result<RenderedTemplate> {
    let registry = registry();
    let render_opt = |text: &Option<String>| {
        render_with(&registry, text.as_deref().unwrap_or_default(), variables)
    };

    Ok(RenderedTemplate {
        subject: render_opt(&template.subject)?,
        body: render_opt(&template.body)?,
        action_url: template
            .action_url
            .as_deref()
            .map(|url| render_with(&registry, url, variables))
            .transpose()?,
    })
}

/// Renders a single handlebars source. Values are HTML-escaped unless the tag
/// is `{{{name}}}`; unknown names render as empty text.
pub fn render(source: &str, variables: &HashMap<String, JsonValue>) -> Result<String> {
    render_with(&registry(), source, variables)
}

fn registry() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(false);
    handlebars
}

fn render_with(
    handlebars: &Handlebars<'static>,
    source: &str,
    variables: &HashMap<String, JsonValue>,
) -> Result<String> {
    handlebars
        .render_template(source, variables)
        .map_err(|e| PipelineError::validation(format!("Template could not be rendered: {}", e)))
}
