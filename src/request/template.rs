//! Request chaining templates
//!
//! Later steps of a probe may reference earlier responses of the same cycle
//! with `{{ responses.[i].<path> }}`. Templates are validated when the
//! configuration is resolved; at request time a missing path renders as an
//! empty string instead of failing the chain.

use std::collections::BTreeMap;

use handlebars::{Handlebars, Template};
use serde_json::{Map, Value, json};
use tracing::warn;

use super::{ResolvedRequest, ResponseEnvelope};
use crate::config::{HttpMethod, RequestConfig};

/// Renders chaining templates without HTML escaping.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    registry: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(false);

        Self { registry }
    }

    /// Check the template syntax, e.g. for unbalanced braces.
    pub fn validate(template: &str) -> Result<(), String> {
        Template::compile(template)
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    /// Render a template against `context`.
    ///
    /// Strings without template markers are returned as they are.
    pub fn render(&self, template: &str, context: &Value) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        match self.registry.render_template(template, context) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!("failed to render template '{template}': {err}");
                String::new()
            }
        }
    }

    /// Render every string inside a JSON value, keys included.
    ///
    /// Non-string leaves are never touched, so numbers, booleans and nulls keep
    /// their type.
    pub fn render_value(&self, value: &Value, context: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.render(text, context)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item, context))
                    .collect(),
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, inner)| (self.render(key, context), self.render_value(inner, context)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }
}

/// Template context exposing the responses received so far.
pub fn chaining_context(responses: &[ResponseEnvelope]) -> Value {
    json!({
        "responses": responses.iter().map(ResponseEnvelope::to_context).collect::<Vec<_>>(),
    })
}

/// Request step with unresolved templates in URL, headers and body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
    pub allow_unauthorized: bool,
    pub ping: bool,
}

impl RequestTemplate {
    /// Build a template from configuration, validating every templated field.
    ///
    /// The error names the offending field.
    pub fn compile(config: &RequestConfig) -> Result<RequestTemplate, (String, String)> {
        TemplateEngine::validate(&config.url).map_err(|err| ("url".to_string(), err))?;

        for (name, value) in &config.headers {
            TemplateEngine::validate(value).map_err(|err| (format!("header '{name}'"), err))?;
        }

        if let Some(body) = &config.body {
            validate_value(body).map_err(|err| ("body".to_string(), err))?;
        }

        Ok(RequestTemplate {
            method: config.method,
            url: config.url.clone(),
            headers: config.headers.clone(),
            body: config.body.clone(),
            timeout_ms: config.timeout,
            allow_unauthorized: config.allow_unauthorized,
            ping: config.ping,
        })
    }

    /// Substitute earlier responses into URL, header values and body.
    pub fn resolve(&self, engine: &TemplateEngine, responses: &[ResponseEnvelope]) -> ResolvedRequest {
        let context = chaining_context(responses);

        ResolvedRequest {
            method: self.method,
            url: engine.render(&self.url, &context),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), engine.render(value, &context)))
                .collect(),
            body: self
                .body
                .as_ref()
                .map(|body| engine.render_value(body, &context)),
            timeout_ms: self.timeout_ms,
            allow_unauthorized: self.allow_unauthorized,
            ping: self.ping,
        }
    }
}

fn validate_value(value: &Value) -> Result<(), String> {
    match value {
        Value::String(text) => TemplateEngine::validate(text),
        Value::Array(items) => items.iter().try_for_each(validate_value),
        Value::Object(fields) => fields.iter().try_for_each(|(key, inner)| {
            TemplateEngine::validate(key)?;
            validate_value(inner)
        }),
        _ => Ok(()),
    }
}
