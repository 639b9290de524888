//! Alert evaluation
//!
//! Alerts are compiled once from their configuration and then evaluated
//! against every response of the step they belong to. Evaluation is pure:
//! it reads the response envelope and yields one `triggered` flag per alert.

pub mod expression;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::AlertConfig;
use crate::request::ResponseEnvelope;
use crate::request::template::TemplateEngine;

pub use expression::{Expression, ExpressionError};

pub const STATUS_NOT_2XX: &str = "status-not-2xx";
const RESPONSE_TIME_PREFIX: &str = "response-time-greater-than-";

#[derive(Debug, Clone, PartialEq)]
pub enum AlertCondition {
    StatusNot2xx,

    /// Threshold in milliseconds
    ResponseTimeGreaterThan(u64),

    /// Triggered while the expression is truthy
    Query(Expression),

    /// Triggered while the expression is falsy
    Assertion(Expression),
}

/// An alert ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAlert {
    pub id: String,

    /// Name or expression text, shown in notifications
    pub query: String,
    pub message: Option<String>,
    pub condition: AlertCondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvaluation {
    pub alert_id: String,
    pub triggered: bool,
}

/// Alerts used by probes that define none.
pub fn default_alerts() -> Vec<AlertConfig> {
    vec![
        AlertConfig::Named(STATUS_NOT_2XX.to_string()),
        AlertConfig::Named(format!("{RESPONSE_TIME_PREFIX}2-s")),
    ]
}

fn parse_response_time(suffix: &str) -> Result<u64, String> {
    let malformed = || format!("expected {RESPONSE_TIME_PREFIX}<number>-<ms|s>");

    let (amount, unit) = suffix.rsplit_once('-').ok_or_else(malformed)?;
    let amount = amount.parse::<u64>().map_err(|_| malformed())?;

    match unit {
        "ms" => Ok(amount),
        "s" => Ok(amount.saturating_mul(1000)),
        _ => Err(malformed()),
    }
}

impl CompiledAlert {
    /// Compile an alert definition.
    ///
    /// Returns `Ok(None)` for names that are not recognised; those alerts are
    /// skipped. Malformed definitions are errors.
    pub fn compile(config: &AlertConfig) -> Result<Option<CompiledAlert>, String> {
        let condition = match config {
            AlertConfig::Named(name) if name == STATUS_NOT_2XX => AlertCondition::StatusNot2xx,
            AlertConfig::Named(name) => match name.strip_prefix(RESPONSE_TIME_PREFIX) {
                Some(suffix) => AlertCondition::ResponseTimeGreaterThan(parse_response_time(suffix)?),
                None => return Ok(None),
            },
            AlertConfig::Query { query, .. } => {
                AlertCondition::Query(Expression::parse(query).map_err(|e| e.to_string())?)
            }
            AlertConfig::Assertion { assertion, .. } => {
                AlertCondition::Assertion(Expression::parse(assertion).map_err(|e| e.to_string())?)
            }
        };

        let message = match config {
            AlertConfig::Named(_) => None,
            AlertConfig::Query { message, .. } | AlertConfig::Assertion { message, .. } => {
                message.clone()
            }
        };

        Ok(Some(CompiledAlert {
            id: config.id(),
            query: config.query_text().to_string(),
            message,
            condition,
        }))
    }

    pub fn is_triggered(&self, response: &ResponseEnvelope) -> Result<bool, ExpressionError> {
        match &self.condition {
            AlertCondition::StatusNot2xx => Ok(!(200..300).contains(&response.status)),
            AlertCondition::ResponseTimeGreaterThan(limit) => Ok(response.response_time_ms > *limit),
            AlertCondition::Query(expression) => {
                Ok(expression::is_truthy(&expression.evaluate(&scope(response))?))
            }
            AlertCondition::Assertion(expression) => {
                Ok(!expression::is_truthy(&expression.evaluate(&scope(response))?))
            }
        }
    }

    /// Human readable message for a notification about this alert.
    pub fn render_message(&self, engine: &TemplateEngine, response: &ResponseEnvelope) -> String {
        let template = self.message.as_deref().unwrap_or(&self.query);
        engine.render(template, &scope(response))
    }
}

fn scope(response: &ResponseEnvelope) -> Value {
    json!({ "response": response.to_context() })
}

/// Evaluate every alert against a response.
///
/// An alert whose expression fails to evaluate is logged and left out of the
/// result, so the other alerts of the step are still observed.
pub fn evaluate(response: &ResponseEnvelope, alerts: &[CompiledAlert]) -> Vec<AlertEvaluation> {
    alerts
        .iter()
        .filter_map(|alert| match alert.is_triggered(response) {
            Ok(triggered) => {
                debug!("alert {} -> {triggered}", alert.id);
                Some(AlertEvaluation {
                    alert_id: alert.id.clone(),
                    triggered,
                })
            }
            Err(e) => {
                warn!("failed to evaluate alert {} ({}): {e}", alert.id, alert.query);
                None
            }
        })
        .collect()
}
