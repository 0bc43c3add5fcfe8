//! 结构化输出校验
//!
//! 依次检查：provider 结构化输出重试耗尽 -> 非 success 子类型 -> 缺少结构化输出 -> 按类型反序列化（schema 校验）。
//! 失败只返回 ValidationError 并写诊断日志，不会 panic。

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::collaborators::{record_audit, AuditEvent, AuditSink};
use crate::core::ErrorClass;
use crate::provider::{ProviderResult, ResultSubtype};

/// 校验失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Structured output validation failed after provider retries: {}", .0.join("; "))]
    RetriesExhausted(Vec<String>),

    #[error("Agent execution failed with subtype {subtype}{}", format_errors(.errors))]
    ProviderFailure { subtype: String, errors: Vec<String> },

    #[error("Agent returned no structured output")]
    MissingOutput,

    #[error("Schema validation failed: {0}")]
    SchemaMismatch(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Required field {0} is empty")]
    EmptyField(String),
}

fn format_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(": {}", errors.join("; "))
    }
}

impl ValidationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ValidationError::ProviderFailure { .. } => ErrorClass::Permanent,
            _ => ErrorClass::Validation,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ValidationError::RetriesExhausted(_) => "retries_exhausted",
            ValidationError::ProviderFailure { .. } => "provider_failure",
            ValidationError::MissingOutput => "missing_output",
            ValidationError::SchemaMismatch(_) => "schema_mismatch",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::EmptyField(_) => "empty_field",
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// 生成类型 T 的 JSON Schema，作为请求中的期望输出格式
pub fn output_schema<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

/// 结构化输出校验器
pub struct StructuredOutputValidator {
    audit: Arc<dyn AuditSink>,
    step_name: String,
}

impl StructuredOutputValidator {
    pub fn new(audit: Arc<dyn AuditSink>, step_name: impl Into<String>) -> Self {
        Self {
            audit,
            step_name: step_name.into(),
        }
    }

    /// 校验 provider 结果并反序列化为 T
    pub fn validate<T: DeserializeOwned>(
        &self,
        result: &ProviderResult,
        session_id: &str,
    ) -> ValidationResult<T> {
        let checked = Self::check(result);
        if let Err(e) = &checked {
            self.log_failure(session_id, e, Some(&result.subtype));
        }
        checked
    }

    fn check<T: DeserializeOwned>(result: &ProviderResult) -> ValidationResult<T> {
        match &result.subtype {
            ResultSubtype::ErrorMaxStructuredOutputRetries => {
                return Err(ValidationError::RetriesExhausted(result.errors.clone()));
            }
            ResultSubtype::Success => {}
            other => {
                return Err(ValidationError::ProviderFailure {
                    subtype: other.as_str().to_string(),
                    errors: result.errors.clone(),
                });
            }
        }

        let payload = match &result.structured_output {
            Some(serde_json::Value::Null) | None => return Err(ValidationError::MissingOutput),
            Some(value) => value,
        };

        T::deserialize(payload).map_err(|e| ValidationError::SchemaMismatch(e.to_string()))
    }

    /// 检查字段存在；数组 / 字符串字段还需非空（字符串去除首尾空白后）
    pub fn validate_field(
        &self,
        data: &serde_json::Value,
        field: &str,
        session_id: &str,
    ) -> ValidationResult<()> {
        let checked = match data.get(field) {
            None | Some(serde_json::Value::Null) => {
                Err(ValidationError::MissingField(field.to_string()))
            }
            Some(serde_json::Value::Array(items)) if items.is_empty() => {
                Err(ValidationError::EmptyField(field.to_string()))
            }
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
                Err(ValidationError::EmptyField(field.to_string()))
            }
            Some(_) => Ok(()),
        };
        if let Err(e) = &checked {
            self.log_failure(session_id, e, None);
        }
        checked
    }

    fn log_failure(&self, session_id: &str, err: &ValidationError, subtype: Option<&ResultSubtype>) {
        tracing::warn!(
            session_id,
            step = %self.step_name,
            kind = err.kind(),
            "structured output rejected: {err}"
        );
        record_audit(
            self.audit.as_ref(),
            AuditEvent::for_session(
                session_id,
                &self.step_name,
                "validation_failed",
                serde_json::json!({
                    "kind": err.kind(),
                    "subtype": subtype.map(|s| s.as_str()),
                    "message": err.to_string(),
                }),
            ),
        );
    }
}
