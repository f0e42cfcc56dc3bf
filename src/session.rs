//! Request context and per-transaction session variables.
//!
//! Variables (`$user.id`, `$now`, `$valid.from`, ...) are computed on first
//! access and memoized until the transaction ends, so every statement of a
//! transaction sees the same `$now`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

use crate::ast::Value;
use crate::error::{CqnError, CqnResult};

/// Who is asking, and for which point in time.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<String>,
    pub tenant: Option<String>,
    pub locale: Option<String>,
    /// Request time; defaults to the transaction start.
    pub timestamp: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Temporal window `[from, to)`.
    pub fn valid(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_to = Some(to);
        self
    }
}

/// Lazily computed variables of one transaction.
#[derive(Debug)]
pub struct SessionVariables {
    /// Identifies the transaction in logs.
    pub context_id: Uuid,
    context: RequestContext,
    started: DateTime<Utc>,
    values: HashMap<String, Value>,
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SessionVariables {
    pub fn new(context: RequestContext) -> Self {
        Self {
            context_id: Uuid::new_v4(),
            context,
            started: Utc::now(),
            values: HashMap::new(),
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Value of a session variable, computed once.
    pub fn get(&mut self, name: &str) -> CqnResult<Value> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        let value = self.compute(name)?;
        self.values.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn now(&self) -> DateTime<Utc> {
        self.context.timestamp.unwrap_or(self.started)
    }

    fn valid_from(&self) -> DateTime<Utc> {
        self.context.valid_from.unwrap_or_else(|| self.now())
    }

    fn compute(&self, name: &str) -> CqnResult<Value> {
        let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        Ok(match name {
            "$user" | "$user.id" => Value::String(self.context.user.clone().unwrap_or_else(|| "anonymous".into())),
            "$user.locale" | "$locale" => text(&self.context.locale),
            "$tenant" | "$user.tenant" => text(&self.context.tenant),
            "$now" | "$at" => Value::String(iso(self.now())),
            "$valid.from" | "$at.from" => Value::String(iso(self.valid_from())),
            "$valid.to" | "$at.to" => {
                let to = self
                    .context
                    .valid_to
                    .unwrap_or_else(|| self.valid_from() + Duration::milliseconds(1));
                Value::String(iso(to))
            }
            other => return Err(CqnError::UnknownVariable(other.to_string())),
        })
    }

    /// Forget memoized values; the next access recomputes them.
    pub fn reset(&mut self) {
        self.values.clear();
        self.started = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_values_are_memoized() {
        let mut session = SessionVariables::new(RequestContext::new().user("alice"));
        let first = session.get("$now").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(session.get("$now").unwrap(), first);
        assert_eq!(session.get("$user.id").unwrap(), Value::from("alice"));
        assert_eq!(session.get("$user").unwrap(), Value::from("alice"));
    }

    #[test]
    fn test_validity_window_defaults_to_one_millisecond() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut session = SessionVariables::new(RequestContext::new().at(at));
        assert_eq!(session.get("$now").unwrap(), Value::from("2024-05-01T12:00:00.000Z"));
        assert_eq!(session.get("$valid.from").unwrap(), Value::from("2024-05-01T12:00:00.000Z"));
        assert_eq!(session.get("$valid.to").unwrap(), Value::from("2024-05-01T12:00:00.001Z"));
    }

    #[test]
    fn test_unknown_variable() {
        let mut session = SessionVariables::new(RequestContext::new());
        assert!(matches!(session.get("$nope"), Err(CqnError::UnknownVariable(_))));
        assert_eq!(session.get("$tenant").unwrap(), Value::Null);
    }
}
