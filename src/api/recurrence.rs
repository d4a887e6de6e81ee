use super::{eq, ApiClient, ApiError, ServiceResult};
use crate::recurrence::{
    to_rule, ExceptionType, RecurrenceException, RecurrenceRule, RepeatConfig,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

const RULES: &str = "recurrence_rule";
const EXCEPTIONS: &str = "recurrence_exceptions";

#[async_trait(?Send)]
pub trait RecurrenceGateway {
    async fn create_rule(&self, config: &RepeatConfig) -> ServiceResult<RecurrenceRule>;
    /// Rewrites the rule from `config` and reactivates it.
    async fn update_rule(&self, rule_id: i64, config: &RepeatConfig) -> ServiceResult<RecurrenceRule>;
    /// Items keep pointing at deactivated rules.
    async fn deactivate_rule(&self, rule_id: i64) -> ServiceResult<()>;
    async fn delete_rule(&self, rule_id: i64) -> ServiceResult<()>;
    async fn get_active_rule(&self, rule_id: i64) -> ServiceResult<Option<RecurrenceRule>>;
    async fn get_active_rules(&self, rule_ids: &[i64]) -> ServiceResult<Vec<RecurrenceRule>>;

    async fn add_exception(
        &self,
        rule_id: i64,
        date: NaiveDate,
        kind: ExceptionType,
    ) -> ServiceResult<RecurrenceException>;
    async fn list_exceptions(&self, rule_id: i64) -> ServiceResult<Vec<RecurrenceException>>;
    async fn remove_exception(&self, rule_id: i64, date: NaiveDate) -> ServiceResult<()>;
    async fn is_exception_date(&self, rule_id: i64, date: NaiveDate) -> ServiceResult<bool>;
}

fn rule_from_config(config: &RepeatConfig) -> ServiceResult<RecurrenceRule> {
    to_rule(config).map_err(|e| ApiError::validation(e.to_string()))
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: i64,
}

#[async_trait(?Send)]
impl RecurrenceGateway for ApiClient {
    async fn create_rule(&self, config: &RepeatConfig) -> ServiceResult<RecurrenceRule> {
        let rule = rule_from_config(config)?;
        let user_id = self.user_id()?;

        let mut body = serde_json::to_value(&rule).map_err(ApiError::parse)?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("user_id".to_string(), json!(user_id));
        }
        let created: RecurrenceRule = self.insert_one(RULES, &body).await?;
        log::debug!("create_rule: created rule {:?} ({:?})", created.id, created.frequency);
        Ok(created)
    }

    async fn update_rule(&self, rule_id: i64, config: &RepeatConfig) -> ServiceResult<RecurrenceRule> {
        let rule = rule_from_config(config)?;
        self.update_one(RULES, &[("id", eq(rule_id))], &rule).await
    }

    async fn deactivate_rule(&self, rule_id: i64) -> ServiceResult<()> {
        let _: Vec<IdRow> = self
            .update_many(
                RULES,
                &[("id", eq(rule_id)), ("select", "id".to_string())],
                &json!({ "is_active": false }),
            )
            .await?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: i64) -> ServiceResult<()> {
        self.delete(RULES, &[("id", eq(rule_id))]).await
    }

    async fn get_active_rule(&self, rule_id: i64) -> ServiceResult<Option<RecurrenceRule>> {
        self.select_maybe(
            RULES,
            &[("id", eq(rule_id)), ("is_active", eq(true)), ("select", "*".to_string())],
        )
        .await
    }

    async fn get_active_rules(&self, rule_ids: &[i64]) -> ServiceResult<Vec<RecurrenceRule>> {
        if rule_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            RULES,
            &[
                ("id", in_list(rule_ids)),
                ("is_active", eq(true)),
                ("select", "*".to_string()),
            ],
        )
        .await
    }

    async fn add_exception(
        &self,
        rule_id: i64,
        date: NaiveDate,
        kind: ExceptionType,
    ) -> ServiceResult<RecurrenceException> {
        let exception = RecurrenceException {
            id: None,
            recurrence_id: rule_id,
            exception_date: date,
            exception_type: kind,
        };
        self.insert_one(EXCEPTIONS, &exception).await
    }

    async fn list_exceptions(&self, rule_id: i64) -> ServiceResult<Vec<RecurrenceException>> {
        self.select(
            EXCEPTIONS,
            &[
                ("recurrence_id", eq(rule_id)),
                ("select", "*".to_string()),
                ("order", "exception_date.asc".to_string()),
            ],
        )
        .await
    }

    async fn remove_exception(&self, rule_id: i64, date: NaiveDate) -> ServiceResult<()> {
        self.delete(
            EXCEPTIONS,
            &[("recurrence_id", eq(rule_id)), ("exception_date", eq(date))],
        )
        .await
    }

    async fn is_exception_date(&self, rule_id: i64, date: NaiveDate) -> ServiceResult<bool> {
        let found: Option<IdRow> = self
            .select_maybe(
                EXCEPTIONS,
                &[
                    ("recurrence_id", eq(rule_id)),
                    ("exception_date", eq(date)),
                    ("select", "id".to_string()),
                ],
            )
            .await?;
        Ok(found.is_some())
    }
}

/// PostgREST `in` filter value.
pub fn in_list(ids: &[i64]) -> String {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("in.({joined})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_client;
    use crate::api::ApiErrorKind;
    use crate::recurrence::RepeatType;

    #[test]
    fn test_in_list() {
        assert_eq!(in_list(&[3, 1, 2]), "in.(3,1,2)");
    }

    #[test]
    fn test_rule_from_none_is_validation_error() {
        let err = rule_from_config(&RepeatConfig::default()).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);
    }

    #[test]
    fn test_exception_body_shape() {
        let exception = RecurrenceException {
            id: None,
            recurrence_id: 4,
            exception_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            exception_type: ExceptionType::Deleted,
        };
        assert_eq!(
            serde_json::to_value(&exception).unwrap(),
            json!({
                "recurrence_id": 4,
                "exception_date": "2026-10-16",
                "exception_type": "deleted"
            })
        );
    }

    #[tokio::test]
    async fn test_create_rule_rejects_none_before_network() {
        let client = test_client();
        let err = client
            .create_rule(&RepeatConfig::preset(RepeatType::None))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_empty_id_list_short_circuits() {
        let mut client = test_client();
        client.session = None;
        assert_eq!(client.get_active_rules(&[]).await, Ok(Vec::new()));
    }
}
