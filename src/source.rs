//! Labcom GraphQL client.
//!
//! Every call is authenticated by the vessel's token, passed as a query
//! string parameter. The pipeline talks to the source through the
//! [`MeasurementSource`] trait so runs can be driven without a network.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::SourceError;
use crate::models::{CloudAccount, ParameterTranslation, RawReading, SourceAccount, SourceParameter};

// ---

/// Parameter names are requested in English.
const LANGUAGE_ID: i64 = 1;

const CLOUD_ACCOUNT_QUERY: &str = r#"
query {
  CloudAccount {
    id
    email
    name
  }
}
"#;

const ACCOUNTS_QUERY: &str = r#"
query {
  Accounts {
    id
    forename
    surname
    pooltext
  }
}
"#;

const PARAMETERS_QUERY: &str = r#"
query GetParameters($languageId: Int) {
  Parameters(languageId: $languageId) {
    parameter_id
    name_short_i18n
    name_long_i18n
    language_id
    Parameter {
      id
      name_short
      name_long
      unit
      limit_min
      limit_max
    }
  }
}
"#;

const MEASUREMENTS_QUERY: &str = r#"
query GetMeasurements($accountId: [Int], $from: Int, $to: Int) {
  Measurements(accountId: $accountId, from: $from, to: $to) {
    id
    account_id
    parameter_id
    parameter
    value
    timestamp
    unit
    comment
    operator_name
    device_serial
  }
}
"#;

/// Remote source of accounts, parameters and measurements.
#[allow(async_fn_in_trait)]
pub trait MeasurementSource {
    async fn cloud_account(&self, token: &str) -> Result<CloudAccount, SourceError>;

    /// Accounts visible to the token; one per sampling point.
    async fn accounts(&self, token: &str) -> Result<Vec<SourceAccount>, SourceError>;

    async fn parameters(&self, token: &str) -> Result<Vec<SourceParameter>, SourceError>;

    /// Measurements for one account taken within `[from, to]`.
    async fn measurements(
        &self,
        token: &str,
        account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawReading>, SourceError>;
}

/// HTTP client for the Labcom GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct LabcomClient {
    http: reqwest::Client,
    api_url: String,
}

impl LabcomClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        // ---
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    async fn execute(&self, token: &str, query: &str, variables: Value) -> Result<Value, SourceError> {
        // ---
        // the token rides in the URL, strip it from any error we surface
        let body: GraphQlResponse = self
            .http
            .post(&self.api_url)
            .query(&[("token", token)])
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SourceError::Http(e.without_url()))?
            .json()
            .await
            .map_err(|e| SourceError::Http(e.without_url()))?;

        body.into_data()
    }
}

impl MeasurementSource for LabcomClient {
    async fn cloud_account(&self, token: &str) -> Result<CloudAccount, SourceError> {
        let mut data = self.execute(token, CLOUD_ACCOUNT_QUERY, json!({})).await?;
        take_field(&mut data, "CloudAccount")
    }

    async fn accounts(&self, token: &str) -> Result<Vec<SourceAccount>, SourceError> {
        let mut data = self.execute(token, ACCOUNTS_QUERY, json!({})).await?;
        let accounts: Vec<SourceAccount> = take_field(&mut data, "Accounts")?;
        debug!(count = accounts.len(), "Fetched accounts");
        Ok(accounts)
    }

    async fn parameters(&self, token: &str) -> Result<Vec<SourceParameter>, SourceError> {
        // ---
        let variables = json!({ "languageId": LANGUAGE_ID });
        let mut data = self.execute(token, PARAMETERS_QUERY, variables).await?;
        let translations: Vec<ParameterTranslation> = take_field(&mut data, "Parameters")?;

        let parameters: Vec<SourceParameter> = translations.into_iter().map(SourceParameter::from).collect();
        debug!(count = parameters.len(), "Fetched parameters");
        Ok(parameters)
    }

    async fn measurements(
        &self,
        token: &str,
        account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawReading>, SourceError> {
        // ---
        let variables = json!({
            "accountId": [account_id],
            "from": from.timestamp(),
            "to": to.timestamp(),
        });
        let mut data = self.execute(token, MEASUREMENTS_QUERY, variables).await?;
        let items: Vec<Value> = take_field(&mut data, "Measurements")?;

        let readings = decode_readings(items);
        debug!(account_id, count = readings.len(), "Fetched measurements");
        Ok(readings)
    }
}

/// GraphQL response envelope.
#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

impl GraphQlResponse {
    fn into_data(self) -> Result<Value, SourceError> {
        // ---
        if let Some(errors) = self.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| match e.get("message").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => e.to_string(),
                })
                .collect();
            return Err(SourceError::GraphQl(messages.join("; ")));
        }
        self.data.ok_or(SourceError::MissingField("data"))
    }
}

fn take_field<T: DeserializeOwned>(data: &mut Value, field: &'static str) -> Result<T, SourceError> {
    // ---
    let value = data
        .get_mut(field)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .ok_or(SourceError::MissingField(field))?;
    Ok(serde_json::from_value(value)?)
}

/// Decode measurement items one by one; malformed items are logged and dropped.
fn decode_readings(items: Vec<Value>) -> Vec<RawReading> {
    // ---
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<RawReading>(item) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Failed to decode measurement item {}: {}", i, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_graphql_errors_become_source_error() {
        // ---
        let body: GraphQlResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "invalid token" }, { "code": 7 }]
        }))
        .unwrap();

        match body.into_data() {
            Err(SourceError::GraphQl(msg)) => {
                assert!(msg.contains("invalid token"));
                assert!(msg.contains("\"code\":7"));
            }
            other => panic!("expected GraphQl error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_data_is_reported() {
        // ---
        let body: GraphQlResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(body.into_data(), Err(SourceError::MissingField("data"))));

        let mut data = json!({ "Accounts": null });
        let result: Result<Vec<SourceAccount>, _> = take_field(&mut data, "Accounts");
        assert!(matches!(result, Err(SourceError::MissingField("Accounts"))));
    }

    #[test]
    fn test_take_field_decodes_accounts() {
        // ---
        let mut data = json!({
            "Accounts": [
                { "id": 4521, "forename": "Auxiliary", "surname": "boiler 1", "pooltext": null },
                { "id": 4522, "forename": "", "surname": null, "pooltext": "Hotwell" }
            ]
        });
        let accounts: Vec<SourceAccount> = take_field(&mut data, "Accounts").unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].display_name(), "Auxiliary boiler 1");
        assert_eq!(accounts[1].display_name(), "Hotwell");
    }

    #[test]
    fn test_malformed_items_are_dropped() {
        // ---
        let items = vec![
            json!({ "id": 1, "account_id": 2, "parameter_id": 3, "value": "7.5", "timestamp": 1730700000 }),
            json!({ "account_id": 2, "parameter_id": 3, "value": "1", "timestamp": 1730700000 }),
            json!({ "id": 2, "account_id": 2, "parameter_id": 3, "value": 8, "timestamp": "2025-03-26 18:45:00" }),
        ];

        let readings = decode_readings(items);
        assert_eq!(readings.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
