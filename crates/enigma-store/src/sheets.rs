//! Google Sheets backend for [`RemoteStore`].
//!
//! Each worksheet of one spreadsheet is a table; its first row is the
//! header. Calls go to the Sheets v4 REST API with a bearer token supplied
//! by the caller. Obtaining and refreshing that token is not handled here.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::remote::{RemoteStore, RemoteTable};

/// Sheets v4 API base URL.
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// A spreadsheet accessed through the Sheets v4 values API.
pub struct SheetsRemote {
    spreadsheet_id: String,
    access_token: String,
    base_url: String,
    http: reqwest::Client,
}

impl SheetsRemote {
    /// Fails when the HTTP client cannot be built (no TLS backend).
    pub fn new(
        spreadsheet_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("enigma-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
            base_url: SHEETS_API_BASE.to_string(),
            http,
        })
    }

    /// Point the client at another API root (a proxy or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, self.spreadsheet_id, suffix)
    }

    /// Send a request and return its JSON body, mapping API errors.
    async fn call(&self, request: reqwest::RequestBuilder) -> StoreResult<Value> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(StoreError::Remote(format!("sheets api {status}: {message}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteStore for SheetsRemote {
    #[instrument(skip(self))]
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let body = self
            .call(
                self.http
                    .get(self.url(""))
                    .query(&[("fields", "sheets.properties.title")]),
            )
            .await?;
        Ok(parse_sheet_titles(&body))
    }

    #[instrument(skip(self))]
    async fn read_all(&self, table: &str) -> StoreResult<RemoteTable> {
        let range = quote_sheet(table);
        let body = self
            .call(self.http.get(self.url(&format!("/values/{range}"))))
            .await?;
        let table = parse_value_range(&body);
        debug!(rows = table.rows.len(), "sheet read");
        Ok(table)
    }

    #[instrument(skip(self, values))]
    async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
        let range = quote_sheet(table);
        self.call(
            self.http
                .post(self.url(&format!("/values/{range}:append")))
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&json!({ "values": [values] })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn update_cell(
        &self,
        table: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> StoreResult<()> {
        let range = format!("{}!{}{row}", quote_sheet(table), column_letters(col)?);
        self.call(
            self.http
                .put(self.url(&format!("/values/{range}")))
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&json!({ "values": [[value]] })),
        )
        .await?;
        Ok(())
    }
}

/// Quote a sheet name for A1 notation: `it's` becomes `'it''s'`.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// One-based column number to A1 letters: 1 → A, 27 → AA.
fn column_letters(col: usize) -> StoreResult<String> {
    if col == 0 {
        return Err(StoreError::InvalidArgument("column 0 in A1 notation".into()));
    }
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    Ok(String::from_utf8_lossy(&letters).into_owned())
}

fn parse_sheet_titles(body: &Value) -> Vec<String> {
    body.get("sheets")
        .and_then(Value::as_array)
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s.pointer("/properties/title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Split a `ValueRange` body into header and rows, rendering every value as text.
fn parse_value_range(body: &Value) -> RemoteTable {
    let mut rows = body
        .get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(value_text).collect())
                        .unwrap_or_default()
                })
                .collect::<Vec<Vec<String>>>()
        })
        .unwrap_or_default()
        .into_iter();

    RemoteTable {
        header: rows.next().unwrap_or_default(),
        rows: rows.collect(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_a1() {
        assert_eq!(column_letters(1).unwrap(), "A");
        assert_eq!(column_letters(7).unwrap(), "G");
        assert_eq!(column_letters(26).unwrap(), "Z");
        assert_eq!(column_letters(27).unwrap(), "AA");
        assert_eq!(column_letters(703).unwrap(), "AAA");
        assert!(column_letters(0).is_err());
    }

    #[test]
    fn new_builds_client_and_joins_urls() {
        let remote = SheetsRemote::new("sheet-1", "token")
            .unwrap()
            .with_base_url("http://localhost:9");
        assert_eq!(remote.url("/values:batchGet"), "http://localhost:9/sheet-1/values:batchGet");
    }

    #[test]
    fn quote_sheet_escapes_apostrophes() {
        assert_eq!(quote_sheet("users"), "'users'");
        assert_eq!(quote_sheet("it's"), "'it''s'");
    }

    #[test]
    fn parse_value_range_splits_header() {
        let body = json!({
            "range": "'enigma'!A1:F3",
            "values": [["uuid", "name"], ["7", "N"], [8]]
        });
        let table = parse_value_range(&body);
        assert_eq!(table.header, vec!["uuid", "name"]);
        assert_eq!(table.rows, vec![vec!["7", "N"], vec!["8"]]);
    }

    #[test]
    fn parse_value_range_empty_sheet() {
        let table = parse_value_range(&json!({ "range": "'x'!A1:Z1000" }));
        assert!(table.header.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn parse_titles() {
        let body = json!({
            "sheets": [
                { "properties": { "title": "users" } },
                { "properties": { "title": "enigma" } }
            ]
        });
        assert_eq!(parse_sheet_titles(&body), vec!["users", "enigma"]);
    }
}
