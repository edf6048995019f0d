use log::{debug, error, info, warn};
use reqwest::Method;

use super::core::{LarkClient, SERVER_MAX_PAGE_SIZE};
use crate::lark::types::{Record, RecordPage, TableSchema, WikiNodeResponse};

impl LarkClient {
    /// Translates a wiki/base locator token into the Bitable app token the
    /// record endpoints require.
    ///
    /// Successful resolutions are cached for the client's lifetime. Returns
    /// `None` after logging when the node cannot be resolved.
    pub async fn resolve_container_id(&self, locator: &str) -> Option<String> {
        if let Some(cached) = self.cached_container_id(locator) {
            debug!("Using cached container id for {locator}");
            return Some(cached);
        }

        let query = vec![("token".to_string(), locator.to_string())];
        let outcome = match self
            .authenticated_request(Method::GET, "wiki/v2/spaces/get_node", query)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Failed to resolve locator token {locator}: {err}");
                return None;
            }
        };

        let container_id = serde_json::from_value::<WikiNodeResponse>(outcome.data.clone())
            .ok()
            .and_then(|response| response.node)
            .and_then(|node| node.obj_token)
            .filter(|token| !token.is_empty());

        match container_id {
            Some(container_id) => {
                if let Ok(mut cache) = self.container_ids.write() {
                    cache.insert(locator.to_string(), container_id.clone());
                }
                info!("Resolved locator {locator} -> {container_id}");
                Some(container_id)
            }
            None => {
                error!("No obj_token in get_node response: {}", outcome.data);
                None
            }
        }
    }

    fn cached_container_id(&self, locator: &str) -> Option<String> {
        self.container_ids
            .read()
            .ok()
            .and_then(|cache| cache.get(locator).cloned())
    }

    /// Drops one cached resolution.
    pub fn evict_container_id(&self, locator: &str) -> Option<String> {
        self.container_ids
            .write()
            .ok()
            .and_then(|mut cache| cache.remove(locator))
    }

    /// Fetches every record of a table, following `page_token` cursors.
    ///
    /// A failed page stops pagination and the records gathered so far are
    /// returned; the failure is logged, so a short list paired with an error
    /// in the log means the result is incomplete.
    pub async fn fetch_all_records(
        &self,
        container_id: &str,
        table_id: &str,
        page_size: Option<usize>,
    ) -> Vec<Record> {
        let page_size = page_size
            .unwrap_or(self.max_page_size)
            .clamp(1, SERVER_MAX_PAGE_SIZE);
        let path = format!("bitable/v1/apps/{container_id}/tables/{table_id}/records");

        let mut all_records = Vec::new();
        let mut cursor: Option<String> = None;

        info!("Fetching records from {container_id}/{table_id}");

        loop {
            let mut query = vec![("page_size".to_string(), page_size.to_string())];
            if let Some(token) = &cursor {
                query.push(("page_token".to_string(), token.clone()));
            }

            let outcome = match self.authenticated_request(Method::GET, &path, query).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(
                        "Record page request failed after {} records: {err}",
                        all_records.len()
                    );
                    break;
                }
            };

            let elapsed = outcome.elapsed;
            let page: RecordPage = match serde_json::from_value(outcome.data) {
                Ok(page) => page,
                Err(err) => {
                    error!("Unexpected record page payload: {err}");
                    break;
                }
            };

            let items = page.items.unwrap_or_default();
            debug!(
                "Fetched {} records in {elapsed:?}, {} so far",
                items.len(),
                all_records.len() + items.len()
            );
            all_records.extend(items);

            // Stop when the server says so or omits the cursor
            cursor = page.page_token.filter(|token| !token.is_empty());
            if !page.has_more || cursor.is_none() {
                break;
            }
        }

        info!("Fetched {} records in total", all_records.len());
        all_records
    }

    /// Fetches the column definitions of a table in one request.
    pub async fn fetch_schema(&self, container_id: &str, table_id: &str) -> Option<TableSchema> {
        let path = format!("bitable/v1/apps/{container_id}/tables/{table_id}/fields");

        match self.authenticated_request(Method::GET, &path, Vec::new()).await {
            Ok(outcome) => match serde_json::from_value::<TableSchema>(outcome.data) {
                Ok(schema) => {
                    info!("Fetched schema with {} fields", schema.items.len());
                    Some(schema)
                }
                Err(err) => {
                    error!("Unexpected schema payload: {err}");
                    None
                }
            },
            Err(err) => {
                error!("Failed to fetch table schema: {err}");
                None
            }
        }
    }

    /// Resolves the locator, then fetches all records.
    ///
    /// An empty result evicts the resolution, so the next call resolves the
    /// locator again.
    pub async fn fetch_table_records(
        &self,
        locator: &str,
        table_id: &str,
        page_size: Option<usize>,
    ) -> Vec<Record> {
        match self.resolve_container_id(locator).await {
            Some(container_id) => {
                let records = self
                    .fetch_all_records(&container_id, table_id, page_size)
                    .await;
                if records.is_empty() {
                    self.evict_container_id(locator);
                }
                records
            }
            None => {
                warn!("Skipping record fetch: locator {locator} did not resolve");
                Vec::new()
            }
        }
    }

    /// Resolves the locator, then fetches the schema.
    pub async fn fetch_table_schema(&self, locator: &str, table_id: &str) -> Option<TableSchema> {
        let container_id = self.resolve_container_id(locator).await?;
        self.fetch_schema(&container_id, table_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use crate::config::LarkConfig;
    use mockito::{Matcher, Mock, ServerGuard};

    const TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";
    const RECORDS_PATH: &str = "/bitable/v1/apps/app123/tables/tbl1/records";

    fn client(server: &ServerGuard) -> LarkClient {
        let config = LarkConfig {
            base_url: server.url(),
            max_retries: 1,
            retry_base_delay: 0.001,
            retry_max_delay: 0.01,
            auth_retry_base_delay: 0.001,
            ..LarkConfig::default()
        };
        LarkClient::new(&config, "cli_test".to_string(), Token::from("secret")).unwrap()
    }

    async fn mock_token(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#)
            .create_async()
            .await
    }

    fn record_json(id: &str, story: &str) -> String {
        format!(r#"{{"record_id":"{id}","fields":{{"Story.No":"{story}"}}}}"#)
    }

    #[tokio::test]
    async fn test_resolve_container_id_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let node = server
            .mock("GET", "/wiki/v2/spaces/get_node")
            .match_query(Matcher::UrlEncoded("token".into(), "wikTok".into()))
            .match_header("authorization", "Bearer t-abc")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"node":{"obj_token":"app123","obj_type":"bitable"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        assert_eq!(client.resolve_container_id("wikTok").await.as_deref(), Some("app123"));
        assert_eq!(client.resolve_container_id("wikTok").await.as_deref(), Some("app123"));
        node.assert_async().await;

        assert_eq!(client.evict_container_id("wikTok").as_deref(), Some("app123"));
        assert!(client.cached_container_id("wikTok").is_none());
    }

    #[tokio::test]
    async fn test_resolve_container_id_without_obj_token() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _mock = server
            .mock("GET", "/wiki/v2/spaces/get_node")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"node":{}}}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert!(client.resolve_container_id("wikTok").await.is_none());
        assert!(client.cached_container_id("wikTok").is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_records_follows_cursor() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let first = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::UrlEncoded("page_size".into(), "2".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{},{}],"has_more":true,"page_token":"cur2","total":3}}}}"#,
                record_json("rec1", "Story-ARD-00001"),
                record_json("rec2", "Story-ARD-00002")
            ))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::UrlEncoded("page_token".into(), "cur2".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{}],"has_more":false,"total":3}}}}"#,
                record_json("rec3", "Story-ARD-00003")
            ))
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_all_records("app123", "tbl1", Some(2)).await;

        let ids: Vec<_> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2", "rec3"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_all_records_returns_partial_on_failure() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _mock = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::UrlEncoded("page_size".into(), "500".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{}],"has_more":true,"page_token":"cur2"}}}}"#,
                record_json("rec1", "Story-ARD-00001")
            ))
            .expect(1)
            .create_async()
            .await;
        let broken = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::UrlEncoded("page_token".into(), "cur2".into()))
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_all_records("app123", "tbl1", None).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "rec1");
        broken.assert_async().await;

        let metrics = client.performance_metrics().await;
        assert_eq!(metrics.requests_total, 3);
        assert_eq!(metrics.requests_failed, 2);
        assert_eq!(metrics.auth_refreshes, 1);
    }

    #[tokio::test]
    async fn test_fetch_stops_when_cursor_missing() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let page = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{}],"has_more":true}}}}"#,
                record_json("rec1", "Story-ARD-00001")
            ))
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_all_records("app123", "tbl1", None).await;
        assert_eq!(records.len(), 1);
        page.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_returns_empty_without_calling_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"code":10014,"msg":"app secret invalid"}"#)
            .expect(3)
            .create_async()
            .await;
        let records_mock = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_all_records("app123", "tbl1", None).await;

        assert!(records.is_empty());
        records_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_schema() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let fields = server
            .mock("GET", "/bitable/v1/apps/app123/tables/tbl1/fields")
            .with_status(200)
            .with_body(
                r#"{"code":0,"data":{"has_more":false,"total":2,"items":[
                    {"field_id":"fld1","field_name":"Story.No","type":1},
                    {"field_id":"fld2","field_name":"Parent Tickets","type":18,"property":{"table_id":"tbl1"}}
                ]}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        let schema = client.fetch_schema("app123", "tbl1").await.unwrap();

        assert_eq!(schema.items.len(), 2);
        assert_eq!(schema.items[1].field_name, "Parent Tickets");
        assert_eq!(schema.items[1].field_type, 18);
        assert_eq!(schema.total, Some(2));
        fields.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_schema_field_error_returns_none() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let fields = server
            .mock("GET", "/bitable/v1/apps/app123/tables/tbl1/fields")
            .with_status(200)
            .with_body(r#"{"code":1254045,"msg":"FieldNameNotFound"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        assert!(client.fetch_schema("app123", "tbl1").await.is_none());
        fields.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_table_records_resolves_first() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _mock = server
            .mock("GET", "/wiki/v2/spaces/get_node")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"node":{"obj_token":"app123"}}}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{}],"has_more":false}}}}"#,
                record_json("rec1", "Story-ARD-00001")
            ))
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_table_records("wikTok", "tbl1", None).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_evicts_resolution() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let node = server
            .mock("GET", "/wiki/v2/spaces/get_node")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"node":{"obj_token":"app123"}}}"#)
            .expect(2)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"items":null,"has_more":false}}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert!(client.fetch_table_records("wikTok", "tbl1", None).await.is_empty());
        assert!(client.cached_container_id("wikTok").is_none());
        assert!(client.fetch_table_records("wikTok", "tbl1", None).await.is_empty());
        node.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_and_call_repeated() {
        let mut server = mockito::Server::new_async().await;
        let first_token = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"ok","tenant_access_token":"t-revoked","expire":7200}"#)
            .expect(1)
            .create_async()
            .await;
        let second_token = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"ok","tenant_access_token":"t-fresh","expire":7200}"#)
            .expect(1)
            .create_async()
            .await;
        let rejected = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer t-revoked")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", RECORDS_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer t-fresh")
            .with_status(200)
            .with_body(format!(
                r#"{{"code":0,"data":{{"items":[{}],"has_more":false}}}}"#,
                record_json("rec1", "Story-ARD-00001")
            ))
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        let records = client.fetch_all_records("app123", "tbl1", None).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "rec1");
        first_token.assert_async().await;
        second_token.assert_async().await;
        rejected.assert_async().await;
        accepted.assert_async().await;

        let metrics = client.performance_metrics().await;
        assert_eq!(metrics.auth_refreshes, 2);
        assert_eq!(metrics.requests_total, 2);
        assert_eq!(metrics.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_second_rejection_is_returned() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"ok","tenant_access_token":"t-abc","expire":7200}"#)
            .expect(2)
            .create_async()
            .await;
        let schema = server
            .mock("GET", "/bitable/v1/apps/app123/tables/tbl1/fields")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server);
        assert!(client.fetch_schema("app123", "tbl1").await.is_none());
        token.assert_async().await;
        schema.assert_async().await;
    }
}
