use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::{AliasAction, SearchEngine};
use crate::error::{Error, Result};

/// 远端集群连接配置
///
/// 认证优先级：api_key > username/password > 匿名
#[derive(Clone, Deserialize)]
pub struct ElasticConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// 凭据不进日志
impl std::fmt::Debug for ElasticConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// HTTP 搜索引擎客户端（Elasticsearch REST API）
pub struct ElasticClient {
    client: reqwest::Client,
    config: ElasticConfig,
}

impl ElasticClient {
    pub fn new(config: ElasticConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| Error::Transport {
                op: "build client",
                source,
            })?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.config.url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(path));
        if let Some(ref api_key) = self.config.api_key {
            req.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            req.basic_auth(username, self.config.password.as_ref())
        } else {
            req
        }
    }

    async fn send(&self, op: &'static str, req: RequestBuilder) -> Result<Response> {
        let resp = req
            .send()
            .await
            .map_err(|source| Error::Transport { op, source })?;
        tracing::debug!("{} -> {}", op, resp.status());
        Ok(resp)
    }

    /// 非 2xx 一律转为 `Error::Engine`，带上响应体便于排障
    async fn expect_success(&self, op: &'static str, req: RequestBuilder) -> Result<Response> {
        let resp = self.send(op, req).await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        Err(engine_error(op, resp).await)
    }

    /// HEAD 存在性检查：200 → true，404 → false
    async fn exists(&self, op: &'static str, path: &str) -> Result<bool> {
        let resp = self.send(op, self.request(Method::HEAD, path)).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(engine_error(op, resp).await),
        }
    }
}

async fn engine_error(op: &'static str, resp: Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Error::Engine { op, status, body }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn template_body(patterns: &[String], mapping: &Value) -> Value {
    json!({
        "index_patterns": patterns,
        "template": { "mappings": mapping },
    })
}

fn alias_actions_body(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|a| match a {
            AliasAction::Add { index, alias } => json!({ "add": { "index": index, "alias": alias } }),
            AliasAction::Remove { index, alias } => {
                json!({ "remove": { "index": index, "alias": alias } })
            }
        })
        .collect();
    json!({ "actions": actions })
}

/// `GET /_alias/{name}` 的响应：`{ "<index>": { "aliases": { ... } }, ... }`
fn parse_alias_response(body: &Value) -> Vec<String> {
    let mut out: Vec<String> = body
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    out.sort();
    out
}

#[async_trait]
impl SearchEngine for ElasticClient {
    async fn template_exists(&self, name: &str) -> Result<bool> {
        self.exists("template exists", &format!("_index_template/{}", name))
            .await
    }

    async fn put_template(&self, name: &str, patterns: &[String], mapping: &Value) -> Result<()> {
        let req = self
            .request(Method::PUT, &format!("_index_template/{}", name))
            .json(&template_body(patterns, mapping));
        self.expect_success("put template", req).await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.exists("index exists", index).await
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let req = self.request(Method::PUT, index).json(&json!({}));
        self.expect_success("create index", req).await?;
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        self.exists("alias exists", &format!("_alias/{}", alias))
            .await
    }

    async fn put_alias(&self, pattern: &str, alias: &str) -> Result<()> {
        let req = self.request(Method::PUT, &format!("{}/_alias/{}", pattern, alias));
        self.expect_success("put alias", req).await?;
        Ok(())
    }

    async fn rollover(&self, alias: &str, new_index: &str) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("{}/_rollover/{}", alias, new_index))
            .json(&json!({}));
        let resp = self.expect_success("rollover", req).await?;
        let body: Value = resp.json().await.map_err(|source| Error::Transport {
            op: "rollover",
            source,
        })?;
        // dry_run / 条件未满足时 rolled_over=false
        if body.get("rolled_over").and_then(Value::as_bool) == Some(false) {
            return Err(Error::Engine {
                op: "rollover",
                status: 200,
                body: body.to_string(),
            });
        }
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let req = self
            .request(Method::POST, "_aliases")
            .json(&alias_actions_body(actions));
        self.expect_success("update aliases", req).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let resp = self
            .send("delete index", self.request(Method::DELETE, index))
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(engine_error("delete index", resp).await),
        }
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>> {
        let resp = self
            .send("get alias", self.request(Method::GET, &format!("_alias/{}", alias)))
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => {
                let body: Value = resp.json().await.map_err(|source| Error::Transport {
                    op: "get alias",
                    source,
                })?;
                Ok(parse_alias_response(&body))
            }
            _ => Err(engine_error("get alias", resp).await),
        }
    }
}
