//! Shared fixtures: a mock API server plus a throwaway data directory

use favorites_keeper::config::{parse_config, Config};
use favorites_keeper::crawler::CrawlOrchestrator;
use favorites_keeper::storage::SqliteStorage;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FAVORITES_PATH: &str = "/ajax/favorites/all_fav";
pub const PROFILE_PATH: &str = "/ajax/profile/info";

pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
    pub config: Config,
    pub storage: Arc<Mutex<SqliteStorage>>,
}

impl Harness {
    /// Starts a mock server and writes a config pointing at it
    ///
    /// `crawler_overrides` is appended to the `[crawler]` table.
    pub async fn start(crawler_overrides: &str) -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let cookie_path = dir.path().join("cookies.json");
        std::fs::write(&cookie_path, r#"[{"name":"SUB","value":"abc"}]"#).unwrap();

        let text = format!(
            r#"
[crawler]
request-delay-ms = 0
retry-delay-ms = 1
{overrides}

[api]
favorites-url = "{uri}{favorites}"
profile-url = "{uri}{profile}"
post-url-base = "https://weibo.example"

[scheduler]
interval-seconds = 3600
autostart = false

[credential]
cookie-path = "{cookies}"
uid = "42"

[output]
database-path = "{db}"
logs-dir = "{logs}"
"#,
            overrides = crawler_overrides,
            uri = server.uri(),
            favorites = FAVORITES_PATH,
            profile = PROFILE_PATH,
            cookies = cookie_path.display(),
            db = dir.path().join("favorites.db").display(),
            logs = dir.path().join("logs").display(),
        );
        let config = parse_config(&text).unwrap();
        let storage = SqliteStorage::new(&dir.path().join("favorites.db")).unwrap();

        Self {
            server,
            dir,
            config,
            storage: Arc::new(Mutex::new(storage)),
        }
    }

    pub fn orchestrator(&self) -> CrawlOrchestrator<SqliteStorage> {
        CrawlOrchestrator::from_config(&self.config, "test-hash", Arc::clone(&self.storage))
            .unwrap()
    }

    pub async fn mount_valid_profile(&self) {
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"user": {"idstr": "42", "screen_name": "alice"}}
            })))
            .mount(&self.server)
            .await;
    }

    /// Serves `ids` as page `page`; an empty slice is the end of pagination
    pub async fn mount_page(&self, page: u32, ids: &[&str]) {
        Mock::given(method("GET"))
            .and(path(FAVORITES_PATH))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(ids)))
            .mount(&self.server)
            .await;
    }

    /// Answers every page not mounted earlier with an empty page
    pub async fn mount_empty_tail(&self) {
        Mock::given(method("GET"))
            .and(path(FAVORITES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&[])))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_page_status(&self, page: u32, status: u16) {
        Mock::given(method("GET"))
            .and(path(FAVORITES_PATH))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

pub fn item(id: &str) -> Value {
    json!({
        "idstr": id,
        "mblogid": format!("M{}", id),
        "created_at": "Tue Mar 05 10:00:00 +0800 2024",
        "text": format!("<p>post {}</p>", id),
        "text_raw": format!("post {}", id),
        "isLongText": false,
        "url_struct": [{"long_url": format!("https://example.com/{}", id)}],
        "user": {"idstr": "7", "screen_name": "bob"},
        "source": "web"
    })
}

pub fn page_body(ids: &[&str]) -> Value {
    json!({
        "ok": 1,
        "data": ids.iter().map(|id| item(id)).collect::<Vec<_>>(),
    })
}
