use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use relaywiz::config::Config;
use relaywiz::relay::{PagePort, Reply};
use relaywiz::storage::{KeyValueStore, MemoryStore, Settings, SledStore};

#[allow(dead_code)]
pub const API_KEY: &str = "sk-test-key";

/// Config whose provider and OCR endpoints point at `base`
#[allow(dead_code)]
pub fn config_for(base: &str) -> Config {
    let mut config = Config::default();
    config.provider.api_base = base.to_string();
    config.ocr.endpoint = format!("{}/upload", base);
    config
}

/// In-memory store holding default settings and `api_key`
#[allow(dead_code)]
pub fn seeded_store(api_key: &str) -> Arc<dyn KeyValueStore> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Settings {
        api_key: api_key.to_string(),
        ..Settings::default()
    }
    .save(store.as_ref())
    .expect("failed to seed settings");
    store
}

#[allow(dead_code)]
pub fn create_temp_store() -> (SledStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = SledStore::open(tmp.path().join("store")).expect("failed to open sled store");
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// SSE body streaming `tokens` under completion id `id`
#[allow(dead_code)]
pub fn sse_body(id: &str, tokens: &[&str]) -> String {
    let mut body = String::new();
    for token in tokens {
        let record = serde_json::json!({
            "id": id,
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": token}}]
        });
        body.push_str(&format!("data: {}\n\n", record));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Every reply until the worker sends a terminal reply or closes the port
#[allow(dead_code)]
pub async fn collect_replies(port: &mut PagePort) -> Vec<Reply> {
    let mut replies = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(10), port.recv())
            .await
            .expect("timed out waiting for reply");
        match next {
            Some(reply) => {
                let terminal = reply.is_done()
                    || reply.status() == Some(relaywiz::relay::ReplyStatus::Stop);
                replies.push(reply);
                if terminal {
                    break;
                }
            }
            None => break,
        }
    }
    replies
}
