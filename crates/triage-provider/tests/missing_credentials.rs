use std::sync::Arc;

use triage_provider::gemini::GeminiProvider;
use triage_provider::openai::OpenAiProvider;
use triage_provider::registry::ModelLimits;
use triage_provider::Provider;
use triage_retry::http::{HttpClientConfig, RetryingHttpClient};
use triage_secrets::SecretsStore;

fn store_with_no_credentials() -> Arc<SecretsStore> {
    let dir = tempfile::tempdir().unwrap();
    let store = SecretsStore::builder()
        .passphrase("a reasonably long passphrase for tests")
        .path(dir.path().join("secrets.json"))
        .build()
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn openai_provider_returns_none_without_credentials() {
    let client = RetryingHttpClient::new(HttpClientConfig::default());
    let provider = OpenAiProvider::new(client, store_with_no_credentials(), "gpt-4o-mini", ModelLimits::default());
    assert!(provider.analyze("anything").await.is_none());
    assert_eq!(provider.name(), "openai");
}

#[tokio::test]
async fn gemini_provider_returns_none_without_credentials() {
    let client = RetryingHttpClient::new(HttpClientConfig::default());
    let provider = GeminiProvider::new(client, store_with_no_credentials(), "gemini-1.5-flash", ModelLimits::default());
    assert!(provider.analyze("anything").await.is_none());
    assert_eq!(provider.name(), "google");
}
