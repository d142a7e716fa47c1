// tests/pipeline_cycle.rs
//
// End-to-end cycles over fixture feeds with scripted collaborators: an
// offline page fetcher, a scripted completion backend and a recording
// messenger.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use feed_relay::enrich::backend::{CompletionBackend, CompletionRequest, StubBackend, Task};
use feed_relay::enrich::{EnrichmentClient, EnrichmentOptions};
use feed_relay::fetch::{ContentFetcher, PageFetcher};
use feed_relay::ingest::providers::feed::FeedSource;
use feed_relay::ingest::SourceGroup;
use feed_relay::notify::dry_run::{DryRunMessenger, WouldSend};
use feed_relay::notify::{DeliveryClient, Destination, Messenger};
use feed_relay::render::RenderedDocument;
use feed_relay::retry::RetryPolicy;
use feed_relay::store::{ProcessedRecord, StoreResult};
use feed_relay::{
    DedupStore, DryRunStore, ItemKey, Orchestrator, PipelineError, PipelineResult, RecordStatus,
    SourceKind, SqliteDedupStore, StoreError,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct OfflinePages;

#[async_trait]
impl PageFetcher for OfflinePages {
    async fn fetch_page(&self, url: &str) -> PipelineResult<String> {
        Err(PipelineError::content(format!("connect {url}: refused"), true))
    }
}

/// Echo translation unless the text contains a trigger word.
struct ScriptedBackend;

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, req: &CompletionRequest<'_>) -> PipelineResult<String> {
        match req.task {
            Task::Translate if req.user.contains("interstitial") => {
                Ok("Что-то пошло не так. Please refresh the page.".into())
            }
            Task::Translate if req.user.contains("boom") => Err(PipelineError::enrichment("HTTP 500", true)),
            Task::Translate => Ok(format!("RU: {}", req.user)),
            Task::Summarize { .. } => Ok("- первый\n- второй\n- третий".into()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingMessenger {
    down: Vec<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMessenger {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> PipelineResult<()> {
        if self.down.iter().any(|d| d == chat_id) {
            return Err(PipelineError::delivery(chat_id, "HTTP 503", true));
        }
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_document(&self, chat_id: &str, document: &RenderedDocument) -> PipelineResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), format!("doc:{}", document.filename)));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn rss(items: &[(&str, &str, &str)]) -> String {
    let pub_date = Utc::now().to_rfc2822();
    let body: String = items
        .iter()
        .map(|(id, link, summary)| {
            format!(
                "<item><title>Item {id}</title><link>{link}</link><guid>{id}</guid>\
                 <pubDate>{pub_date}</pubDate><description>{summary}</description></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>n</title>{body}</channel></rss>"#)
}

fn newsletter_group(xml: &str) -> SourceGroup {
    SourceGroup::new(
        "newsletter",
        vec![FeedSource::from_fixture(SourceKind::FeedNewsletter, xml).into()],
    )
}

fn orchestrator(
    store: Arc<dyn DedupStore>,
    backend: Arc<dyn CompletionBackend>,
    messenger: Arc<dyn Messenger>,
    groups: Vec<SourceGroup>,
) -> Orchestrator {
    let retry = RetryPolicy::immediate(3);
    Orchestrator::new(
        store,
        ContentFetcher::new(Arc::new(OfflinePages), retry),
        EnrichmentClient::new(backend, EnrichmentOptions::default(), retry),
        DeliveryClient::new(messenger, retry),
    )
    .with_groups(groups)
    .with_destinations(vec![Destination::new("chat", "42")])
}

fn memory_store() -> Arc<dyn DedupStore> {
    Arc::new(SqliteDedupStore::open_in_memory().unwrap())
}

fn lookback() -> chrono::Duration {
    chrono::Duration::hours(24)
}

fn status(store: &Arc<dyn DedupStore>, id: &str) -> Option<RecordStatus> {
    store
        .get(&ItemKey::new(SourceKind::FeedNewsletter, id))
        .unwrap()
        .map(|r| r.status)
}

#[tokio::test]
async fn new_newsletter_item_is_delivered_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn DedupStore> = Arc::new(SqliteDedupStore::open(dir.path().join("state.db")).unwrap());
    let messenger = Arc::new(RecordingMessenger::default());
    let out_dir = dir.path().join("out");
    let orch = orchestrator(
        store.clone(),
        Arc::new(StubBackend::new("ru")),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("p1", "https://x/p1", "short")]))],
    )
    .with_output_dir(&out_dir);

    let first = orch.run_cycle(lookback(), 20).await.unwrap();
    let expected_doc = format!("Newsletter_{}_p1.html", Utc::now().format("%Y-%m-%d"));
    assert_eq!((first.delivered, first.skipped, first.failed), (1, 0, 0));
    assert_eq!(first.rendered, vec![expected_doc.clone()]);
    assert_eq!(status(&store, "p1"), Some(RecordStatus::Delivered));

    let saved = std::fs::read_to_string(out_dir.join(&expected_doc)).unwrap();
    assert!(saved.contains("[ru draft] short"), "summary fallback feeds the document");

    let sent = messenger.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.starts_with("#Newsletter\nTLDR:\n- [ru draft] short\n"));
    assert!(sent[0].1.ends_with("Original: https://x/p1"));
    assert_eq!(sent[1].1, format!("doc:{expected_doc}"));

    let second = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(second.delivered, 0);
    assert_eq!(second.processed(), 0);
    assert_eq!(messenger.sent().len(), 2);
}

#[tokio::test]
async fn in_batch_duplicates_are_processed_once() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger::default());
    let xml = rss(&[("d1", "https://x/d1", "one."), ("d1", "https://x/d1", "again.")]);
    let orch = orchestrator(
        store,
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&xml), newsletter_group(&xml)],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(messenger.sent().iter().filter(|(_, t)| !t.starts_with("doc:")).count(), 1);
}

#[tokio::test]
async fn refresh_notice_is_skipped_not_delivered() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger::default());
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("s1", "https://x/s1", "an interstitial page")]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!((report.delivered, report.skipped), (0, 1));
    assert_eq!(status(&store, "s1"), Some(RecordStatus::Skipped));
    assert!(messenger.sent().is_empty());
}

#[tokio::test]
async fn empty_summary_with_failing_fetch_is_skipped() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger::default());
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("e1", "https://x/e1", "")]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(status(&store, "e1"), Some(RecordStatus::Skipped));
    assert!(messenger.sent().is_empty());
}

#[tokio::test]
async fn enrichment_failure_is_recorded_and_does_not_stop_the_cycle() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger::default());
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[
            ("f1", "https://x/f1", "boom"),
            ("f2", "https://x/f2", "fine text."),
        ]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!((report.delivered, report.failed), (1, 1));
    assert_eq!(report.item_failures[0].key, ItemKey::new(SourceKind::FeedNewsletter, "f1"));
    assert_eq!(status(&store, "f1"), Some(RecordStatus::Failed));
    assert_eq!(status(&store, "f2"), Some(RecordStatus::Delivered));

    // a failed item is not retried on the next cycle
    let again = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(again.processed(), 0);
}

#[tokio::test]
async fn one_failing_destination_still_counts_as_delivered() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger {
        down: vec!["@down".into()],
        ..RecordingMessenger::default()
    });
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("m1", "https://x/m1", "text.")]))],
    )
    .with_destinations(vec![
        Destination::new("chat", "42"),
        Destination::new("channel", "@down"),
    ]);

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(status(&store, "m1"), Some(RecordStatus::Delivered));
    assert_eq!(report.destination_failures.len(), 1);
    assert_eq!(report.destination_failures[0].1.destination, "channel");
    assert!(messenger.sent().iter().all(|(chat, _)| chat == "42"));
}

#[tokio::test]
async fn all_destinations_failing_records_failure() {
    let store = memory_store();
    let messenger = Arc::new(RecordingMessenger {
        down: vec!["42".into()],
        ..RecordingMessenger::default()
    });
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger,
        vec![newsletter_group(&rss(&[("m2", "https://x/m2", "text.")]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(status(&store, "m2"), Some(RecordStatus::Failed));
}

#[tokio::test]
async fn failing_source_does_not_block_other_groups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let broken = SourceGroup::new(
        "research",
        vec![FeedSource::from_url(SourceKind::FeedResearch, server.uri(), reqwest::Client::new()).into()],
    );
    let store = memory_store();
    let orch = orchestrator(
        store,
        Arc::new(ScriptedBackend),
        Arc::new(RecordingMessenger::default()),
        vec![broken, newsletter_group(&rss(&[("ok1", "https://x/ok1", "text.")]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.source_failures.len(), 1);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn dry_run_never_consumes_items() {
    let real = memory_store();
    let dry: Arc<dyn DedupStore> = Arc::new(DryRunStore::new(real.clone()));
    let messenger = Arc::new(DryRunMessenger::new());
    let orch = orchestrator(
        dry,
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("dr1", "https://x/dr1", "text.")]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(status(&real, "dr1"), None);
    assert!(matches!(&messenger.sent()[..], [WouldSend::Text { .. }, WouldSend::Document { .. }]));

    // the overlay remembers within the same run
    assert_eq!(orch.run_cycle(lookback(), 20).await.unwrap().processed(), 0);
}

/// Reads through to a real store but can never write; `exists` also fails
/// when `fail_exists` is set.
struct BrokenStore {
    inner: Arc<dyn DedupStore>,
    fail_exists: bool,
}

impl DedupStore for BrokenStore {
    fn exists(&self, key: &ItemKey) -> StoreResult<bool> {
        if self.fail_exists {
            return Err(StoreError::InvalidData("disk I/O error".into()));
        }
        self.inner.exists(key)
    }

    fn record(&self, _record: &ProcessedRecord) -> StoreResult<bool> {
        Err(StoreError::InvalidData("database is locked".into()))
    }

    fn get(&self, key: &ItemKey) -> StoreResult<Option<ProcessedRecord>> {
        self.inner.get(key)
    }
}

#[tokio::test]
async fn store_failure_on_record_aborts_the_cycle() {
    let messenger = Arc::new(RecordingMessenger::default());
    let store: Arc<dyn DedupStore> = Arc::new(BrokenStore {
        inner: memory_store(),
        fail_exists: false,
    });
    let orch = orchestrator(
        store,
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[
            ("w1", "https://x/w1", "text."),
            ("w2", "https://x/w2", "text."),
        ]))],
    );

    let err = orch.run_cycle(lookback(), 20).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidData(_)));
    // the second item never starts once the first cannot be recorded
    let texts: Vec<_> = messenger.sent().into_iter().filter(|(_, t)| !t.starts_with("doc:")).collect();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].1.contains("https://x/w1"));
}

#[tokio::test]
async fn store_failure_on_lookup_stops_the_poll_loop() {
    let messenger = Arc::new(RecordingMessenger::default());
    let store: Arc<dyn DedupStore> = Arc::new(BrokenStore {
        inner: memory_store(),
        fail_exists: true,
    });
    let orch = orchestrator(
        store,
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[("l1", "https://x/l1", "text.")]))],
    );

    assert!(orch.run_cycle(lookback(), 20).await.is_err());

    let stopped = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        orch.run_forever(std::time::Duration::from_secs(3600), lookback(), 20),
    )
    .await
    .expect("poll loop returns instead of sleeping");
    assert!(stopped.is_err());
    assert!(messenger.sent().is_empty());
}

/// Notes, at each text delivery, whether the previous item is already recorded.
struct CommitOrderMessenger {
    store: Arc<dyn DedupStore>,
    previous: Mutex<Option<ItemKey>>,
    seen_committed: Mutex<Vec<bool>>,
}

#[async_trait]
impl Messenger for CommitOrderMessenger {
    async fn send_text(&self, _chat_id: &str, text: &str) -> PipelineResult<()> {
        let mut previous = self.previous.lock().unwrap();
        if let Some(prev) = previous.as_ref() {
            let committed = self.store.exists(prev).unwrap();
            self.seen_committed.lock().unwrap().push(committed);
        }
        let id = text.rsplit('/').next().unwrap_or_default().to_string();
        *previous = Some(ItemKey::new(SourceKind::FeedNewsletter, id));
        Ok(())
    }

    async fn send_document(&self, _chat_id: &str, _document: &RenderedDocument) -> PipelineResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "commit-order"
    }
}

#[tokio::test]
async fn each_record_is_committed_before_the_next_item_starts() {
    let store = memory_store();
    let messenger = Arc::new(CommitOrderMessenger {
        store: store.clone(),
        previous: Mutex::new(None),
        seen_committed: Mutex::new(Vec::new()),
    });
    let orch = orchestrator(
        store.clone(),
        Arc::new(ScriptedBackend),
        messenger.clone(),
        vec![newsletter_group(&rss(&[
            ("o1", "https://x/o1", "first."),
            ("o2", "https://x/o2", "second."),
            ("o3", "https://x/o3", "third."),
        ]))],
    );

    let report = orch.run_cycle(lookback(), 20).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(*messenger.seen_committed.lock().unwrap(), vec![true, true]);
}
