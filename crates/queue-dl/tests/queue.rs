use queue_dl::{
    DownloadEvent, DownloadManager, DownloadSource, EventSink, QueueConfig, QueueState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Debug)]
struct TestSource {
    id: String,
    name: String,
    url: Option<String>,
}

impl TestSource {
    fn new(server: &MockServer, name: &str) -> Self {
        Self {
            id: format!("/My Video/{}", name),
            name: name.to_string(),
            url: Some(format!("{}/{}", server.uri(), name)),
        }
    }
}

impl DownloadSource for TestSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn file_name(&self) -> String {
        self.name.clone()
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn size_hint(&self) -> u64 {
        0
    }
}

fn recording_sink() -> (EventSink, Arc<Mutex<Vec<DownloadEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event));
    (sink, events)
}

fn manager(dir: &std::path::Path) -> (DownloadManager<TestSource>, Arc<Mutex<Vec<DownloadEvent>>>) {
    let (sink, events) = recording_sink();
    let mut config = QueueConfig::new(dir);
    config.progress_interval = Duration::from_millis(10);
    (
        DownloadManager::new(config, reqwest::Client::new(), sink),
        events,
    )
}

async fn settle(manager: &DownloadManager<TestSource>) {
    tokio::time::timeout(Duration::from_secs(10), manager.wait_until_settled())
        .await
        .expect("queue did not settle");
}

fn state_of(manager: &DownloadManager<TestSource>, id: &str) -> QueueState {
    manager.item(id).expect("item missing").state
}

#[tokio::test]
async fn downloads_fresh_item_to_completion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (manager, events) = manager(dir.path());
    let source = TestSource::new(&server, "news.ts");

    manager.enqueue(vec![source.clone()]).await.unwrap();
    assert_eq!(state_of(&manager, &source.id), QueueState::Queued);

    manager.start().await;
    settle(&manager).await;

    let item = manager.item(&source.id).unwrap();
    assert_eq!(item.state, QueueState::Completed);
    assert_eq!(item.downloaded, 4096);
    assert_eq!(std::fs::read(dir.path().join("news.ts")).unwrap().len(), 4096);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        DownloadEvent::ItemCompleted(c) if c.task_id == source.id
    )));
    manager.stop().await;
}

#[tokio::test]
async fn resumes_partial_file_with_range_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/film.ts"))
        .and(header("Range", "bytes=3-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"defgh".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("film.ts"), b"abc").unwrap();
    let (manager, _events) = manager(dir.path());
    let source = TestSource::new(&server, "film.ts");

    manager.enqueue(vec![source.clone()]).await.unwrap();
    let item = manager.item(&source.id).unwrap();
    assert_eq!(item.state, QueueState::Paused);
    assert_eq!(item.downloaded, 3);

    manager.start().await;
    settle(&manager).await;

    assert_eq!(state_of(&manager, &source.id), QueueState::Completed);
    assert_eq!(
        std::fs::read(dir.path().join("film.ts")).unwrap(),
        b"abcdefgh".to_vec()
    );
    manager.stop().await;
}

#[tokio::test]
async fn restarts_when_server_ignores_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"complete".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("doc.ts"), b"xyz").unwrap();
    let (manager, _events) = manager(dir.path());
    let source = TestSource::new(&server, "doc.ts");

    manager.enqueue(vec![source.clone()]).await.unwrap();
    manager.start().await;
    settle(&manager).await;

    assert_eq!(
        std::fs::read(dir.path().join("doc.ts")).unwrap(),
        b"complete".to_vec()
    );
    manager.stop().await;
}

#[tokio::test]
async fn failed_item_does_not_stall_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/present.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (manager, _events) = manager(dir.path());
    let missing = TestSource::new(&server, "missing.ts");
    let present = TestSource::new(&server, "present.ts");

    manager
        .enqueue(vec![missing.clone(), present.clone()])
        .await
        .unwrap();
    manager.start().await;
    settle(&manager).await;

    let failed = manager.item(&missing.id).unwrap();
    assert_eq!(failed.state, QueueState::Error);
    assert!(failed.error.unwrap().contains("404"));
    assert_eq!(state_of(&manager, &present.id), QueueState::Completed);
    manager.stop().await;
}

#[tokio::test]
async fn item_without_url_is_marked_as_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (manager, _events) = manager(dir.path());
    let mut source = TestSource::new(&server, "nourl.ts");
    source.url = None;

    manager.enqueue(vec![source.clone()]).await.unwrap();
    manager.start().await;
    settle(&manager).await;

    assert_eq!(state_of(&manager, &source.id), QueueState::Error);
    manager.stop().await;
}

#[tokio::test]
async fn duplicate_insert_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (manager, _events) = manager(dir.path());
    let a = TestSource::new(&server, "a.ts");
    let b = TestSource::new(&server, "b.ts");

    assert_eq!(manager.enqueue(vec![a.clone()]).await.unwrap(), 1);
    assert!(manager.enqueue(vec![a.clone()]).await.is_err());
    assert_eq!(manager.insert(0, vec![a.clone(), b.clone()]).await.unwrap(), 1);

    let ids: Vec<String> = manager.snapshot().into_iter().map(|v| v.task_id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
}

#[tokio::test]
async fn move_items_reorders_without_touching_state() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("c.ts"), b"partial").unwrap();
    let (manager, _events) = manager(dir.path());
    let sources: Vec<TestSource> = ["a.ts", "b.ts", "c.ts", "d.ts"]
        .iter()
        .map(|n| TestSource::new(&server, n))
        .collect();
    manager.enqueue(sources.clone()).await.unwrap();

    let order = |m: &DownloadManager<TestSource>| -> Vec<String> {
        m.snapshot().into_iter().map(|v| v.file_name).collect()
    };

    manager
        .move_items(0, &[sources[2].id.clone(), sources[3].id.clone()])
        .unwrap();
    assert_eq!(order(&manager), vec!["c.ts", "d.ts", "a.ts", "b.ts"]);
    assert_eq!(state_of(&manager, &sources[2].id), QueueState::Paused);
    assert_eq!(state_of(&manager, &sources[3].id), QueueState::Queued);

    manager.move_items(4, &[sources[2].id.clone()]).unwrap();
    assert_eq!(order(&manager), vec!["d.ts", "a.ts", "b.ts", "c.ts"]);

    assert!(manager.move_items(0, &["nope".to_string()]).is_err());
}

#[tokio::test]
async fn stop_mid_transfer_pauses_the_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (manager, _events) = manager(dir.path());
    let source = TestSource::new(&server, "slow.ts");
    manager.enqueue(vec![source.clone()]).await.unwrap();
    manager.start().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while state_of(&manager, &source.id) != QueueState::Downloading {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("download never started");

    manager.stop().await;
    assert!(!manager.is_running().await);
    assert_eq!(state_of(&manager, &source.id), QueueState::Paused);
    assert!(manager.remove(&source.id).is_ok());
    assert!(manager.is_empty());
}

#[tokio::test]
async fn finished_local_file_completes_on_unsatisfiable_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/done.ts"))
        .and(header("Range", "bytes=4-"))
        .respond_with(ResponseTemplate::new(416))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("done.ts"), b"full").unwrap();
    let (manager, _events) = manager(dir.path());
    let source = TestSource::new(&server, "done.ts");

    manager.enqueue(vec![source.clone()]).await.unwrap();
    assert_eq!(state_of(&manager, &source.id), QueueState::Paused);
    manager.start().await;
    settle(&manager).await;

    let item = manager.item(&source.id).unwrap();
    assert_eq!(item.state, QueueState::Completed);
    assert_eq!(item.downloaded, 4);
    assert!(item.error.is_none());
    assert_eq!(std::fs::read(dir.path().join("done.ts")).unwrap(), b"full".to_vec());
    manager.stop().await;
}

/// Serves one response that sends `head` of a `total`-byte body, then stalls
async fn stalling_server(head: &'static [u8], total: usize) -> (String, tokio::task::JoinHandle<()>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let headers = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", total);
        socket.write_all(headers.as_bytes()).await.unwrap();
        socket.write_all(head).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    (format!("http://{}/stall.ts", addr), handle)
}

#[tokio::test]
async fn stop_between_chunks_keeps_partial_file() {
    let (url, server) = stalling_server(b"0123456789", 100).await;
    let dir = tempfile::tempdir().unwrap();
    let (manager, _events) = manager(dir.path());
    let source = TestSource {
        id: "/My Video/stall.ts".to_string(),
        name: "stall.ts".to_string(),
        url: Some(url),
    };
    manager.enqueue(vec![source.clone()]).await.unwrap();
    manager.start().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.item(&source.id).map(|i| i.downloaded) != Some(10) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first chunk never arrived");

    manager.stop().await;
    let item = manager.item(&source.id).unwrap();
    assert_eq!(item.state, QueueState::Paused);
    assert_eq!(item.downloaded, 10);
    assert_eq!(
        std::fs::read(dir.path().join("stall.ts")).unwrap(),
        b"0123456789".to_vec()
    );
    server.abort();
}

#[tokio::test]
async fn completed_file_is_moved_to_move_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/show.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"episode".to_vec()))
        .mount(&server)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let library = tempfile::tempdir().unwrap();
    let (sink, _events) = recording_sink();
    let mut config = QueueConfig::new(staging.path());
    config.move_dir = Some(library.path().to_path_buf());
    let manager = DownloadManager::new(config, reqwest::Client::new(), sink);
    let source = TestSource::new(&server, "show.ts");

    manager.enqueue(vec![source.clone()]).await.unwrap();
    manager.start().await;
    settle(&manager).await;

    let item = manager.item(&source.id).unwrap();
    assert_eq!(item.state, QueueState::Completed);
    assert_eq!(item.move_progress, Some(1.0));
    assert!(!staging.path().join("show.ts").exists());
    assert_eq!(
        std::fs::read(library.path().join("show.ts")).unwrap(),
        b"episode".to_vec()
    );
    assert_eq!(manager.clear_finished(), 1);
    manager.stop().await;
}

#[tokio::test]
async fn events_serialize_with_kind_tag() {
    let (sink, events) = recording_sink();
    sink(DownloadEvent::QueueChanged);
    let json = serde_json::to_value(&events.lock().unwrap()[0]).unwrap();
    assert_eq!(json["kind"], "queue-changed");
}
