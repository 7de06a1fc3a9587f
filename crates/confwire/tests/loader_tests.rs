//! Typed loading through the default registry against local files.

use confwire::{CancellationToken, ConfEvent, ConfLoader, Error, Format, LoadError};
use serde::Deserialize;
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize, PartialEq)]
struct Settings {
    name: String,
    port: u16,
    #[serde(default)]
    debug: bool,
}

fn write_config(file_name: &str, contents: &str) -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(file_name);
    fs::write(&path, contents).unwrap();
    (dir, path.to_string_lossy().into_owned())
}

async fn next_event<T>(rx: &mut mpsc::Receiver<ConfEvent<T>>) -> ConfEvent<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("queue closed unexpectedly")
}

/// Test loading each supported format from a bare path
#[tokio::test]
async fn test_load_each_format() {
    let expected = Settings {
        name: "api".into(),
        port: 8080,
        debug: true,
    };
    let cases = [
        ("app.json", r#"{"name":"api","port":8080,"debug":true}"#),
        ("app.yaml", "name: api\nport: 8080\ndebug: true\n"),
        ("app.toml", "name = \"api\"\nport = 8080\ndebug = true\n"),
        (
            "app.xml",
            "<settings><name>api</name><port>8080</port><debug>true</debug></settings>",
        ),
        ("app.ini", "name = api\nport = 8080\ndebug = yes\n"),
    ];
    for (file_name, contents) in cases {
        let (_dir, path) = write_config(file_name, contents);
        let loader = ConfLoader::<Settings>::new(&path).unwrap();
        assert_eq!(loader.load().await.unwrap(), expected, "{}", file_name);
    }
}

/// Test sections and nested elements map onto nested structs
#[tokio::test]
async fn test_load_nested_text_formats() {
    #[derive(Debug, Deserialize)]
    struct Database {
        host: String,
        port: u16,
    }
    #[derive(Debug, Deserialize)]
    struct App {
        title: String,
        database: Database,
        #[serde(default)]
        replicas: Vec<String>,
    }

    let (_dir, path) = write_config(
        "app.ini",
        "title = demo\n\n[database]\nhost = localhost\nport = 5432\n",
    );
    let app = ConfLoader::<App>::new(&path).unwrap().load().await.unwrap();
    assert_eq!(app.title, "demo");
    assert_eq!(app.database.port, 5432);

    let (_dir, path) = write_config(
        "app.xml",
        r#"<config><title>demo</title><database host="db"><port>5433</port></database>
           <replicas>a</replicas><replicas>b</replicas></config>"#,
    );
    let app = ConfLoader::<App>::new(&path).unwrap().load().await.unwrap();
    assert_eq!(app.database.host, "db");
    assert_eq!(app.database.port, 5433);
    assert_eq!(app.replicas, vec!["a", "b"]);
}

/// Test environment references in values are substituted unless disabled
#[tokio::test]
#[serial]
async fn test_env_expansion() {
    std::env::set_var("CONFWIRE_LOADER_NAME", "from-env");
    std::env::remove_var("CONFWIRE_LOADER_PORT");
    let (_dir, path) = write_config(
        "app.yaml",
        "name: ${CONFWIRE_LOADER_NAME}\nport: ${CONFWIRE_LOADER_PORT:-7070}\n",
    );

    let settings = ConfLoader::<Settings>::new(&path).unwrap().load().await.unwrap();
    assert_eq!(settings.name, "from-env");
    assert_eq!(settings.port, 7070);

    let raw = ConfLoader::<Settings>::new(&path)
        .unwrap()
        .with_env_expansion(false)
        .load()
        .await
        .unwrap_err();
    assert!(matches!(raw, LoadError::Mapping(_)), "{}", raw);

    std::env::remove_var("CONFWIRE_LOADER_NAME");
}

/// Test the content-type parameter decides when the path has no extension
#[tokio::test]
async fn test_content_type_parameter() {
    let (_dir, path) = write_config("settings", "name: api\nport: 9000\n");
    let uri = format!("file://{}?content-type=application/yaml", path);
    let loader = ConfLoader::<Settings>::new(&uri).unwrap();
    assert_eq!(loader.format(), Format::Yaml);
    assert_eq!(loader.load().await.unwrap().port, 9000);
}

/// Test decode, mapping and empty-payload failures are distinguished
#[tokio::test]
async fn test_load_failures() {
    let (_dir, path) = write_config("bad.json", "{not json");
    let err = ConfLoader::<Settings>::new(&path).unwrap().load().await.unwrap_err();
    assert!(matches!(err, LoadError::Decode { format: Format::Json, .. }), "{}", err);

    let (_dir, path) = write_config("wrong.json", r#"{"name":"api","port":"eighty"}"#);
    let err = ConfLoader::<Settings>::new(&path).unwrap().load().await.unwrap_err();
    assert!(matches!(err, LoadError::Mapping(_)), "{}", err);

    let (_dir, path) = write_config("empty.json", "");
    let err = ConfLoader::<Settings>::new(&path).unwrap().load().await.unwrap_err();
    assert!(matches!(err, LoadError::Empty), "{}", err);
}

/// Test construction errors for unknown formats, schemes and missing files
#[test]
fn test_construction_errors() {
    assert!(matches!(
        ConfLoader::<Settings>::new("/etc/app/settings.hcl"),
        Err(LoadError::Format { .. })
    ));
    assert!(matches!(
        ConfLoader::<Settings>::new("ftp://example.com/app.json"),
        Err(LoadError::Reader(Error::UnsupportedScheme(_)))
    ));
    let err = ConfLoader::<Settings>::new("/definitely/not/here/app.json")
        .err()
        .expect("missing file should fail");
    assert!(
        matches!(err.reader_error(), Some(Error::InvalidUri { .. })),
        "{}",
        err
    );
}

/// Test the subscription starts with the loaded value then follows changes
#[tokio::test]
async fn test_subscribe_initial_then_changes() {
    let (dir, path) = write_config("app.json", r#"{"name":"api","port":1}"#);
    let loader = ConfLoader::<Settings>::new(&path).unwrap();
    let mut events = loader.subscribe(CancellationToken::new()).await.unwrap();

    let initial = next_event(&mut events).await;
    assert!(initial.is_valid());
    assert_eq!(initial.source_uri, path);
    assert_eq!(initial.config.unwrap().port, 1);

    fs::write(dir.path().join("app.json"), r#"{"name":"api","port":2}"#).unwrap();
    let changed = next_event(&mut events).await;
    assert_eq!(changed.into_result().unwrap().port, 2);

    fs::write(dir.path().join("app.json"), "{broken").unwrap();
    let broken = next_event(&mut events).await;
    assert!(!broken.is_valid());
    assert!(matches!(broken.error, Some(LoadError::Decode { .. })));

    loader.close().await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
}

/// Test a missing source fails the subscribe call itself
#[tokio::test]
async fn test_subscribe_requires_initial_load() {
    let (_dir, path) = write_config("app.json", "");
    let loader = ConfLoader::<Settings>::new(&path).unwrap();
    let err = loader.subscribe(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, LoadError::Empty));
}
