use sealed_reader::config::{CipherConfig, Configuration, SourceConfig};
use sealed_reader::layout::ReadingMode;
use sealed_reader::visibility::MarginPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
library-path: "/library"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.library_path, PathBuf::from("/library"));
    assert_eq!(cfg.source, SourceConfig::Directory);
    assert_eq!(cfg.cipher, CipherConfig::None);
    assert_eq!(cfg.reading_mode, ReadingMode::Width);
}

#[test]
fn defaults_match_fetch_policy() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    let policy = cfg.fetch.retry_policy();
    assert_eq!(policy.delay, Duration::from_millis(1000));
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(cfg.fetch.request_timeout, Duration::from_secs(15));
}

#[test]
fn parse_humantime_durations() {
    let yaml = r#"
fetch:
  retry-delay: 250ms
  max-attempts: 3
scroll:
  interval: 20ms
  linger: 2s
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.fetch.retry_delay, Duration::from_millis(250));
    assert_eq!(cfg.fetch.max_attempts, 3);
    assert_eq!(cfg.scroll.interval, Duration::from_millis(20));
    assert_eq!(cfg.scroll.linger, Duration::from_secs(2));
}

#[test]
fn context_margins_default_per_gallery_kind() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    assert_eq!(cfg.thumbnail_options().margin, MarginPolicy::new(5.0, 5.0));
    assert_eq!(cfg.page_options().margin, MarginPolicy::new(2.5, 5.0));
    assert_eq!(cfg.thumbnail_options().layout.columns, 4);
    assert_eq!(cfg.page_options().layout.columns, 1);
}

#[test]
fn partial_section_overrides_only_named_values() {
    let yaml = r#"
reading-mode: original
viewport:
  width: 800
  height: 600
pages:
  look-ahead: 8.0
thumbnails:
  columns: 6
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let pages = cfg.page_options();
    assert_eq!(pages.margin, MarginPolicy::new(2.5, 8.0));
    assert_eq!(pages.layout.reading_mode, ReadingMode::Original);
    assert!((pages.layout.content_width - 800.0).abs() < f32::EPSILON);

    let thumbs = cfg.thumbnail_options();
    assert_eq!(thumbs.layout.columns, 6);
    assert_eq!(thumbs.layout.reading_mode, ReadingMode::Width);
}

#[test]
fn parse_http_source_and_cipher() {
    let yaml = r#"
source:
  type: http
  base-url: "https://cdn.example.com/books/"
cipher:
  type: aes-256-gcm
  key: "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc="
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.source,
        SourceConfig::Http {
            base_url: "https://cdn.example.com/books/".into()
        }
    );
    assert!(matches!(cfg.cipher, CipherConfig::Aes256Gcm { .. }));
    cfg.validated().expect("valid configuration");
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        "fetch:\n  max-attempts: 0\n",
        "viewport:\n  height: 0\n",
        "pages:\n  look-behind: -1.0\n",
        "thumbnails:\n  columns: 0\n",
        "scroll:\n  step: 0\n",
        "scroll:\n  interval: 0s\n",
        "fetch:\n  request-timeout: 0s\n",
        "cipher:\n  type: aes-256-gcm\n  key: c2hvcnQ=\n",
        "source:\n  type: http\n  base-url: not a url\n",
    ];
    for yaml in cases {
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "expected rejection of {yaml:?}");
    }
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "library-path: /srv/library\nreading-mode: original\n").unwrap();
    let cfg = Configuration::from_yaml_file(&path).unwrap().validated().unwrap();
    assert_eq!(cfg.library_path, PathBuf::from("/srv/library"));
    assert_eq!(cfg.reading_mode, ReadingMode::Original);

    assert!(Configuration::from_yaml_file(dir.path().join("missing.yaml")).is_err());
}
