use chrono::NaiveDate;
use formpilot_engine::config::{ConfigError, ConfigLoader};
use formpilot_engine::logging::{RecordingSink, Reporter};
use formpilot_engine::schema::{FieldKey, FieldValue, FormValues};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const MINIMAL: &str = r#"{
    "form_url": "https://forms.example/viewform",
    "event_name": "Friday Social",
    "start_hour": "21",
    "start_minute": "5",
    "end_hour": "23",
    "end_minute": "0",
    "event_host": "Hoshino"
}"#;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_minimal_config_gets_defaults() {
    let config = ConfigLoader::parse(MINIMAL, false).unwrap();
    assert!(config.record_the_email_address_to_reply);
    assert_eq!(config.android_support, "PC/android");
    assert_eq!(config.start_minute, "05");
    assert_eq!(config.end_minute, "00");
    assert!(config.genres.is_empty());
    assert!(!config.overseas_announcement);

    let engine = &config.engine;
    assert_eq!(engine.timeouts.presence(), Duration::from_secs(10));
    assert_eq!(engine.timeouts.click_ready(), Duration::from_secs(1));
    assert_eq!(engine.retry.policy().max_attempts, 3);
    assert_eq!(engine.retry.policy().delay, Duration::from_millis(500));
    assert_eq!(engine.recovery.max_recoveries, 3);
    assert_eq!(engine.recovery.delay_ms, 2000);
    assert_eq!(engine.launch.driver_port, 9515);
    assert_eq!(engine.launch.browser_args, vec!["--start-maximized", "--disable-gpu"]);
    assert_eq!(engine.layout.label_block_class, "HoXoMd");
    assert_eq!(engine.layout.section_xpath, "//div[@role='list']");
}

#[test]
fn test_all_missing_keys_reported_together() {
    let err = ConfigLoader::parse(
        r#"{"form_url": "https://forms.example", "event_name": "  ", "start_hour": 20}"#,
        false,
    )
    .unwrap_err();

    match err {
        ConfigError::MissingKeys(keys) => assert_eq!(
            keys,
            vec!["event_name", "start_minute", "end_hour", "end_minute", "event_host"]
        ),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_clock_values_are_range_checked() {
    let bad = MINIMAL.replace(r#""end_hour": "23""#, r#""end_hour": "24""#);
    let err = ConfigLoader::parse(&bad, false).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "end_hour"));

    let bad = MINIMAL.replace(r#""start_minute": "5""#, r#""start_minute": "five""#);
    let err = ConfigLoader::parse(&bad, false).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "start_minute"));
}

#[test]
fn test_genres_must_be_a_list() {
    let bad = MINIMAL.replace(
        r#""event_host": "Hoshino""#,
        r#""event_host": "Hoshino", "genres": "交流""#,
    );
    let err = ConfigLoader::parse(&bad, false).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "genres"));
}

#[test]
fn test_unknown_keys_are_ignored() {
    let with_extras = MINIMAL.replace(
        r#""event_host": "Hoshino""#,
        r#""event_host": "Hoshino", "extras": {"theme": "dark"}"#,
    );
    assert!(ConfigLoader::parse(&with_extras, false).is_ok());
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
form_url: https://forms.example/viewform
event_name: Friday Social
start_hour: 9
start_minute: 0
end_hour: 10
end_minute: 30
event_host: Hoshino
genres:
  - 交流
engine:
  launch:
    webdriver_url: http://127.0.0.1:4444
"#;
    let config = ConfigLoader::parse(yaml, true).unwrap();
    assert_eq!(config.start_hour, "09");
    assert_eq!(config.genres, vec!["交流"]);
    assert_eq!(
        config.engine.launch.webdriver_url.as_deref(),
        Some("http://127.0.0.1:4444")
    );
    assert_eq!(config.engine.launch.attempts, 3);
}

#[tokio::test]
async fn test_load_from_file() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();

    let config = ConfigLoader::load_from(file.path()).await.unwrap();
    assert_eq!(config.event_host, "Hoshino");
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::load_from(&dir.path().join("config.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_explicit_path_wins() {
    let explicit = std::path::Path::new("/tmp/somewhere/event.yaml");
    assert_eq!(ConfigLoader::resolve_path(Some(explicit)), explicit);
}

#[test]
fn test_blank_dates_default_to_today() {
    let config = ConfigLoader::parse(MINIMAL, false).unwrap();
    let today = date(2024, 3, 1);
    let values = FormValues::from_config(&config, today, &Reporter::default());

    assert_eq!(values.date(FieldKey::StartDateTime), Some(today));
    assert_eq!(values.date(FieldKey::EndDateTime), Some(today));
}

#[test]
fn test_weekday_start_date() {
    let with_monday = MINIMAL.replace(
        r#""event_host": "Hoshino""#,
        r#""event_host": "Hoshino", "start_date": "月曜""#,
    );
    let config = ConfigLoader::parse(&with_monday, false).unwrap();
    // 2024-03-06 is a Wednesday.
    let values = FormValues::from_config(&config, date(2024, 3, 6), &Reporter::default());

    assert_eq!(values.date(FieldKey::StartDateTime), Some(date(2024, 3, 11)));
    // Blank end date follows the normalized start date.
    assert_eq!(values.date(FieldKey::EndDateTime), Some(date(2024, 3, 11)));
}

#[test]
fn test_bad_date_warns_and_uses_today() {
    let bad = MINIMAL.replace(
        r#""event_host": "Hoshino""#,
        r#""event_host": "Hoshino", "start_date": "next friday", "end_date": "2024/03/09""#,
    );
    let config = ConfigLoader::parse(&bad, false).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let today = date(2024, 3, 6);
    let values = FormValues::from_config(&config, today, &Reporter::new(sink.clone()));

    assert_eq!(values.date(FieldKey::StartDateTime), Some(today));
    assert_eq!(values.date(FieldKey::EndDateTime), Some(date(2024, 3, 9)));
    assert_eq!(sink.count_matching("next friday"), 1);
}

#[test]
fn test_overseas_flag_maps_to_choice() {
    let wanted = MINIMAL.replace(
        r#""event_host": "Hoshino""#,
        r#""event_host": "Hoshino", "overseas_announcement": true"#,
    );
    let config = ConfigLoader::parse(&wanted, false).unwrap();
    let values = FormValues::from_config(&config, date(2024, 3, 6), &Reporter::default());
    assert_eq!(
        values.get(FieldKey::OverseasAnnouncement),
        Some(&FieldValue::Choice("希望する".into()))
    );
}
