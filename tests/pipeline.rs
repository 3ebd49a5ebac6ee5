use discourse_wordcloud::{CancelToken, CloudError, Config, Settings, generate};

fn scenario_comments() -> Vec<String> {
    vec!["<p>测试 测试 词云</p>".to_string()]
}

#[test]
fn pipeline_persists_the_ranked_scenario_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::new("scenario", dir.path());
    let result = generate(
        &scenario_comments(),
        &config,
        &Settings::default(),
        &CancelToken::new(),
    );

    // The ranked list is persisted before fonts are touched, so the artifact
    // must exist even when the host has no fonts to render with.
    let freq_path = dir.path().join("scenario_freq.json");
    assert!(freq_path.exists());
    let content = std::fs::read_to_string(&freq_path).expect("read");
    let pairs: Vec<(String, u64)> = serde_json::from_str(&content).expect("parse");
    assert_eq!(pairs[0], ("测试".to_string(), 2));
    assert_eq!(pairs[1], ("词云".to_string(), 1));

    match result {
        Ok(outcome) => {
            assert!(outcome.image_path.exists());
            let png = std::fs::read(&outcome.image_path).expect("read png");
            assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
            assert_eq!(outcome.placed + outcome.dropped, 2);
            assert_eq!(outcome.ranked.len(), 2);
        }
        Err(CloudError::FontResourceMissing(_)) => {
            // Headless host without fonts; rendering is exercised where a
            // font is available.
        }
        Err(err) => panic!("unexpected pipeline failure: {err}"),
    }
}

#[test]
fn reruns_write_byte_identical_ranked_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut contents = Vec::new();
    for identifier in ["first", "second"] {
        let config = Config::new(identifier, dir.path());
        let _ = generate(
            &scenario_comments(),
            &config,
            &Settings::default(),
            &CancelToken::new(),
        );
        let path = dir.path().join(format!("{identifier}_freq.json"));
        contents.push(std::fs::read(&path).expect("artifact"));
    }
    assert_eq!(contents[0], contents[1]);
}

#[test]
fn unreadable_mask_degrades_to_full_canvas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mask_path = dir.path().join("mask.png");
    std::fs::write(&mask_path, b"definitely not an image").expect("write");
    let mut config = Config::new("badmask", dir.path());
    config.mask_path = Some(mask_path);
    let result = generate(
        &scenario_comments(),
        &config,
        &Settings::default(),
        &CancelToken::new(),
    );
    // The broken mask is recovered; only a fontless host may still fail.
    match result {
        Ok(outcome) => assert!(outcome.placed >= 1),
        Err(CloudError::FontResourceMissing(_)) => {}
        Err(err) => panic!("mask decode failure must not be fatal: {err}"),
    }
}

#[test]
fn min_frequency_threshold_reaches_the_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::new("minfreq", dir.path());
    config.min_frequency = 2;
    let _ = generate(
        &scenario_comments(),
        &config,
        &Settings::default(),
        &CancelToken::new(),
    );
    let content = std::fs::read_to_string(dir.path().join("minfreq_freq.json")).expect("read");
    let pairs: Vec<(String, u64)> = serde_json::from_str(&content).expect("parse");
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, "测试");
}
