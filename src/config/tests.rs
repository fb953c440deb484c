use super::*;
use tempfile::TempDir;

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.openai.embedding_model, "text-embedding-3-small");
    assert_eq!(config.openai.embedding_dimension, 1536);
    assert_eq!(config.index.namespace, "prod");
}

#[test]
fn load_missing_file_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("temp dir");
    let config = Config::load(temp_dir.path()).expect("load defaults");

    assert_eq!(config, Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });
}

#[test]
fn save_and_reload_round_trip() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.index.namespace = "staging".to_string();
    config.ranking.high_confidence = 0.7;
    config.save().expect("save config");

    let reloaded = Config::load(temp_dir.path()).expect("reload config");
    assert_eq!(reloaded.index.namespace, "staging");
    assert_eq!(reloaded.ranking.high_confidence, 0.7);
}

#[test]
fn rejects_zero_dimension() {
    let mut config = Config::default();
    config.openai.embedding_dimension = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));
}

#[test]
fn rejects_inverted_thresholds() {
    let mut config = Config::default();
    config.ranking.min_score = 0.9;
    config.ranking.high_confidence = 0.5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ThresholdOrder(_, _))
    ));
}

#[test]
fn rejects_out_of_range_threshold() {
    let mut config = Config::default();
    config.ranking.score_gap = 1.5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidThreshold {
            name: "score_gap",
            ..
        })
    ));
}

#[test]
fn rejects_bad_namespace() {
    let mut config = Config::default();
    config.index.namespace = "prod/../etc".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidNamespace(_))
    ));
}

#[test]
fn rejects_non_http_catalog_url() {
    let mut config = Config::default();
    config.catalog.base_url = "ftp://ortahaus.com".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn manifest_path_is_namespaced() {
    let mut config = Config {
        base_dir: PathBuf::from("/data"),
        ..Config::default()
    };
    config.index.namespace = "staging".to_string();
    assert!(
        config
            .manifest_path()
            .to_string_lossy()
            .ends_with("index-staging.manifest.json")
    );
}
