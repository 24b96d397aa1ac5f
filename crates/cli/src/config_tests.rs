use super::*;
use tempfile::tempdir;

#[test]
fn test_default_config_round_trips_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILENAME);

    AppConfig::default().save(&path).unwrap();
    let loaded = AppConfig::load(&path).unwrap();

    assert_eq!(loaded.github.token_env, DEFAULT_TOKEN_ENV);
    assert_eq!(loaded.github.api_url, None);
    assert_eq!(loaded.campaigns, CampaignsConfig::default());
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
    fs::write(
        &path,
        r#"
[github]
api_url = "https://github.example.com/api/v3"

[campaigns.sync]
min_sync_delay_seconds = 60
"#,
    )
    .unwrap();

    let loaded = AppConfig::load(&path).unwrap();

    assert_eq!(
        loaded.github.api_url.as_deref(),
        Some("https://github.example.com/api/v3")
    );
    assert_eq!(loaded.github.token_env, DEFAULT_TOKEN_ENV);
    assert_eq!(loaded.campaigns.sync.min_sync_delay_seconds, 60);
    assert!(loaded.campaigns.enabled);
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let result = AppConfig::load(&path);

    assert!(matches!(result, Err(CliError::ConfigError(_))));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let loaded = AppConfig::load_or_default(&path).unwrap();

    assert_eq!(loaded.campaigns, CampaignsConfig::default());
}

#[test]
fn test_inconsistent_sync_delays_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
    fs::write(
        &path,
        "[campaigns.sync]\nmin_sync_delay_seconds = 600\nmax_sync_delay_seconds = 60\n",
    )
    .unwrap();

    let result = AppConfig::load(&path);

    assert!(matches!(result, Err(CliError::ConfigError(_))));
}

#[test]
fn test_token_from_unset_variable_is_an_auth_error() {
    let config = GitHubConfig {
        api_url: None,
        token_env: "CAMPAIGNS_CLI_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
    };

    assert!(matches!(config.token(), Err(CliError::AuthError(_))));
}

#[test]
fn test_explicit_config_path_is_used_as_is() {
    assert_eq!(
        get_config_path(Some("custom/campaigns.toml")),
        PathBuf::from("custom/campaigns.toml")
    );
    assert!(get_config_path(None).ends_with(DEFAULT_CONFIG_FILENAME));
}
