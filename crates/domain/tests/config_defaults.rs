use va_domain::config::{Config, ConfigSeverity};

#[test]
fn default_gateway_host_binds_all_interfaces() {
    let config = Config::default();
    assert_eq!(config.gateway.listen_host, "0.0.0.0");
    assert_eq!(config.gateway.listen_port, 8787);
}

#[test]
fn default_sample_rates_match_spec_defaults() {
    let config = Config::default();
    assert_eq!(config.stt.sample_rate, 16_000);
    assert_eq!(config.tts.sample_rate, 24_000);
}

#[test]
fn default_voice_is_jess() {
    let config = Config::default();
    assert_eq!(config.tts.default_voice, "jess");
}

#[test]
fn default_config_fails_validation_without_provider_keys() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
}
