//! Startup configuration: malformed options must stop the process before
//! it answers a single query.

mod common;

use common::ZoneKey;
use vordr::config::Config;
use vordr::error::ConfigError;

/// Environment-driven tests share process state; run the whole battery in
/// a single test so variables never race.
#[test]
fn from_env_battery() {
    // Defaults parse with an empty environment.
    let config = Config::from_env().unwrap();
    assert_eq!(config.nsec3_iterations.max_1024, 150);
    assert_eq!(config.nsec3_iterations.max_2048, 500);
    assert_eq!(config.nsec3_iterations.max_4096, 2500);

    // An NSEC3 iteration limit that cannot fit the wire field is a hard
    // startup error, not a clamp.
    std::env::set_var("VORDR_NSEC3_ITERATIONS_1024", "2147483647");
    let result = Config::from_env();
    std::env::remove_var("VORDR_NSEC3_ITERATIONS_1024");
    assert!(matches!(
        result,
        Err(ConfigError::InvalidNsec3Iterations { key_size: 1024, .. })
    ));

    // The largest 16-bit value is still accepted.
    std::env::set_var("VORDR_NSEC3_ITERATIONS_4096", "65535");
    let config = Config::from_env().unwrap();
    std::env::remove_var("VORDR_NSEC3_ITERATIONS_4096");
    assert_eq!(config.nsec3_iterations.max_4096, 65535);

    // Digest preference must name known digest algorithms.
    std::env::set_var("VORDR_DIGEST_PREFERENCE", "2,255");
    let result = Config::from_env();
    std::env::remove_var("VORDR_DIGEST_PREFERENCE");
    assert!(matches!(result, Err(ConfigError::InvalidDigestPreference(_))));

    std::env::set_var("VORDR_DIGEST_PREFERENCE", "4,2");
    let config = Config::from_env().unwrap();
    std::env::remove_var("VORDR_DIGEST_PREFERENCE");
    assert_eq!(config.digest_preference.len(), 2);

    // Upstream servers accept bare addresses and address:port.
    std::env::set_var("VORDR_UPSTREAM_SERVERS", "192.0.2.1,192.0.2.2:5353");
    let config = Config::from_env().unwrap();
    std::env::remove_var("VORDR_UPSTREAM_SERVERS");
    assert_eq!(config.upstream_servers.len(), 2);
    assert_eq!(config.upstream_servers[0].port(), 53);
    assert_eq!(config.upstream_servers[1].port(), 5353);

    std::env::set_var("VORDR_UPSTREAM_SERVERS", "not-an-address");
    let result = Config::from_env();
    std::env::remove_var("VORDR_UPSTREAM_SERVERS");
    assert!(matches!(result, Err(ConfigError::InvalidUpstreamServer(_))));

    // Zero timeouts make no sense.
    std::env::set_var("VORDR_UPSTREAM_TIMEOUT_MS", "0");
    let result = Config::from_env();
    std::env::remove_var("VORDR_UPSTREAM_TIMEOUT_MS");
    assert!(matches!(result, Err(ConfigError::InvalidTimeout(_))));
}

#[test]
fn trust_anchor_file_round_trip() {
    let key = ZoneKey::generate("example.ch");
    let path = std::env::temp_dir().join(format!("vordr-anchors-{}.txt", std::process::id()));
    std::fs::write(&path, format!("; test anchors\n{}\n", key.anchor_line())).unwrap();

    let mut config = Config::default();
    config.trust_anchor_file = Some(path.to_string_lossy().into_owned());
    let anchors = config.load_trust_anchors().unwrap();
    assert_eq!(anchors.len(), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_trust_anchor_file_fails_startup() {
    let mut config = Config::default();
    config.trust_anchor_file = Some("/nonexistent/vordr-anchors.txt".to_string());
    assert!(matches!(
        config.load_trust_anchors(),
        Err(ConfigError::TrustAnchorFile { .. })
    ));
}

#[test]
fn garbage_anchor_file_fails_startup() {
    let path = std::env::temp_dir().join(format!("vordr-bad-anchors-{}.txt", std::process::id()));
    std::fs::write(&path, "example.ch. IN A 192.0.2.1\n").unwrap();

    let mut config = Config::default();
    config.trust_anchor_file = Some(path.to_string_lossy().into_owned());
    assert!(matches!(
        config.load_trust_anchors(),
        Err(ConfigError::TrustAnchorFile { .. })
    ));

    std::fs::remove_file(&path).ok();
}
