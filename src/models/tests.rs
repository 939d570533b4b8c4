use super::*;

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_default() {
    let opts = ConnectionOptions::default();

    assert!(opts.auto_reconnect, "auto_reconnect should default to true");
    assert_eq!(opts.reconnect_delay_ms, 1000, "reconnect_delay_ms should default to 1000");
    assert_eq!(opts.max_reconnect_delay_ms, None, "backoff should be uncapped by default");
    assert_eq!(opts.max_reconnect_attempts, 10, "max_reconnect_attempts should default to 10");
    assert!(!opts.fail_subscriptions_on_give_up);
    assert_eq!(opts.sync_path, "/api/sync");
}

#[test]
fn test_connection_options_builder_pattern() {
    let opts = ConnectionOptions::new()
        .with_auto_reconnect(false)
        .with_reconnect_delay_ms(2000)
        .with_max_reconnect_delay_ms(Some(60000))
        .with_max_reconnect_attempts(5)
        .with_fail_subscriptions_on_give_up(true)
        .with_sync_path("/sync");

    assert!(!opts.auto_reconnect);
    assert_eq!(opts.reconnect_delay_ms, 2000);
    assert_eq!(opts.max_reconnect_delay_ms, Some(60000));
    assert_eq!(opts.max_reconnect_attempts, 5);
    assert!(opts.fail_subscriptions_on_give_up);
    assert_eq!(opts.sync_path, "/sync");
}

#[test]
fn test_connection_options_deserialize_fills_defaults() {
    let opts: ConnectionOptions = serde_json::from_str(r#"{"reconnect_delay_ms": 250}"#).unwrap();

    assert!(opts.auto_reconnect);
    assert_eq!(opts.reconnect_delay_ms, 250);
    assert_eq!(opts.max_reconnect_attempts, 10);
    assert_eq!(opts.sync_path, "/api/sync");
}

#[test]
fn test_connection_options_serialization() {
    let opts = ConnectionOptions::new()
        .with_reconnect_delay_ms(500)
        .with_max_reconnect_attempts(3);

    let json = serde_json::to_string(&opts).unwrap();
    let parsed: ConnectionOptions = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, opts);
}

// ==================== RegistryConfig Tests ====================

#[test]
fn test_registry_config_default() {
    let cfg = RegistryConfig::default();

    assert!(cfg.deduplicate);
    assert!(cfg.max_subscriptions.is_none());
    assert!(!cfg.queue_updates_while_paused);
}

#[test]
fn test_registry_config_deserialize_empty_object() {
    let cfg: RegistryConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, RegistryConfig::default());
}

// ==================== SubscriptionOptions Tests ====================

#[test]
fn test_subscription_options_default() {
    let opts = SubscriptionOptions::default();

    assert!(!opts.skip_initial_callback);
    assert_eq!(opts.priority, SubscriptionPriority::Normal);
    assert!(opts.queue_updates_while_paused.is_none());
}

#[test]
fn test_subscription_options_skip_none_override_when_serializing() {
    let opts = SubscriptionOptions::new().with_priority(SubscriptionPriority::High);
    let json = serde_json::to_value(&opts).unwrap();

    assert_eq!(json["priority"], "high");
    assert!(json.get("queue_updates_while_paused").is_none());
}

// ==================== Status / id Tests ====================

#[test]
fn test_subscription_status_terminal() {
    assert!(SubscriptionStatus::Completed.is_terminal());
    assert!(!SubscriptionStatus::Paused.is_terminal());
    assert_eq!(SubscriptionStatus::Active.to_string(), "active");
}

#[test]
fn test_subscription_id_display() {
    assert_eq!(SubscriptionId::new(7).to_string(), "sub_7");
    assert_eq!(serde_json::to_string(&SubscriptionId::new(7)).unwrap(), "7");
}

#[test]
fn test_remote_error_display() {
    assert_eq!(RemoteError::new("boom").to_string(), "boom");
    assert_eq!(RemoteError::with_code("boom", "E1").to_string(), "[E1] boom");
}
