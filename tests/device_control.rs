//! End-to-end control of a mock display through the device registry.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use display_control::device::{endpoint_for, DeviceRegistry, Operation, OperationOutput, PowerPhase};
use display_control::error::ControlError;
use display_control::protocol::DeviceFamily;
use display_control::health::diagnose;
use display_control::protocol::types::PowerStatus;
use display_control::resilience::{CircuitState, Timeouts};

mod common;
use common::{config_for, config_for_port, MockDisplay, MockOptions, PASSWORD};

#[tokio::test]
async fn power_on_sends_one_command_and_tracks_warmup() {
    let display = MockDisplay::start(MockOptions::default()).await;
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let outcome = registry.execute("hall", Operation::PowerOn).await;
    assert!(outcome.success(), "{:?}", outcome.error());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(
        outcome.value(),
        Some(&OperationOutput::PowerRequest {
            phase: PowerPhase::Warming,
            command_sent: true,
        })
    );

    let again = registry.execute("hall", Operation::PowerOn).await;
    assert!(again.success());
    assert_eq!(again.attempts, 0);
    assert_eq!(display.count("%1POWR 1"), 1);

    let status = registry.execute("hall", Operation::PowerStatus).await;
    assert_eq!(status.value(), Some(&OperationOutput::Power(PowerStatus::On)));
    let controller = registry.controller("hall").await.unwrap();
    assert_eq!(controller.power().phase(), PowerPhase::On);
}

#[tokio::test]
async fn overlapping_power_on_requests_send_a_single_command() {
    let display = MockDisplay::start(MockOptions {
        reply_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let (first, second) = tokio::join!(
        registry.execute("hall", Operation::PowerOn),
        registry.execute("hall", Operation::PowerOn),
    );
    assert!(first.success() && second.success());
    assert_eq!(display.count("%1POWR 1"), 1);
}

#[tokio::test]
async fn authenticated_display_accepts_digest() {
    let display = MockDisplay::start(MockOptions {
        authenticated: true,
        ..Default::default()
    })
    .await;
    let mut config = config_for(&display);
    config.devices[0].password = Some(SecretString::from(PASSWORD));
    let registry = DeviceRegistry::new(Arc::new(config));

    let outcome = registry.execute("hall", Operation::Info).await;
    assert!(outcome.success(), "{:?}", outcome.error());
    match outcome.value() {
        Some(OperationOutput::Info(info)) => {
            assert_eq!(info.manufacturer, "Acme");
            assert_eq!(info.product, "PJ-100");
        }
        other => panic!("expected device info, got {other:?}"),
    }
    assert_eq!(display.commands()[0], "%1NAME ?");
}

#[tokio::test]
async fn wrong_password_fails_without_retrying() {
    let display = MockDisplay::start(MockOptions {
        authenticated: true,
        ..Default::default()
    })
    .await;
    let mut config = config_for(&display);
    config.devices[0].password = Some(SecretString::from("not-the-password"));
    let registry = DeviceRegistry::new(Arc::new(config));

    let outcome = registry.execute("hall", Operation::PowerStatus).await;
    assert!(matches!(outcome.error(), Some(ControlError::Authentication { .. })));
    assert_eq!(outcome.attempts, 1);
    assert_eq!(display.connections(), 1);
}

#[tokio::test]
async fn dropped_connection_is_retried_on_a_fresh_session() {
    let display = MockDisplay::start(MockOptions {
        drop_first: 1,
        ..Default::default()
    })
    .await;
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let outcome = registry.execute("hall", Operation::LampHours).await;
    assert!(outcome.success(), "{:?}", outcome.error());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(display.connections(), 2);
}

#[tokio::test]
async fn breaker_opens_after_repeated_refusals() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = config_for_port(port);
    config.retry.max_retries = 0;
    let registry = DeviceRegistry::new(Arc::new(config));

    for _ in 0..5 {
        let outcome = registry.execute("hall", Operation::PowerStatus).await;
        assert!(matches!(outcome.error(), Some(ControlError::Network { .. })));
    }

    let controller = registry.controller("hall").await.unwrap();
    assert_eq!(controller.executor().breaker().state(), CircuitState::Open);

    let outcome = registry.execute("hall", Operation::PowerStatus).await;
    match outcome.error() {
        Some(ControlError::CircuitOpen { retry_after, .. }) => {
            assert!(*retry_after <= Duration::from_secs(30));
        }
        other => panic!("expected an open circuit, got {other:?}"),
    }
    assert_eq!(controller.power().phase(), PowerPhase::Error);
}

#[tokio::test]
async fn device_rejection_resyncs_power_phase() {
    let display = MockDisplay::start(MockOptions::default()).await;
    display.set_power("2");
    display.answer("%1POWR 1", "ERR3");
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let outcome = registry.execute("hall", Operation::PowerOn).await;
    assert!(matches!(outcome.error(), Some(ControlError::State { .. })));
    assert_eq!(outcome.attempts, 1);

    let controller = registry.controller("hall").await.unwrap();
    assert_eq!(controller.power().phase(), PowerPhase::Cooling);

    let blocked = registry.execute("hall", Operation::PowerOn).await;
    assert!(matches!(blocked.error(), Some(ControlError::PowerGuard { .. })));
    assert_eq!(blocked.attempts, 0);
    assert_eq!(display.count("%1POWR 1"), 1);
}

#[tokio::test]
async fn pool_caps_concurrent_sessions() {
    let display = MockDisplay::start(MockOptions {
        reply_delay: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let mut config = config_for(&display);
    config.pool.max_connections = 2;
    let registry = DeviceRegistry::new(Arc::new(config));

    let (a, b, c) = tokio::join!(
        registry.execute("hall", Operation::InputStatus),
        registry.execute("hall", Operation::ErrorStatus),
        registry.execute("hall", Operation::MuteStatus),
    );
    assert!(a.success() && b.success() && c.success());
    assert_eq!(display.peak_active(), 2);
    assert_eq!(display.connections(), 2);
}

#[tokio::test]
async fn set_input_and_mute_round_trip() {
    let display = MockDisplay::start(MockOptions::default()).await;
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let set = registry
        .execute("hall", "set_input 31".parse().unwrap())
        .await;
    assert_eq!(set.value(), Some(&OperationOutput::Done));
    let input = registry.execute("hall", Operation::InputStatus).await;
    assert_eq!(
        input.value().map(|v| serde_json::to_value(v).unwrap()),
        Some(serde_json::json!({"kind": "input", "value": "31"}))
    );

    assert!(registry.execute("hall", Operation::Mute).await.success());
    match registry.execute("hall", Operation::MuteStatus).await.value() {
        Some(OperationOutput::Mute(state)) => assert!(state.video && state.audio),
        other => panic!("expected mute state, got {other:?}"),
    }
}

#[tokio::test]
async fn class2_display_reports_service_details_and_freezes() {
    let display = MockDisplay::start(MockOptions::default()).await;
    let mut config = config_for(&display);
    config.devices[0].family = DeviceFamily::Class2;
    let registry = DeviceRegistry::new(Arc::new(config));

    match registry.execute("hall", Operation::ServiceInfo).await.value() {
        Some(OperationOutput::Service(info)) => {
            assert_eq!(info.serial_number, "SN-0042");
            assert_eq!(info.software_version, "1.07");
            assert_eq!(info.lamp_model, "LMP-9");
            assert_eq!(info.filter_model, "FLT-3");
        }
        other => panic!("expected service details, got {other:?}"),
    }

    assert!(registry.execute("hall", Operation::Freeze).await.success());
    let frozen = registry.execute("hall", Operation::FreezeStatus).await;
    assert_eq!(frozen.value(), Some(&OperationOutput::Frozen(true)));
    let filter = registry.execute("hall", Operation::FilterHours).await;
    assert_eq!(filter.value(), Some(&OperationOutput::FilterHours(310)));
    assert_eq!(display.count("%2FREZ 1"), 1);
}

#[tokio::test]
async fn class1_display_rejects_class2_operations_locally() {
    let display = MockDisplay::start(MockOptions::default()).await;
    let registry = DeviceRegistry::new(Arc::new(config_for(&display)));

    let outcome = registry.execute("hall", Operation::Freeze).await;
    assert!(matches!(outcome.error(), Some(ControlError::Protocol { code: None, .. })));
    assert_eq!(outcome.attempts, 1);
    assert_eq!(display.connections(), 0);
}

#[tokio::test]
async fn diagnostics_pass_against_a_healthy_display() {
    let display = MockDisplay::start(MockOptions::default()).await;
    let config = config_for(&display);

    let report = diagnose(&endpoint_for(&config.devices[0]), Timeouts::from(&config.timeouts)).await;
    assert!(report.all_passed(), "{report:?}");
    assert_eq!(display.commands(), vec!["%1CLSS ?".to_string()]);
}
