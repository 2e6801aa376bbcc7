// End-to-end wire grammar checks: routing key in, command topic out.

use calcifer_bus::{DeviceFamily, FeedbackFrame, FeedbackValue, MemoryBus, WireCommand};
use calcifer_bus::publisher::CommandPublisher;
use calcifer_bus::routing::{command_topic, state_topic};

// ── Inbound ─────────────────────────────────────────────────────────

#[test]
fn relay_feedback_round_trip() {
    let frame = FeedbackFrame::new(
        "home.termocamino.digital_output.pump.state",
        Some("broker-42".into()),
        " HIGH ",
    );
    let parsed = frame.parse().expect("valid frame");

    assert_eq!(parsed.route.controller, "termocamino");
    assert_eq!(parsed.route.component, "pump");
    assert_eq!(parsed.value, FeedbackValue::Switch(true));
    assert_eq!(
        parsed.route.state_topic(),
        "/termocamino/digital_output/pump/state"
    );
}

#[test]
fn temperature_sensor_id_comes_from_routing_key() {
    let frame = FeedbackFrame::new("home.boiler.temperature.probe_3.state", None, "64.5");
    let parsed = frame.parse().expect("valid frame");

    assert_eq!(parsed.route.component, "probe_3");
    assert_eq!(parsed.value, FeedbackValue::Temperature(64.5));
}

#[test]
fn malformed_payload_is_a_dead_letter_reject() {
    let frame = FeedbackFrame::new("home.c1.fan.f1.state", None, "9");
    let err = frame.parse().expect_err("fan speed 9 must be rejected");
    assert!(err.is_reject());
}

// ── Outbound ────────────────────────────────────────────────────────

#[tokio::test]
async fn command_topics_follow_the_set_pattern() {
    let bus = MemoryBus::new();
    let topic = command_topic("termocamino", DeviceFamily::Fan, "main_fan");
    assert_eq!(topic, "/termocamino/fan/main_fan/set");

    bus.publish(WireCommand {
        topic,
        payload: "4".into(),
    })
    .await
    .expect("memory bus never fails");

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, "4");
}

#[test]
fn echo_topics_follow_the_state_pattern() {
    assert_eq!(
        state_topic("c1", DeviceFamily::DigitalOutput, "r1"),
        "/c1/digital_output/r1/state"
    );
}
