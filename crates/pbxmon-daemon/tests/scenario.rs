//! End-to-end replays: raw push payloads → translate → correlator.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pbxmon_core::presence::ColorToken;
use pbxmon_core::types::CallStatus;
use pbxmon_daemon::{CallCorrelator, ManualTicks, TickScheduler};
use pbxmon_source_ami::translate;
use proptest::prelude::*;
use serde_json::{Value, json};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid datetime")
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

/// Translate and apply one payload; payloads that do not translate are
/// skipped the way the ingest loop skips them.
fn feed(c: &mut CallCorrelator<ManualTicks>, raw: Value, secs: i64) {
    if let Some(event) = translate(&raw, at(secs)) {
        c.apply(&event);
    }
}

fn color(c: &CallCorrelator<ManualTicks>, ext: &str) -> ColorToken {
    c.presence(ext).expect("presence").view().color
}

fn newchannel(leg: &str, caller: &str, exten: &str) -> Value {
    json!({
        "Event": "Newchannel",
        "Uniqueid": leg,
        "Linkedid": "C1",
        "CallerIDNum": caller,
        "Exten": exten,
    })
}

fn dial(event: &str, status: &str) -> Value {
    json!({
        "event": event,
        "data": {
            "Uniqueid": "leg1",
            "DestUniqueid": "leg2",
            "Linkedid": "C1",
            "CallerIDNum": "100",
            "DestCallerIDNum": "200",
            "DialStatus": status,
        }
    })
}

fn hangup(leg: &str) -> Value {
    json!({"Event": "Hangup", "Uniqueid": leg, "Linkedid": "C1"})
}

/// Label, color and annotation shown for an extension.
fn shown(c: &CallCorrelator<ManualTicks>, ext: &str) -> (String, ColorToken, Option<String>) {
    let view = c.presence(ext).expect("presence").view();
    (view.label, view.color, view.annotation)
}

fn expect_shown(
    c: &CallCorrelator<ManualTicks>,
    ext: &str,
    label: &str,
    color: ColorToken,
    annotation: Option<&str>,
) {
    let (got_label, got_color, got_annotation) = shown(c, ext);
    assert_eq!(got_label, label, "label of {ext}");
    assert_eq!(got_color, color, "color of {ext}");
    assert_eq!(got_annotation.as_deref(), annotation, "annotation of {ext}");
}

#[test]
fn answered_call_lifecycle() {
    let mut c = CallCorrelator::new(ManualTicks::new());

    // 100 dials 200.
    feed(&mut c, newchannel("leg1", "100", "200"), 0);
    assert_eq!(c.get_call("C1").expect("call").status, CallStatus::Calling);
    expect_shown(&c, "100", "Calling", ColorToken::Calling, Some("→ 200"));
    assert!(c.presence("200").is_none(), "callee untouched until it rings");

    // Routing leg for the callee joins the same call.
    feed(&mut c, newchannel("leg2", "<unknown>", "s"), 0);
    assert_eq!(c.call_count(), 1);

    // 200 rings.
    feed(&mut c, dial("DialState", "RINGING"), 1);
    assert_eq!(c.get_call("C1").expect("call").status, CallStatus::Ringing);
    expect_shown(&c, "100", "Calling", ColorToken::Calling, Some("→ 200"));
    expect_shown(&c, "200", "Ringing", ColorToken::Ringing, Some("← 100"));
    assert_eq!(c.scheduler().active_count(), 0, "no ticker before answer");

    // 200 answers at t=3.
    feed(&mut c, dial("DialEnd", "ANSWER"), 3);
    let call = c.get_call("C1").expect("call");
    assert_eq!(call.status, CallStatus::Connected);
    assert_eq!(call.answered_at, Some(at(3)));
    let handle = call.ticker.expect("ticker");
    assert_eq!(c.scheduler().active_count(), 1);
    expect_shown(&c, "100", "Connected", ColorToken::Connected, Some("↔ 200 (00:00)"));
    expect_shown(&c, "200", "Connected", ColorToken::Connected, Some("↔ 100 (00:00)"));

    // One tick per second, up to 65 s of talk time.
    for elapsed in 1..=65 {
        c.on_tick("C1", handle, at(3 + elapsed));
        let duration = format!("{:02}:{:02}", elapsed / 60, elapsed % 60);
        let from_100 = format!("↔ 200 ({duration})");
        let from_200 = format!("↔ 100 ({duration})");
        expect_shown(&c, "100", "Connected", ColorToken::Connected, Some(&from_100));
        expect_shown(&c, "200", "Connected", ColorToken::Connected, Some(&from_200));
    }
    expect_shown(&c, "100", "Connected", ColorToken::Connected, Some("↔ 200 (01:05)"));
    assert_eq!(c.call_snapshots(at(68))[0].duration, "01:05");
    assert_eq!(c.scheduler().active_count(), 1);

    feed(&mut c, hangup("leg2"), 90);
    assert_eq!(c.call_count(), 1, "one leg still open");
    expect_shown(&c, "200", "Connected", ColorToken::Connected, Some("↔ 100 (01:05)"));

    feed(&mut c, hangup("leg1"), 90);
    assert_eq!(c.call_count(), 0);
    assert_eq!(c.scheduler().active_count(), 0);
    expect_shown(&c, "100", "Available", ColorToken::Available, None);
    expect_shown(&c, "200", "Available", ColorToken::Available, None);

    // a late tick from the cancelled ticker changes nothing
    let version = c.version();
    assert!(c.on_tick("C1", handle, at(91)).ignored);
    assert_eq!(c.version(), version);
}

#[test]
fn device_state_for_idle_extension() {
    let mut c = CallCorrelator::new(ManualTicks::new());
    feed(&mut c, json!({"Device": "PJSIP/150", "State": "UNAVAILABLE"}), 0);

    let view = c.presence("150").expect("presence").view();
    assert_eq!(view.label, "Unavailable");
    assert_eq!(view.color.name(), "red");
    assert_eq!(c.call_count(), 0);
}

#[test]
fn unrecognized_device_state_shows_busy() {
    let mut c = CallCorrelator::new(ManualTicks::new());
    feed(&mut c, json!({"data": {"Device": "PJSIP/151", "State": "INVALID"}}), 0);
    assert_eq!(color(&c, "151"), ColorToken::Busy);
}

#[test]
fn events_for_unknown_call_leave_state_untouched() {
    let mut c = CallCorrelator::new(ManualTicks::new());
    feed(&mut c, json!({"Device": "PJSIP/100", "State": "NOT_INUSE"}), 0);
    let version = c.version();

    feed(&mut c, dial("DialEnd", "ANSWER"), 1);
    feed(&mut c, hangup("leg1"), 2);

    assert_eq!(c.version(), version);
    assert_eq!(c.call_count(), 0);
    assert_eq!(c.scheduler().started(), 0);
}

#[test]
fn restarting_ticker_keeps_one_running() {
    let mut c = CallCorrelator::new(ManualTicks::new());
    feed(&mut c, newchannel("leg1", "100", "200"), 0);
    feed(&mut c, dial("DialEnd", "ANSWER"), 1);

    c.start_ticker("C1");
    c.start_ticker("C1");
    assert_eq!(c.scheduler().active_for("C1").len(), 1);
    assert_eq!(c.scheduler().cancelled(), 2);
}

#[test]
fn reconnect_reset_then_fresh_call() {
    let mut c = CallCorrelator::new(ManualTicks::new());
    feed(&mut c, newchannel("leg1", "100", "200"), 0);
    feed(&mut c, dial("DialEnd", "ANSWER"), 1);

    c.reset_calls(at(5));
    assert_eq!(c.call_count(), 0);
    assert_eq!(c.scheduler().active_count(), 0);

    feed(&mut c, newchannel("leg1", "100", "200"), 6);
    assert_eq!(c.call_count(), 1);
    assert_eq!(c.get_call("C1").expect("call").started_at, at(6));
}

// ─── Properties ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    NewChannel(&'static str),
    Ringing,
    Answer,
    Hangup(&'static str),
    Tick,
    Device(&'static str),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop_oneof![Just("leg1"), Just("leg2")].prop_map(Step::NewChannel),
        Just(Step::Ringing),
        Just(Step::Answer),
        prop_oneof![Just("leg1"), Just("leg2")].prop_map(Step::Hangup),
        Just(Step::Tick),
        prop_oneof![Just("INUSE"), Just("UNAVAILABLE"), Just("NOT_INUSE")].prop_map(Step::Device),
    ]
}

proptest! {
    /// Under any ordering of one call's events: at most one ticker runs,
    /// only connected calls have one, and a removed call holds no ticker.
    #[test]
    fn single_call_invariants(steps in proptest::collection::vec(arb_step(), 0..40)) {
        let mut c = CallCorrelator::new(ManualTicks::new());

        for (i, step) in steps.into_iter().enumerate() {
            let secs = i64::try_from(i).unwrap_or(0);
            match step {
                Step::NewChannel(leg) => feed(&mut c, newchannel(leg, "100", "200"), secs),
                Step::Ringing => feed(&mut c, dial("DialState", "RINGING"), secs),
                Step::Answer => feed(&mut c, dial("DialEnd", "ANSWER"), secs),
                Step::Hangup(leg) => feed(&mut c, hangup(leg), secs),
                Step::Tick => {
                    if let Some(handle) = c.get_call("C1").and_then(|call| call.ticker) {
                        c.on_tick("C1", handle, at(secs));
                    }
                }
                Step::Device(state) => {
                    feed(&mut c, json!({"Device": "PJSIP/200", "State": state}), secs);
                }
            }

            prop_assert!(c.scheduler().active_count() <= 1);
            match c.get_call("C1") {
                Some(call) => {
                    prop_assert!(!call.channels.is_empty());
                    let has_ticker = call.ticker.is_some();
                    prop_assert_eq!(has_ticker, call.status == CallStatus::Connected);
                    prop_assert_eq!(c.scheduler().active_count(), usize::from(has_ticker));
                }
                None => {
                    prop_assert_eq!(c.scheduler().active_count(), 0);
                    if let Some(p) = c.presence("100") {
                        prop_assert!(p.call_state.is_none());
                    }
                }
            }
        }
    }
}

#[test]
fn scheduler_trait_is_object_safe() {
    let mut ticks: Box<dyn TickScheduler> = Box::new(ManualTicks::new());
    let h = ticks.start("C1");
    ticks.cancel(h);
}
